use std::collections::HashMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entities::{Game, Market, OddsSnapshot, Period};
use crate::market::{devig_two_way, SpreadProbModel};
use crate::store::CanonicalSnapshot;

/// Rolling per-team aggregates over the most recent prior games. Derived
/// data: recomputable from the snapshot at any time, never ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingWindowStats {
    pub team_id: u32,
    pub as_of_date: NaiveDate,
    pub window_size: usize,
    /// True number of games found; near season start this is below
    /// `window_size` and the aggregates cover only what exists. No padding.
    pub games_in_window: usize,
    pub points_for_avg: f64,
    pub points_against_avg: f64,
    pub margin_avg: f64,
    pub win_rate: f64,
    /// Exact prior-game dates used, newest first. Every one of them is
    /// strictly before `as_of_date`.
    pub game_dates: Vec<NaiveDate>,
}

/// The `window_size` most recent completed games strictly before
/// `as_of_date`. Pure over the snapshot; callers own their decision horizon
/// and this function never reads the wall clock.
pub fn rolling_stats(
    snap: &CanonicalSnapshot,
    team_id: u32,
    as_of_date: NaiveDate,
    window_size: usize,
) -> RollingWindowStats {
    let rows = snap.team_games(team_id);
    // Rows are in chronological order; walk backwards from the cutoff.
    let cutoff = rows.partition_point(|row| row.date < as_of_date);
    let start = cutoff.saturating_sub(window_size);
    let window = &rows[start..cutoff];

    let games_in_window = window.len();
    let mut points_for = 0.0;
    let mut points_against = 0.0;
    let mut wins = 0.0;
    let mut game_dates = Vec::with_capacity(games_in_window);
    for row in window.iter().rev() {
        points_for += row.points_for as f64;
        points_against += row.points_against as f64;
        if row.won {
            wins += 1.0;
        }
        game_dates.push(row.date);
    }

    let n = games_in_window as f64;
    let (points_for_avg, points_against_avg, win_rate) = if games_in_window > 0 {
        (points_for / n, points_against / n, wins / n)
    } else {
        (0.0, 0.0, 0.0)
    };

    RollingWindowStats {
        team_id,
        as_of_date,
        window_size,
        games_in_window,
        points_for_avg,
        points_against_avg,
        margin_avg: points_for_avg - points_against_avg,
        win_rate,
        game_dates,
    }
}

/// Parallel batch form of `rolling_stats`. Safe because the snapshot is
/// immutable and each (team, as_of) pair is independent.
pub fn rolling_stats_batch(
    snap: &CanonicalSnapshot,
    requests: &[(u32, NaiveDate)],
    window_size: usize,
) -> Vec<RollingWindowStats> {
    requests
        .par_iter()
        .map(|&(team_id, as_of)| rolling_stats(snap, team_id, as_of, window_size))
        .collect()
}

/// Market-consensus view of one game as of tipoff. Each field is the latest
/// pre-start snapshot for that market, or `None` when no qualifying
/// snapshot exists -- absence is never encoded as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingLineFeatures {
    pub game_id: String,
    pub spread_line: Option<f64>,
    /// Home-win probability implied by `spread_line` via the configured
    /// transform.
    pub spread_implied_home_prob: Option<f64>,
    pub total_line: Option<f64>,
    /// De-vigged home probability from the moneyline pair.
    pub moneyline_home_prob: Option<f64>,
}

fn latest_pre_start<'a>(
    snapshots: &'a [OddsSnapshot],
    market: Market,
    period: Period,
    game: &Game,
) -> Option<&'a OddsSnapshot> {
    snapshots
        .iter()
        .filter(|s| s.market == market && s.period == period)
        .filter(|s| s.observed_at <= game.tipoff)
        .max_by_key(|s| s.observed_at)
}

fn earliest<'a>(
    snapshots: &'a [OddsSnapshot],
    market: Market,
    period: Period,
    game: &Game,
) -> Option<&'a OddsSnapshot> {
    snapshots
        .iter()
        .filter(|s| s.market == market && s.period == period)
        .filter(|s| s.observed_at <= game.tipoff)
        .min_by_key(|s| s.observed_at)
}

/// Latest pre-tipoff snapshot per full-game market. Snapshots observed after
/// the start never qualify, so adding in-play prices to the store cannot
/// change any pre-game decision.
pub fn closing_line_features(
    snap: &CanonicalSnapshot,
    game: &Game,
    spread_model: &dyn SpreadProbModel,
) -> ClosingLineFeatures {
    let snapshots = snap.game_odds(&game.game_id);

    let spread = latest_pre_start(snapshots, Market::Spread, Period::FullGame, game);
    let total = latest_pre_start(snapshots, Market::Total, Period::FullGame, game);
    let moneyline = latest_pre_start(snapshots, Market::Moneyline, Period::FullGame, game);

    ClosingLineFeatures {
        game_id: game.game_id.clone(),
        spread_line: spread.map(|s| s.line),
        spread_implied_home_prob: spread.map(|s| spread_model.home_win_prob(s.line)),
        total_line: total.map(|s| s.line),
        moneyline_home_prob: moneyline.map(|s| devig_two_way(s.price_a, s.price_b).0),
    }
}

/// Opening observation for one market: the earliest pre-start snapshot.
pub fn opening_snapshot<'a>(
    snap: &'a CanonicalSnapshot,
    game: &Game,
    market: Market,
    period: Period,
) -> Option<&'a OddsSnapshot> {
    earliest(snap.game_odds(&game.game_id), market, period, game)
}

/// Closing observation for one market: the latest pre-start snapshot.
pub fn closing_snapshot<'a>(
    snap: &'a CanonicalSnapshot,
    game: &Game,
    market: Market,
    period: Period,
) -> Option<&'a OddsSnapshot> {
    latest_pre_start(snap.game_odds(&game.game_id), market, period, game)
}

/// Optional cache for rolling stats. Keyed by the immutable store version,
/// so entries from a superseded store can never answer for a newer one;
/// appends produce new keys rather than invalidation traffic.
#[derive(Debug, Default)]
pub struct FeatureCache {
    entries: HashMap<(i64, u32, NaiveDate, usize), RollingWindowStats>,
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rolling_stats(
        &mut self,
        snap: &CanonicalSnapshot,
        team_id: u32,
        as_of_date: NaiveDate,
        window_size: usize,
    ) -> RollingWindowStats {
        let key = (snap.store_version, team_id, as_of_date, window_size);
        if let Some(hit) = self.entries.get(&key) {
            return hit.clone();
        }
        let stats = rolling_stats(snap, team_id, as_of_date, window_size);
        self.entries.insert(key, stats.clone());
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
