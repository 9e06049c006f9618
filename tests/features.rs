use chrono::NaiveDate;

use ncaam_edge::entities::{Market, Period, Team};
use ncaam_edge::features::{
    closing_line_features, closing_snapshot, opening_snapshot, rolling_stats, FeatureCache,
};
use ncaam_edge::feed::{RawBatch, RawGameRow, RawOddsRow, RawScoreRow};
use ncaam_edge::market::{NormalSpreadModel, SpreadProbModel};
use ncaam_edge::quality::GateConfig;
use ncaam_edge::resolver::TeamDirectory;
use ncaam_edge::store::{ingest_batch, open_in_memory, CanonicalSnapshot};

fn directory() -> TeamDirectory {
    let team = |id: u32, name: &str| Team {
        team_id: id,
        canonical_name: name.to_string(),
        non_major: false,
    };
    TeamDirectory::load(
        vec![
            team(1, "Duke"),
            team(2, "North Carolina"),
            team(3, "Kansas"),
            team(4, "Gonzaga"),
        ],
        vec![],
        vec![],
    )
    .unwrap()
}

fn game_row(date: &str, home: &str, away: &str) -> RawGameRow {
    RawGameRow {
        date: date.to_string(),
        tipoff: format!("{date}T23:00:00"),
        home_name: home.to_string(),
        away_name: away.to_string(),
        source: "schedule".to_string(),
    }
}

fn score_row(date: &str, home: &str, away: &str, hs: i64, aw: i64) -> RawScoreRow {
    RawScoreRow {
        date: date.to_string(),
        home_name: home.to_string(),
        away_name: away.to_string(),
        home_score: hs,
        away_score: aw,
        home_h1: None,
        away_h1: None,
        source: "scorefeed".to_string(),
    }
}

fn odds_row(observed_at: &str, line: f64) -> RawOddsRow {
    RawOddsRow {
        event_id: "e1".to_string(),
        commence_time: "2024-01-15T23:00:00".to_string(),
        home_name: "Duke".to_string(),
        away_name: "North Carolina".to_string(),
        market: "spread".to_string(),
        period: None,
        line: Some(line),
        price_a: -110,
        price_b: -110,
        observed_at: observed_at.to_string(),
        source: "oddsfeed".to_string(),
    }
}

/// Two completed Duke games before 2024-01-15, plus the target game with a
/// three-snapshot spread history (open, close, post-tipoff).
fn seeded_snapshot() -> CanonicalSnapshot {
    let dir = directory();
    let mut conn = open_in_memory().unwrap();
    let cfg = GateConfig::default();

    let games = RawBatch::Games(vec![
        game_row("2024-01-05", "Duke", "Kansas"),
        game_row("2024-01-10", "Gonzaga", "Duke"),
        game_row("2024-01-15", "Duke", "North Carolina"),
    ]);
    assert!(ingest_batch(&mut conn, &dir, &games, &cfg).unwrap().committed);

    let scores = RawBatch::Scores(vec![
        score_row("2024-01-05", "Duke", "Kansas", 80, 70),
        score_row("2024-01-10", "Gonzaga", "Duke", 75, 60),
    ]);
    assert!(ingest_batch(&mut conn, &dir, &scores, &cfg).unwrap().committed);

    let odds = RawBatch::Odds(vec![
        odds_row("2024-01-14T12:00:00", -5.5),
        odds_row("2024-01-15T22:00:00", -7.5),
        // In-play price after tipoff; stored, but never a pre-game feature.
        odds_row("2024-01-15T23:30:00", -9.5),
    ]);
    assert!(ingest_batch(&mut conn, &dir, &odds, &cfg).unwrap().committed);

    CanonicalSnapshot::load(&conn).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn short_history_yields_partial_window() {
    let snap = seeded_snapshot();
    let stats = rolling_stats(&snap, 1, date(2024, 1, 15), 5);
    assert_eq!(stats.window_size, 5);
    assert_eq!(stats.games_in_window, 2);
    assert!((stats.points_for_avg - 70.0).abs() < 1e-9);
    assert!((stats.points_against_avg - 72.5).abs() < 1e-9);
    assert!((stats.margin_avg + 2.5).abs() < 1e-9);
    assert!((stats.win_rate - 0.5).abs() < 1e-9);
}

#[test]
fn window_dates_are_strictly_before_as_of() {
    let snap = seeded_snapshot();
    let stats = rolling_stats(&snap, 1, date(2024, 1, 10), 5);
    // The 01-10 game itself must not count toward its own decision date.
    assert_eq!(stats.games_in_window, 1);
    assert_eq!(stats.game_dates, vec![date(2024, 1, 5)]);
    for d in &stats.game_dates {
        assert!(*d < stats.as_of_date);
    }
}

#[test]
fn empty_history_is_zeroed_not_padded() {
    let snap = seeded_snapshot();
    let stats = rolling_stats(&snap, 2, date(2024, 1, 15), 5);
    assert_eq!(stats.games_in_window, 0);
    assert_eq!(stats.win_rate, 0.0);
    assert!(stats.game_dates.is_empty());
}

#[test]
fn closing_features_ignore_post_tipoff_snapshots() {
    let snap = seeded_snapshot();
    let game = snap
        .games
        .iter()
        .find(|g| g.game_id == "20240115-1-2")
        .unwrap();
    let model = NormalSpreadModel::default();

    let features = closing_line_features(&snap, game, &model);
    assert_eq!(features.spread_line, Some(-7.5));
    let expected = model.home_win_prob(-7.5);
    assert!((features.spread_implied_home_prob.unwrap() - expected).abs() < 1e-12);
    // No total or moneyline snapshots exist; absence stays absent.
    assert!(features.total_line.is_none());
    assert!(features.moneyline_home_prob.is_none());
}

#[test]
fn opening_and_closing_pick_the_history_endpoints() {
    let snap = seeded_snapshot();
    let game = snap
        .games
        .iter()
        .find(|g| g.game_id == "20240115-1-2")
        .unwrap();

    let open = opening_snapshot(&snap, game, Market::Spread, Period::FullGame).unwrap();
    assert_eq!(open.line, -5.5);
    let close = closing_snapshot(&snap, game, Market::Spread, Period::FullGame).unwrap();
    assert_eq!(close.line, -7.5);
}

#[test]
fn feature_cache_hits_on_repeat_requests() {
    let snap = seeded_snapshot();
    let mut cache = FeatureCache::new();

    let first = cache.rolling_stats(&snap, 1, date(2024, 1, 15), 5);
    let second = cache.rolling_stats(&snap, 1, date(2024, 1, 15), 5);
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);

    cache.rolling_stats(&snap, 1, date(2024, 1, 15), 3);
    assert_eq!(cache.len(), 2);
}
