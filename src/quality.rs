use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::builder::parse_feed_datetime;
use crate::entities::Period;
use crate::feed::{RawBatch, RawGameRow, RawOddsRow, RawRatingRow, RawScoreRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Rejects the whole batch.
    Blocking,
    /// Allows ingestion but is reported and logged.
    Warning,
}

/// One rule violation, attributed to a named rule and the rows that hit it.
/// Owned strings throughout; violations are persisted as batch-audit JSON
/// and read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub row_indices: Vec<usize>,
}

impl Violation {
    fn blocking(rule: &str, message: String, rows: Vec<usize>) -> Violation {
        Violation {
            rule: rule.to_string(),
            severity: Severity::Blocking,
            message,
            row_indices: rows,
        }
    }

    fn warning(rule: &str, message: String, rows: Vec<usize>) -> Violation {
        Violation {
            rule: rule.to_string(),
            severity: Severity::Warning,
            message,
            row_indices: rows,
        }
    }
}

/// Per-rule bounds. Rules read their thresholds from here so a league with
/// different score physics reconfigures the gate instead of editing rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Upper bound for a plausible single-team final score.
    pub max_score: u32,
    /// Spread magnitudes above this are suspicious but not impossible.
    pub spread_warn_magnitude: f64,
    /// Spread magnitudes above this are rejected outright.
    pub spread_block_magnitude: f64,
    /// Total lines outside [min, max] are rejected.
    pub total_line_bounds: (f64, f64),
    /// Efficiency ratings outside [0, max] draw a warning.
    pub max_rating: f64,
    /// Plausible possessions-per-40 band.
    pub tempo_bounds: (f64, f64),
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_score: 200,
            spread_warn_magnitude: 50.0,
            spread_block_magnitude: 90.0,
            total_line_bounds: (80.0, 250.0),
            max_rating: 200.0,
            tempo_bounds: (50.0, 90.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub entity_kind: String,
    pub rows_checked: usize,
    pub blocking: Vec<Violation>,
    pub warnings: Vec<Violation>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.blocking.is_empty()
    }
}

/// Validate a raw batch before the builder sees it. Every rule is named and
/// independent; one blocking violation rejects the entire batch and nothing
/// here ever substitutes a value for a failing field.
pub fn validate(batch: &RawBatch, cfg: &GateConfig) -> GateReport {
    let (kind, violations) = match batch {
        RawBatch::Games(rows) => ("game", validate_games(rows)),
        RawBatch::Scores(rows) => ("score", validate_scores(rows, cfg)),
        RawBatch::Odds(rows) => ("odds", validate_odds(rows, cfg)),
        RawBatch::Ratings(rows) => ("rating", validate_ratings(rows, cfg)),
    };

    let (blocking, warnings): (Vec<_>, Vec<_>) = violations
        .into_iter()
        .partition(|v| v.severity == Severity::Blocking);

    GateReport {
        entity_kind: kind.to_string(),
        rows_checked: batch.len(),
        blocking,
        warnings,
    }
}

fn validate_games(rows: &[RawGameRow]) -> Vec<Violation> {
    let mut out = Vec::new();
    out.extend(rule_names_present(rows.iter().enumerate().map(|(i, r)| {
        (i, r.home_name.as_str(), r.away_name.as_str())
    })));

    let bad_tipoffs: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| parse_feed_datetime(&r.tipoff).is_err())
        .map(|(i, _)| i)
        .collect();
    if !bad_tipoffs.is_empty() {
        out.push(Violation::blocking(
            "tipoff_parseable",
            format!("{} rows with unparseable tipoff timestamps", bad_tipoffs.len()),
            bad_tipoffs,
        ));
    }
    out
}

fn validate_scores(rows: &[RawScoreRow], cfg: &GateConfig) -> Vec<Violation> {
    let mut out = Vec::new();
    out.extend(rule_names_present(rows.iter().enumerate().map(|(i, r)| {
        (i, r.home_name.as_str(), r.away_name.as_str())
    })));

    let negative: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.home_score < 0
                || r.away_score < 0
                || r.home_h1.map_or(false, |v| v < 0)
                || r.away_h1.map_or(false, |v| v < 0)
        })
        .map(|(i, _)| i)
        .collect();
    if !negative.is_empty() {
        out.push(Violation::blocking(
            "score_bounds",
            format!("{} rows with negative scores", negative.len()),
            negative,
        ));
    }

    let implausible: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.home_score > cfg.max_score as i64 || r.away_score > cfg.max_score as i64
        })
        .map(|(i, _)| i)
        .collect();
    if !implausible.is_empty() {
        out.push(Violation::blocking(
            "score_bounds",
            format!(
                "{} rows with scores above {}",
                implausible.len(),
                cfg.max_score
            ),
            implausible,
        ));
    }

    // Home result implies away result; a lone half score is a feed defect.
    let unpaired: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.home_h1.is_some() != r.away_h1.is_some())
        .map(|(i, _)| i)
        .collect();
    if !unpaired.is_empty() {
        out.push(Violation::blocking(
            "half_scores_paired",
            format!("{} rows with only one first-half score", unpaired.len()),
            unpaired,
        ));
    }

    let h1_exceeds: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            let home_bad = matches!(r.home_h1, Some(h1) if h1 > r.home_score);
            let away_bad = matches!(r.away_h1, Some(h1) if h1 > r.away_score);
            home_bad || away_bad
        })
        .map(|(i, _)| i)
        .collect();
    if !h1_exceeds.is_empty() {
        out.push(Violation::warning(
            "half_not_exceeding_final",
            format!("{} rows where a half score exceeds the final", h1_exceeds.len()),
            h1_exceeds,
        ));
    }

    let dupes = duplicate_rows(rows.iter().map(|r| {
        (
            r.date.trim().to_string(),
            r.home_name.trim().to_lowercase(),
            r.away_name.trim().to_lowercase(),
        )
    }));
    if !dupes.is_empty() {
        out.push(Violation::blocking(
            "duplicate_natural_key",
            format!("{} duplicate (date, home, away) rows", dupes.len()),
            dupes,
        ));
    }
    out
}

fn validate_odds(rows: &[RawOddsRow], cfg: &GateConfig) -> Vec<Violation> {
    let mut out = Vec::new();
    out.extend(rule_names_present(rows.iter().enumerate().map(|(i, r)| {
        (i, r.home_name.as_str(), r.away_name.as_str())
    })));

    // American prices live outside (-100, 100) by construction.
    let bad_prices: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.price_a.abs() < 100 || r.price_b.abs() < 100)
        .map(|(i, _)| i)
        .collect();
    if !bad_prices.is_empty() {
        out.push(Violation::blocking(
            "price_plausible",
            format!("{} rows with impossible american prices", bad_prices.len()),
            bad_prices,
        ));
    }

    let is_spread = |r: &RawOddsRow| r.market.trim().eq_ignore_ascii_case("spread");
    let is_total = |r: &RawOddsRow| r.market.trim().eq_ignore_ascii_case("total");

    let blocked_spreads: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            is_spread(r) && r.line.map_or(false, |l| l.abs() > cfg.spread_block_magnitude)
        })
        .map(|(i, _)| i)
        .collect();
    if !blocked_spreads.is_empty() {
        out.push(Violation::blocking(
            "spread_magnitude",
            format!(
                "{} spreads beyond +/-{}",
                blocked_spreads.len(),
                cfg.spread_block_magnitude
            ),
            blocked_spreads,
        ));
    }

    let wide_spreads: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            is_spread(r)
                && r.line.map_or(false, |l| {
                    l.abs() > cfg.spread_warn_magnitude && l.abs() <= cfg.spread_block_magnitude
                })
        })
        .map(|(i, _)| i)
        .collect();
    if !wide_spreads.is_empty() {
        out.push(Violation::warning(
            "spread_magnitude",
            format!(
                "{} spreads beyond +/-{}",
                wide_spreads.len(),
                cfg.spread_warn_magnitude
            ),
            wide_spreads,
        ));
    }

    // First-half totals run at roughly half the full-game band.
    let total_bounds = |r: &RawOddsRow| {
        let (lo, hi) = cfg.total_line_bounds;
        match r.period.as_deref().and_then(Period::parse) {
            Some(Period::FirstHalf) => (lo / 2.0, hi / 2.0),
            _ => (lo, hi),
        }
    };
    let bad_totals: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            let (lo, hi) = total_bounds(r);
            is_total(r) && r.line.map_or(false, |l| l < lo || l > hi)
        })
        .map(|(i, _)| i)
        .collect();
    let (lo, hi) = cfg.total_line_bounds;
    if !bad_totals.is_empty() {
        out.push(Violation::blocking(
            "total_line_bounds",
            format!("{} total lines outside [{lo}, {hi}]", bad_totals.len()),
            bad_totals,
        ));
    }

    // Snapshots observed after the scheduled start are suspicious: they may
    // be in-play prices a pre-game pipeline must not consume.
    let late: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            match (
                parse_feed_datetime(&r.observed_at),
                parse_feed_datetime(&r.commence_time),
            ) {
                (Ok(obs), Ok(start)) => obs > start,
                _ => false,
            }
        })
        .map(|(i, _)| i)
        .collect();
    if !late.is_empty() {
        out.push(Violation::warning(
            "observed_before_start",
            format!("{} snapshots observed after scheduled start", late.len()),
            late,
        ));
    }

    let dupes = duplicate_rows(rows.iter().map(|r| {
        (
            r.event_id.trim().to_string(),
            r.market.trim().to_lowercase(),
            r.period.clone().unwrap_or_default(),
            r.observed_at.trim().to_string(),
            r.source.trim().to_lowercase(),
        )
    }));
    if !dupes.is_empty() {
        out.push(Violation::blocking(
            "duplicate_natural_key",
            format!("{} duplicate odds snapshots", dupes.len()),
            dupes,
        ));
    }
    out
}

fn validate_ratings(rows: &[RawRatingRow], cfg: &GateConfig) -> Vec<Violation> {
    let mut out = Vec::new();

    let blank: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.team_name.trim().is_empty())
        .map(|(i, _)| i)
        .collect();
    if !blank.is_empty() {
        out.push(Violation::blocking(
            "names_present",
            format!("{} rows with blank team names", blank.len()),
            blank,
        ));
    }

    let out_of_range: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.adj_o < 0.0 || r.adj_o > cfg.max_rating || r.adj_d < 0.0 || r.adj_d > cfg.max_rating
        })
        .map(|(i, _)| i)
        .collect();
    if !out_of_range.is_empty() {
        out.push(Violation::warning(
            "rating_bounds",
            format!(
                "{} rows with efficiency outside [0, {}]",
                out_of_range.len(),
                cfg.max_rating
            ),
            out_of_range,
        ));
    }

    // Missing barthag is tolerated but reported; nothing substitutes one.
    let no_barthag: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.barthag.is_none())
        .map(|(i, _)| i)
        .collect();
    if !no_barthag.is_empty() {
        out.push(Violation::warning(
            "barthag_present",
            format!("{} rows without a barthag rating", no_barthag.len()),
            no_barthag,
        ));
    }

    let (tlo, thi) = cfg.tempo_bounds;
    let bad_tempo: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.tempo < tlo || r.tempo > thi)
        .map(|(i, _)| i)
        .collect();
    if !bad_tempo.is_empty() {
        out.push(Violation::warning(
            "tempo_bounds",
            format!("{} rows with tempo outside [{tlo}, {thi}]", bad_tempo.len()),
            bad_tempo,
        ));
    }

    // Exactly one authoritative snapshot per (team, season).
    let dupes = duplicate_rows(
        rows.iter()
            .map(|r| (r.team_name.trim().to_lowercase(), r.season)),
    );
    if !dupes.is_empty() {
        out.push(Violation::blocking(
            "one_snapshot_per_team_season",
            format!("{} duplicate (team, season) rating rows", dupes.len()),
            dupes,
        ));
    }
    out
}

fn rule_names_present<'a>(
    rows: impl Iterator<Item = (usize, &'a str, &'a str)>,
) -> Option<Violation> {
    let blank: Vec<usize> = rows
        .filter(|(_, home, away)| home.trim().is_empty() || away.trim().is_empty())
        .map(|(i, _, _)| i)
        .collect();
    if blank.is_empty() {
        None
    } else {
        Some(Violation::blocking(
            "names_present",
            format!("{} rows with blank team names", blank.len()),
            blank,
        ))
    }
}

fn duplicate_rows<K: std::hash::Hash + Eq>(keys: impl Iterator<Item = K>) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut dupes = Vec::new();
    for (idx, key) in keys.enumerate() {
        if !seen.insert(key) {
            dupes.push(idx);
        }
    }
    dupes
}
