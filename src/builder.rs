use std::collections::HashSet;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::entities::{Game, Market, OddsSnapshot, Period, RatingSnapshot, ScoreResult};
use crate::feed::{RawGameRow, RawOddsRow, RawRatingRow, RawScoreRow};
use crate::resolver::{ResolutionStep, ResolveOutcome, TeamDirectory};
use crate::season::season_of;

/// Resolution provenance for one team-name field of one raw row. Owned
/// field name; audit rows are persisted as JSON and read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldResolution {
    pub field: String,
    pub raw_value: String,
    pub team_id: u32,
    pub step: ResolutionStep,
}

/// One audit line per input row, pass or fail. Persisted with the batch so
/// a rejected ingestion can be replayed against the exact offending values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub row_index: usize,
    pub passed: bool,
    pub reason: Option<String>,
    pub resolutions: Vec<FieldResolution>,
}

/// A name the resolver could not place, kept for manual curation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnresolvedName {
    pub raw_name: String,
    pub source: String,
    pub non_major: bool,
}

/// Builder output for one batch. `rows` only carries rows whose audit line
/// passed; any failure leaves the batch unfit to commit.
#[derive(Debug, Clone)]
pub struct BuildOutcome<T> {
    pub rows: Vec<T>,
    pub audit: Vec<AuditRow>,
    pub unresolved: Vec<UnresolvedName>,
}

impl<T> BuildOutcome<T> {
    pub fn failed_rows(&self) -> usize {
        self.audit.iter().filter(|a| !a.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed_rows() == 0
    }

    pub fn failure_reasons(&self) -> Vec<String> {
        self.audit
            .iter()
            .filter(|a| !a.passed)
            .map(|a| {
                format!(
                    "row {}: {}",
                    a.row_index,
                    a.reason.as_deref().unwrap_or("unknown")
                )
            })
            .collect()
    }
}

/// Deterministic canonical game id from the natural key. Every feed that can
/// name a game day and both teams derives the same id, which is what lets
/// odds, scores, and schedule rows meet without a provider-id mapping table.
pub fn canonical_game_id(date: NaiveDate, home_team_id: u32, away_team_id: u32) -> String {
    format!(
        "{}-{home_team_id}-{away_team_id}",
        date.format("%Y%m%d")
    )
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Normalize a feed date string to the reference calendar (UTC dates).
pub fn parse_feed_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(date);
        }
    }
    // Timestamps occasionally show up in date fields; take their date part.
    parse_feed_datetime(trimmed)
        .map(|dt| dt.date())
        .map_err(|_| anyhow!("unparseable date: '{raw}'"))
}

pub fn parse_feed_datetime(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }
    Err(anyhow!("unparseable timestamp: '{raw}'"))
}

/// Canonical Entity Builder. Holds only a borrowed, immutable directory;
/// building is pure per batch and never touches the store.
pub struct EntityBuilder<'a> {
    directory: &'a TeamDirectory,
}

enum FieldOutcome {
    Ok(FieldResolution),
    Blocked { reason: String, name: UnresolvedName },
}

impl<'a> EntityBuilder<'a> {
    pub fn new(directory: &'a TeamDirectory) -> Self {
        Self { directory }
    }

    fn resolve_field(&self, field: &'static str, raw_name: &str, source: &str) -> FieldOutcome {
        match self.directory.resolve(raw_name, source) {
            ResolveOutcome::Resolved(res) => FieldOutcome::Ok(FieldResolution {
                field: field.to_string(),
                raw_value: raw_name.to_string(),
                team_id: res.team_id,
                step: res.step,
            }),
            ResolveOutcome::NonMajor { raw_name } => FieldOutcome::Blocked {
                reason: format!("{field}: non-major team '{raw_name}'"),
                name: UnresolvedName {
                    raw_name,
                    source: source.to_string(),
                    non_major: true,
                },
            },
            ResolveOutcome::Unresolved { raw_name } => FieldOutcome::Blocked {
                reason: format!("{field}: unresolved team name '{raw_name}'"),
                name: UnresolvedName {
                    raw_name,
                    source: source.to_string(),
                    non_major: false,
                },
            },
        }
    }

    /// Resolve the home/away pair shared by every two-team row shape.
    /// Records blocked names for curation and rejects a matchup whose sides
    /// resolve to the same team.
    fn resolve_matchup(
        &self,
        home_name: &str,
        away_name: &str,
        source: &str,
        resolutions: &mut Vec<FieldResolution>,
        unresolved: &mut Vec<UnresolvedName>,
    ) -> Result<(u32, u32), String> {
        let home = match self.resolve_field("home_name", home_name, source) {
            FieldOutcome::Ok(r) => r,
            FieldOutcome::Blocked { reason, name } => {
                unresolved.push(name);
                return Err(reason);
            }
        };
        resolutions.push(home.clone());

        let away = match self.resolve_field("away_name", away_name, source) {
            FieldOutcome::Ok(r) => r,
            FieldOutcome::Blocked { reason, name } => {
                unresolved.push(name);
                return Err(reason);
            }
        };
        resolutions.push(away.clone());

        if home.team_id == away.team_id {
            return Err(format!(
                "home and away resolve to the same team: '{home_name}' / '{away_name}'"
            ));
        }
        Ok((home.team_id, away.team_id))
    }

    pub fn build_games(&self, rows: &[RawGameRow]) -> BuildOutcome<Game> {
        let mut out = BuildOutcome {
            rows: Vec::with_capacity(rows.len()),
            audit: Vec::with_capacity(rows.len()),
            unresolved: Vec::new(),
        };
        let mut seen_keys = HashSet::new();

        for (idx, row) in rows.iter().enumerate() {
            let mut resolutions = Vec::new();
            let mut reason: Option<String> = None;
            let mut home_id = 0u32;
            let mut away_id = 0u32;

            match self.resolve_matchup(
                &row.home_name,
                &row.away_name,
                &row.source,
                &mut resolutions,
                &mut out.unresolved,
            ) {
                Ok((h, a)) => {
                    home_id = h;
                    away_id = a;
                }
                Err(r) => reason = Some(r),
            }

            let date = if reason.is_none() {
                match parse_feed_date(&row.date) {
                    Ok(d) => Some(d),
                    Err(err) => {
                        reason = Some(err.to_string());
                        None
                    }
                }
            } else {
                None
            };
            let tipoff = if reason.is_none() {
                match parse_feed_datetime(&row.tipoff) {
                    Ok(dt) => Some(dt),
                    Err(err) => {
                        reason = Some(err.to_string());
                        None
                    }
                }
            } else {
                None
            };

            if reason.is_none() {
                let date = date.unwrap_or_default();
                if !seen_keys.insert((date, home_id, away_id)) {
                    reason = Some(format!("duplicate game key: {date} {home_id} vs {away_id}"));
                } else {
                    out.rows.push(Game {
                        game_id: canonical_game_id(date, home_id, away_id),
                        raw_date: row.date.clone(),
                        date,
                        tipoff: tipoff.unwrap_or_default(),
                        season: season_of(date),
                        home_team_id: home_id,
                        away_team_id: away_id,
                    });
                }
            }

            let passed = reason.is_none();
            out.audit.push(AuditRow {
                row_index: idx,
                passed,
                reason,
                resolutions,
            });
        }
        out
    }

    pub fn build_scores(&self, rows: &[RawScoreRow]) -> BuildOutcome<ScoreResult> {
        let mut out = BuildOutcome {
            rows: Vec::with_capacity(rows.len()),
            audit: Vec::with_capacity(rows.len()),
            unresolved: Vec::new(),
        };
        let mut seen_keys = HashSet::new();

        for (idx, row) in rows.iter().enumerate() {
            let mut resolutions = Vec::new();
            let mut reason: Option<String> = None;
            let mut home_id = 0u32;
            let mut away_id = 0u32;

            match self.resolve_matchup(
                &row.home_name,
                &row.away_name,
                &row.source,
                &mut resolutions,
                &mut out.unresolved,
            ) {
                Ok((h, a)) => {
                    home_id = h;
                    away_id = a;
                }
                Err(r) => reason = Some(r),
            }

            let date = if reason.is_none() {
                match parse_feed_date(&row.date) {
                    Ok(d) => Some(d),
                    Err(err) => {
                        reason = Some(err.to_string());
                        None
                    }
                }
            } else {
                None
            };

            if reason.is_none() && (row.home_score < 0 || row.away_score < 0) {
                reason = Some("negative final score".to_string());
            }
            if reason.is_none()
                && (row.home_h1.map_or(false, |v| v < 0) || row.away_h1.map_or(false, |v| v < 0))
            {
                reason = Some("negative first-half score".to_string());
            }

            if reason.is_none() {
                let date = date.unwrap_or_default();
                let game_id = canonical_game_id(date, home_id, away_id);
                if !seen_keys.insert(game_id.clone()) {
                    reason = Some(format!("duplicate score key: {game_id}"));
                } else {
                    out.rows.push(ScoreResult {
                        game_id,
                        home_score: row.home_score as u32,
                        away_score: row.away_score as u32,
                        home_h1: row.home_h1.map(|v| v as u32),
                        away_h1: row.away_h1.map(|v| v as u32),
                    });
                }
            }

            let passed = reason.is_none();
            out.audit.push(AuditRow {
                row_index: idx,
                passed,
                reason,
                resolutions,
            });
        }
        out
    }

    pub fn build_odds(&self, rows: &[RawOddsRow]) -> BuildOutcome<OddsSnapshot> {
        let mut out = BuildOutcome {
            rows: Vec::with_capacity(rows.len()),
            audit: Vec::with_capacity(rows.len()),
            unresolved: Vec::new(),
        };
        let mut seen_keys = HashSet::new();

        for (idx, row) in rows.iter().enumerate() {
            let mut resolutions = Vec::new();
            let mut reason: Option<String> = None;
            let mut home_id = 0u32;
            let mut away_id = 0u32;

            match self.resolve_matchup(
                &row.home_name,
                &row.away_name,
                &row.source,
                &mut resolutions,
                &mut out.unresolved,
            ) {
                Ok((h, a)) => {
                    home_id = h;
                    away_id = a;
                }
                Err(r) => reason = Some(r),
            }

            let market = if reason.is_none() {
                match Market::parse(&row.market) {
                    Some(m) => Some(m),
                    None => {
                        reason = Some(format!("unknown market '{}'", row.market));
                        None
                    }
                }
            } else {
                None
            };
            let period = if reason.is_none() {
                match row.period.as_deref() {
                    None => Some(Period::FullGame),
                    Some(raw) => match Period::parse(raw) {
                        Some(p) => Some(p),
                        None => {
                            reason = Some(format!("unknown period '{raw}'"));
                            None
                        }
                    },
                }
            } else {
                None
            };

            if reason.is_none() && market != Some(Market::Moneyline) && row.line.is_none() {
                reason = Some(format!("{} row without a line", row.market));
            }

            let commence = if reason.is_none() {
                match parse_feed_datetime(&row.commence_time) {
                    Ok(dt) => Some(dt),
                    Err(err) => {
                        reason = Some(err.to_string());
                        None
                    }
                }
            } else {
                None
            };
            let observed_at = if reason.is_none() {
                match parse_feed_datetime(&row.observed_at) {
                    Ok(dt) => Some(dt),
                    Err(err) => {
                        reason = Some(err.to_string());
                        None
                    }
                }
            } else {
                None
            };

            if reason.is_none() {
                let commence = commence.unwrap_or_default();
                let observed_at = observed_at.unwrap_or_default();
                let market = market.unwrap_or(Market::Spread);
                let period = period.unwrap_or(Period::FullGame);
                let game_id = canonical_game_id(commence.date(), home_id, away_id);
                let key = (game_id.clone(), market, period, observed_at, row.source.clone());
                if !seen_keys.insert(key) {
                    reason = Some(format!(
                        "duplicate odds key: {game_id} {} {} @{observed_at}",
                        market.as_str(),
                        period.as_str()
                    ));
                } else {
                    out.rows.push(OddsSnapshot {
                        game_id,
                        market,
                        period,
                        line: row.line.unwrap_or(0.0),
                        price_a: row.price_a,
                        price_b: row.price_b,
                        observed_at,
                        source: row.source.clone(),
                    });
                }
            }

            let passed = reason.is_none();
            out.audit.push(AuditRow {
                row_index: idx,
                passed,
                reason,
                resolutions,
            });
        }
        out
    }

    pub fn build_ratings(&self, rows: &[RawRatingRow]) -> BuildOutcome<RatingSnapshot> {
        let mut out = BuildOutcome {
            rows: Vec::with_capacity(rows.len()),
            audit: Vec::with_capacity(rows.len()),
            unresolved: Vec::new(),
        };
        let mut seen_keys = HashSet::new();

        for (idx, row) in rows.iter().enumerate() {
            let mut resolutions = Vec::new();
            let mut reason: Option<String> = None;
            let mut team_id = 0u32;

            match self.resolve_field("team_name", &row.team_name, &row.source) {
                FieldOutcome::Ok(r) => {
                    team_id = r.team_id;
                    resolutions.push(r);
                }
                FieldOutcome::Blocked { reason: r, name } => {
                    out.unresolved.push(name);
                    reason = Some(r);
                }
            }

            if reason.is_none() && !seen_keys.insert((team_id, row.season)) {
                reason = Some(format!(
                    "duplicate rating key: team {team_id} season {}",
                    row.season
                ));
            }

            if reason.is_none() {
                out.rows.push(RatingSnapshot {
                    team_id,
                    season: row.season,
                    adj_o: row.adj_o,
                    adj_d: row.adj_d,
                    tempo: row.tempo,
                    barthag: row.barthag,
                });
            }

            let passed = reason.is_none();
            out.audit.push(AuditRow {
                row_index: idx,
                passed,
                reason,
                resolutions,
            });
        }
        out
    }
}
