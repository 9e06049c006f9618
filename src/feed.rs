use serde::{Deserialize, Serialize};

use crate::entities::EntityKind;

/// Raw odds observation as delivered by a collector. Names are free text;
/// nothing downstream of the builder ever sees these shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOddsRow {
    pub event_id: String,
    /// Scheduled UTC start of the event; ties the snapshot to a game day.
    pub commence_time: String,
    pub home_name: String,
    pub away_name: String,
    pub market: String,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub line: Option<f64>,
    pub price_a: i32,
    pub price_b: i32,
    /// RFC 3339 / ISO-ish UTC timestamp.
    pub observed_at: String,
    pub source: String,
}

/// Raw final-score row from a score feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScoreRow {
    pub date: String,
    pub home_name: String,
    pub away_name: String,
    pub home_score: i64,
    pub away_score: i64,
    #[serde(default)]
    pub home_h1: Option<i64>,
    #[serde(default)]
    pub away_h1: Option<i64>,
    pub source: String,
}

/// Raw schedule row; the builder derives game ids and seasons from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawGameRow {
    pub date: String,
    /// UTC tipoff, RFC 3339 / ISO-ish.
    pub tipoff: String,
    pub home_name: String,
    pub away_name: String,
    pub source: String,
}

/// Raw season-rating row from a ratings feed. A feed that omits `barthag`
/// yields `None`; no stand-in number is ever invented for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRatingRow {
    pub team_name: String,
    pub season: i32,
    pub adj_o: f64,
    pub adj_d: f64,
    pub tempo: f64,
    #[serde(default)]
    pub barthag: Option<f64>,
    pub source: String,
}

/// Closed set of raw batch shapes, one per canonical entity kind. Collectors
/// hand the core exactly one of these per ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum RawBatch {
    Games(Vec<RawGameRow>),
    Odds(Vec<RawOddsRow>),
    Scores(Vec<RawScoreRow>),
    Ratings(Vec<RawRatingRow>),
}

impl RawBatch {
    pub fn kind(&self) -> EntityKind {
        match self {
            RawBatch::Games(_) => EntityKind::Game,
            RawBatch::Odds(_) => EntityKind::Odds,
            RawBatch::Scores(_) => EntityKind::Score,
            RawBatch::Ratings(_) => EntityKind::Rating,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RawBatch::Games(rows) => rows.len(),
            RawBatch::Odds(rows) => rows.len(),
            RawBatch::Scores(rows) => rows.len(),
            RawBatch::Ratings(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
