use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Curated canonical team. Read-only to the pipeline; alias curation happens
/// offline and lands here through the team directory load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub team_id: u32,
    pub canonical_name: String,
    /// Permanently blocked from resolution (non Division-I program).
    pub non_major: bool,
}

/// One curated alias. `source` scopes the alias to a single feed; `None`
/// makes it usable from any feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamAlias {
    pub alias: String,
    pub source: Option<String>,
    pub team_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    Spread,
    Total,
    Moneyline,
}

impl Market {
    pub fn as_str(self) -> &'static str {
        match self {
            Market::Spread => "spread",
            Market::Total => "total",
            Market::Moneyline => "moneyline",
        }
    }

    pub fn parse(raw: &str) -> Option<Market> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "spread" | "spreads" => Some(Market::Spread),
            "total" | "totals" => Some(Market::Total),
            "moneyline" | "ml" | "h2h" => Some(Market::Moneyline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    FullGame,
    FirstHalf,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::FullGame => "full",
            Period::FirstHalf => "1h",
        }
    }

    pub fn parse(raw: &str) -> Option<Period> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" | "fg" | "game" => Some(Period::FullGame),
            "1h" | "h1" | "first_half" => Some(Period::FirstHalf),
            _ => None,
        }
    }
}

/// Canonical game. `date` is the normalized UTC calendar date and `season`
/// is stamped once by the season calendar at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    /// Date string exactly as the feed delivered it, kept for provenance.
    pub raw_date: String,
    pub date: NaiveDate,
    pub tipoff: NaiveDateTime,
    pub season: i32,
    pub home_team_id: u32,
    pub away_team_id: u32,
}

impl Game {
    /// Natural key: one game per (date, home, away).
    pub fn natural_key(&self) -> (NaiveDate, u32, u32) {
        (self.date, self.home_team_id, self.away_team_id)
    }
}

/// One market observation. Opening and closing are roles derived from
/// `observed_at` ordering relative to tipoff, not separate entity types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub game_id: String,
    pub market: Market,
    pub period: Period,
    /// Spread/total line; 0.0 for moneyline rows.
    pub line: f64,
    /// American price on home/over.
    pub price_a: i32,
    /// American price on away/under.
    pub price_b: i32,
    pub observed_at: NaiveDateTime,
    pub source: String,
}

impl OddsSnapshot {
    pub fn natural_key(&self) -> (String, Market, Period, NaiveDateTime, String) {
        (
            self.game_id.clone(),
            self.market,
            self.period,
            self.observed_at,
            self.source.clone(),
        )
    }
}

/// Final score for a game. First-half scores are present together or not at
/// all; the quality gate enforces the pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub game_id: String,
    pub home_score: u32,
    pub away_score: u32,
    pub home_h1: Option<u32>,
    pub away_h1: Option<u32>,
}

impl ScoreResult {
    pub fn margin(&self) -> i32 {
        self.home_score as i32 - self.away_score as i32
    }

    pub fn total(&self) -> u32 {
        self.home_score + self.away_score
    }

    pub fn h1_margin(&self) -> Option<i32> {
        match (self.home_h1, self.away_h1) {
            (Some(h), Some(a)) => Some(h as i32 - a as i32),
            _ => None,
        }
    }
}

/// Authoritative end-of-season efficiency snapshot. Exactly one row per
/// (team_id, season); a season-S game may only consume the season S-1 row,
/// enforced by the point-in-time lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub team_id: u32,
    pub season: i32,
    /// Adjusted offensive efficiency (points per 100 possessions).
    pub adj_o: f64,
    /// Adjusted defensive efficiency.
    pub adj_d: f64,
    /// Possessions per 40 minutes.
    pub tempo: f64,
    /// Power rating in [0, 1]. Absent when the ratings feed did not carry
    /// it; absence is preserved, never encoded as a number.
    pub barthag: Option<f64>,
}

impl RatingSnapshot {
    pub fn natural_key(&self) -> (u32, i32) {
        (self.team_id, self.season)
    }

    pub fn net_rating(&self) -> f64 {
        self.adj_o - self.adj_d
    }
}

/// Entity kinds the ingestion pipeline moves in batches. One batch carries
/// exactly one kind; the quality gate picks its rule set from this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Game,
    Odds,
    Score,
    Rating,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Game => "game",
            EntityKind::Odds => "odds",
            EntityKind::Score => "score",
            EntityKind::Rating => "rating",
        }
    }
}
