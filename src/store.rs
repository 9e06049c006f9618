use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::builder::{AuditRow, EntityBuilder, UnresolvedName};
use crate::entities::{
    EntityKind, Game, Market, OddsSnapshot, Period, RatingSnapshot, ScoreResult,
};
use crate::feed::RawBatch;
use crate::quality::{validate, GateConfig, Violation};
use crate::resolver::TeamDirectory;

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Canonical store schema. Append-only by construction: no UPDATE statement
/// exists in this module; corrections arrive as new snapshot rows.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS games (
            game_id TEXT PRIMARY KEY,
            raw_date TEXT NOT NULL,
            date TEXT NOT NULL,
            tipoff TEXT NOT NULL,
            season INTEGER NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            UNIQUE(date, home_team_id, away_team_id)
        );
        CREATE INDEX IF NOT EXISTS idx_games_date ON games(date);
        CREATE INDEX IF NOT EXISTS idx_games_season ON games(season);

        CREATE TABLE IF NOT EXISTS odds_snapshots (
            snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id TEXT NOT NULL,
            market TEXT NOT NULL,
            period TEXT NOT NULL,
            line REAL NOT NULL,
            price_a INTEGER NOT NULL,
            price_b INTEGER NOT NULL,
            observed_at TEXT NOT NULL,
            source TEXT NOT NULL,
            UNIQUE(game_id, market, period, observed_at, source)
        );
        CREATE INDEX IF NOT EXISTS idx_odds_game ON odds_snapshots(game_id);

        CREATE TABLE IF NOT EXISTS score_results (
            game_id TEXT PRIMARY KEY,
            home_score INTEGER NOT NULL,
            away_score INTEGER NOT NULL,
            home_h1 INTEGER NULL,
            away_h1 INTEGER NULL
        );

        CREATE TABLE IF NOT EXISTS rating_snapshots (
            team_id INTEGER NOT NULL,
            season INTEGER NOT NULL,
            adj_o REAL NOT NULL,
            adj_d REAL NOT NULL,
            tempo REAL NOT NULL,
            barthag REAL NULL,
            PRIMARY KEY (team_id, season)
        );

        CREATE TABLE IF NOT EXISTS ingest_batches (
            batch_id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_kind TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            rows_in INTEGER NOT NULL,
            accepted INTEGER NOT NULL,
            committed INTEGER NOT NULL,
            blocking_json TEXT NOT NULL,
            warnings_json TEXT NOT NULL,
            audit_json TEXT NOT NULL,
            unresolved_json TEXT NOT NULL
        );
        "#,
    )
    .context("create canonical store schema")?;
    Ok(())
}

/// Per-batch ingestion result handed back to the collector. A rejected batch
/// commits zero rows; `blocking` plus `builder_failures` itemize why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub batch_id: i64,
    pub entity_kind: EntityKind,
    pub rows_in: usize,
    pub accepted: usize,
    pub committed: bool,
    pub blocking: Vec<Violation>,
    pub builder_failures: Vec<String>,
    pub warnings: Vec<Violation>,
    pub audit: Vec<AuditRow>,
    pub unresolved: Vec<UnresolvedName>,
}

/// Monotone identifier of the store's committed state. Derived features are
/// cached against this value; appends bump it, nothing ever rewinds it.
pub fn store_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM ingest_batches WHERE committed = 1",
        [],
        |row| row.get(0),
    )
    .context("query store version")
}

/// Run one raw batch through gate -> builder -> all-or-nothing commit.
///
/// The write transaction is opened `Immediate`, which gives the exclusive
/// one-writer-per-run semantics the store relies on instead of row locking.
pub fn ingest_batch(
    conn: &mut Connection,
    directory: &TeamDirectory,
    batch: &RawBatch,
    cfg: &GateConfig,
) -> Result<IngestReport> {
    let started_at = Utc::now().to_rfc3339();
    let kind = batch.kind();
    let gate = validate(batch, cfg);

    if !gate.passed() {
        warn!(
            kind = kind.as_str(),
            blocking = gate.blocking.len(),
            "quality gate rejected batch"
        );
        return record_batch(
            conn,
            IngestReport {
                batch_id: 0,
                entity_kind: kind,
                rows_in: batch.len(),
                accepted: 0,
                committed: false,
                blocking: gate.blocking,
                builder_failures: Vec::new(),
                warnings: gate.warnings,
                audit: Vec::new(),
                unresolved: Vec::new(),
            },
            &started_at,
        );
    }

    let builder = EntityBuilder::new(directory);
    let (accepted, builder_failures, audit, unresolved, commit) = match batch {
        RawBatch::Games(rows) => {
            let out = builder.build_games(rows);
            let ok = out.all_passed();
            let failures = out.failure_reasons();
            let commit: CommitRows = CommitRows::Games(out.rows);
            (ok, failures, out.audit, out.unresolved, commit)
        }
        RawBatch::Scores(rows) => {
            let out = builder.build_scores(rows);
            let ok = out.all_passed();
            let failures = out.failure_reasons();
            let commit = CommitRows::Scores(out.rows);
            (ok, failures, out.audit, out.unresolved, commit)
        }
        RawBatch::Odds(rows) => {
            let out = builder.build_odds(rows);
            let ok = out.all_passed();
            let failures = out.failure_reasons();
            let commit = CommitRows::Odds(out.rows);
            (ok, failures, out.audit, out.unresolved, commit)
        }
        RawBatch::Ratings(rows) => {
            let out = builder.build_ratings(rows);
            let ok = out.all_passed();
            let failures = out.failure_reasons();
            let commit = CommitRows::Ratings(out.rows);
            (ok, failures, out.audit, out.unresolved, commit)
        }
    };

    if !accepted {
        warn!(
            kind = kind.as_str(),
            failures = builder_failures.len(),
            unresolved = unresolved.len(),
            "entity builder rejected batch"
        );
        return record_batch(
            conn,
            IngestReport {
                batch_id: 0,
                entity_kind: kind,
                rows_in: batch.len(),
                accepted: 0,
                committed: false,
                blocking: Vec::new(),
                builder_failures,
                warnings: gate.warnings,
                audit,
                unresolved,
            },
            &started_at,
        );
    }

    let row_count = commit.len();
    let duplicate = {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin ingest transaction")?;
        let duplicates = commit.duplicates_against_store(&tx)?;
        if duplicates.is_empty() {
            commit.insert_all(&tx)?;
            tx.commit().context("commit ingest transaction")?;
            None
        } else {
            // Existing rows are never overwritten; the whole batch bounces.
            Some(duplicates)
        }
    };

    if let Some(duplicates) = duplicate {
        warn!(
            kind = kind.as_str(),
            duplicates = duplicates.len(),
            "batch collides with already-ingested natural keys"
        );
        return record_batch(
            conn,
            IngestReport {
                batch_id: 0,
                entity_kind: kind,
                rows_in: batch.len(),
                accepted: 0,
                committed: false,
                blocking: Vec::new(),
                builder_failures: duplicates
                    .into_iter()
                    .map(|key| format!("duplicate of stored record: {key}"))
                    .collect(),
                warnings: gate.warnings,
                audit,
                unresolved,
            },
            &started_at,
        );
    }

    info!(kind = kind.as_str(), accepted = row_count, "batch committed");
    record_batch(
        conn,
        IngestReport {
            batch_id: 0,
            entity_kind: kind,
            rows_in: batch.len(),
            accepted: row_count,
            committed: true,
            blocking: Vec::new(),
            builder_failures: Vec::new(),
            warnings: gate.warnings,
            audit,
            unresolved,
        },
        &started_at,
    )
}

enum CommitRows {
    Games(Vec<Game>),
    Scores(Vec<ScoreResult>),
    Odds(Vec<OddsSnapshot>),
    Ratings(Vec<RatingSnapshot>),
}

impl CommitRows {
    fn len(&self) -> usize {
        match self {
            CommitRows::Games(rows) => rows.len(),
            CommitRows::Scores(rows) => rows.len(),
            CommitRows::Odds(rows) => rows.len(),
            CommitRows::Ratings(rows) => rows.len(),
        }
    }

    fn duplicates_against_store(&self, tx: &rusqlite::Transaction<'_>) -> Result<Vec<String>> {
        let mut dupes = Vec::new();
        match self {
            CommitRows::Games(rows) => {
                let mut stmt = tx.prepare("SELECT 1 FROM games WHERE game_id = ?1")?;
                for game in rows {
                    if stmt.exists(params![game.game_id])? {
                        dupes.push(format!("game {}", game.game_id));
                    }
                }
            }
            CommitRows::Scores(rows) => {
                let mut stmt = tx.prepare("SELECT 1 FROM score_results WHERE game_id = ?1")?;
                for score in rows {
                    if stmt.exists(params![score.game_id])? {
                        dupes.push(format!("score {}", score.game_id));
                    }
                }
            }
            CommitRows::Odds(rows) => {
                let mut stmt = tx.prepare(
                    "SELECT 1 FROM odds_snapshots
                     WHERE game_id = ?1 AND market = ?2 AND period = ?3
                       AND observed_at = ?4 AND source = ?5",
                )?;
                for snap in rows {
                    if stmt.exists(params![
                        snap.game_id,
                        snap.market.as_str(),
                        snap.period.as_str(),
                        fmt_datetime(snap.observed_at),
                        snap.source
                    ])? {
                        dupes.push(format!(
                            "odds {} {} {} @{}",
                            snap.game_id,
                            snap.market.as_str(),
                            snap.period.as_str(),
                            snap.observed_at
                        ));
                    }
                }
            }
            CommitRows::Ratings(rows) => {
                let mut stmt = tx.prepare(
                    "SELECT 1 FROM rating_snapshots WHERE team_id = ?1 AND season = ?2",
                )?;
                for rating in rows {
                    if stmt.exists(params![rating.team_id, rating.season])? {
                        dupes.push(format!(
                            "rating team {} season {}",
                            rating.team_id, rating.season
                        ));
                    }
                }
            }
        }
        Ok(dupes)
    }

    fn insert_all(&self, tx: &rusqlite::Transaction<'_>) -> Result<()> {
        match self {
            CommitRows::Games(rows) => {
                let mut stmt = tx.prepare(
                    "INSERT INTO games (game_id, raw_date, date, tipoff, season, home_team_id, away_team_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for game in rows {
                    stmt.execute(params![
                        game.game_id,
                        game.raw_date,
                        fmt_date(game.date),
                        fmt_datetime(game.tipoff),
                        game.season,
                        game.home_team_id,
                        game.away_team_id,
                    ])
                    .context("insert game")?;
                }
            }
            CommitRows::Scores(rows) => {
                let mut stmt = tx.prepare(
                    "INSERT INTO score_results (game_id, home_score, away_score, home_h1, away_h1)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for score in rows {
                    stmt.execute(params![
                        score.game_id,
                        score.home_score,
                        score.away_score,
                        score.home_h1,
                        score.away_h1,
                    ])
                    .context("insert score result")?;
                }
            }
            CommitRows::Odds(rows) => {
                let mut stmt = tx.prepare(
                    "INSERT INTO odds_snapshots (game_id, market, period, line, price_a, price_b, observed_at, source)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for snap in rows {
                    stmt.execute(params![
                        snap.game_id,
                        snap.market.as_str(),
                        snap.period.as_str(),
                        snap.line,
                        snap.price_a,
                        snap.price_b,
                        fmt_datetime(snap.observed_at),
                        snap.source,
                    ])
                    .context("insert odds snapshot")?;
                }
            }
            CommitRows::Ratings(rows) => {
                let mut stmt = tx.prepare(
                    "INSERT INTO rating_snapshots (team_id, season, adj_o, adj_d, tempo, barthag)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for rating in rows {
                    stmt.execute(params![
                        rating.team_id,
                        rating.season,
                        rating.adj_o,
                        rating.adj_d,
                        rating.tempo,
                        rating.barthag,
                    ])
                    .context("insert rating snapshot")?;
                }
            }
        }
        Ok(())
    }
}

fn record_batch(
    conn: &Connection,
    mut report: IngestReport,
    started_at: &str,
) -> Result<IngestReport> {
    let finished_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO ingest_batches
         (entity_kind, started_at, finished_at, rows_in, accepted, committed,
          blocking_json, warnings_json, audit_json, unresolved_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            report.entity_kind.as_str(),
            started_at,
            finished_at,
            report.rows_in as i64,
            report.accepted as i64,
            if report.committed { 1i64 } else { 0i64 },
            serde_json::to_string(&report.blocking).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&report.warnings).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&report.audit).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&report.unresolved).unwrap_or_else(|_| "[]".to_string()),
        ],
    )
    .context("record ingest batch")?;
    report.batch_id = conn.last_insert_rowid();
    Ok(report)
}

const DATE_FMT: &str = "%Y-%m-%d";
const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn fmt_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FMT).to_string()
}

fn read_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT).with_context(|| format!("stored date '{raw}'"))
}

fn read_datetime(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FMT)
        .with_context(|| format!("stored timestamp '{raw}'"))
}

/// One completed game from a team's point of view; the raw material of the
/// rolling feature windows.
#[derive(Debug, Clone)]
pub struct TeamGameRow {
    pub game_id: String,
    pub date: NaiveDate,
    pub points_for: u32,
    pub points_against: u32,
    pub won: bool,
}

/// Immutable in-memory read view of the canonical store. Everything the
/// feature extractor, rating lookup, and backtest touch comes through here,
/// which is what makes those layers pure and safely parallel.
#[derive(Debug)]
pub struct CanonicalSnapshot {
    pub store_version: i64,
    /// Chronological replay order: (date, tipoff, game_id).
    pub games: Vec<Game>,
    pub scores: HashMap<String, ScoreResult>,
    /// Per game, ordered by observed_at ascending.
    pub odds: HashMap<String, Vec<OddsSnapshot>>,
    pub ratings: HashMap<(u32, i32), RatingSnapshot>,
    team_games: HashMap<u32, Vec<TeamGameRow>>,
}

impl CanonicalSnapshot {
    pub fn load(conn: &Connection) -> Result<CanonicalSnapshot> {
        let version = store_version(conn)?;

        let mut games = Vec::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT game_id, raw_date, date, tipoff, season, home_team_id, away_team_id
                     FROM games ORDER BY date ASC, tipoff ASC, game_id ASC",
                )
                .context("prepare games query")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i32>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, u32>(6)?,
                ))
            })?;
            for row in rows {
                let (game_id, raw_date, date, tipoff, season, home, away) =
                    row.context("decode game row")?;
                games.push(Game {
                    game_id,
                    raw_date,
                    date: read_date(&date)?,
                    tipoff: read_datetime(&tipoff)?,
                    season,
                    home_team_id: home,
                    away_team_id: away,
                });
            }
        }

        let mut scores = HashMap::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT game_id, home_score, away_score, home_h1, away_h1 FROM score_results",
                )
                .context("prepare scores query")?;
            let rows = stmt.query_map([], |row| {
                Ok(ScoreResult {
                    game_id: row.get(0)?,
                    home_score: row.get(1)?,
                    away_score: row.get(2)?,
                    home_h1: row.get(3)?,
                    away_h1: row.get(4)?,
                })
            })?;
            for row in rows {
                let score = row.context("decode score row")?;
                scores.insert(score.game_id.clone(), score);
            }
        }

        let mut odds: HashMap<String, Vec<OddsSnapshot>> = HashMap::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT game_id, market, period, line, price_a, price_b, observed_at, source
                     FROM odds_snapshots ORDER BY game_id ASC, observed_at ASC, snapshot_id ASC",
                )
                .context("prepare odds query")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i32>(4)?,
                    row.get::<_, i32>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?;
            for row in rows {
                let (game_id, market, period, line, price_a, price_b, observed_at, source) =
                    row.context("decode odds row")?;
                let market = Market::parse(&market)
                    .ok_or_else(|| anyhow!("stored odds row with unknown market '{market}'"))?;
                let period = Period::parse(&period)
                    .ok_or_else(|| anyhow!("stored odds row with unknown period '{period}'"))?;
                odds.entry(game_id.clone()).or_default().push(OddsSnapshot {
                    game_id,
                    market,
                    period,
                    line,
                    price_a,
                    price_b,
                    observed_at: read_datetime(&observed_at)?,
                    source,
                });
            }
        }

        let mut ratings = HashMap::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT team_id, season, adj_o, adj_d, tempo, barthag FROM rating_snapshots",
                )
                .context("prepare ratings query")?;
            let rows = stmt.query_map([], |row| {
                Ok(RatingSnapshot {
                    team_id: row.get(0)?,
                    season: row.get(1)?,
                    adj_o: row.get(2)?,
                    adj_d: row.get(3)?,
                    tempo: row.get(4)?,
                    barthag: row.get(5)?,
                })
            })?;
            for row in rows {
                let rating = row.context("decode rating row")?;
                ratings.insert(rating.natural_key(), rating);
            }
        }

        let mut team_games: HashMap<u32, Vec<TeamGameRow>> = HashMap::new();
        for game in &games {
            let Some(score) = scores.get(&game.game_id) else {
                continue;
            };
            team_games
                .entry(game.home_team_id)
                .or_default()
                .push(TeamGameRow {
                    game_id: game.game_id.clone(),
                    date: game.date,
                    points_for: score.home_score,
                    points_against: score.away_score,
                    won: score.home_score > score.away_score,
                });
            team_games
                .entry(game.away_team_id)
                .or_default()
                .push(TeamGameRow {
                    game_id: game.game_id.clone(),
                    date: game.date,
                    points_for: score.away_score,
                    points_against: score.home_score,
                    won: score.away_score > score.home_score,
                });
        }
        // games is already in replay order, so per-team rows inherit it.

        Ok(CanonicalSnapshot {
            store_version: version,
            games,
            scores,
            odds,
            ratings,
            team_games,
        })
    }

    pub fn team_games(&self, team_id: u32) -> &[TeamGameRow] {
        self.team_games
            .get(&team_id)
            .map(|rows| rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn game_odds(&self, game_id: &str) -> &[OddsSnapshot] {
        self.odds
            .get(game_id)
            .map(|rows| rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn score(&self, game_id: &str) -> Option<&ScoreResult> {
        self.scores.get(game_id)
    }
}
