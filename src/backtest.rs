use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entities::{Market, Period, RatingSnapshot, ScoreResult};
use crate::features::{closing_snapshot, opening_snapshot, rolling_stats, RollingWindowStats};
use crate::market::{american_payout_per_unit, devig_two_way, SpreadProbModel};
use crate::ratings::ratings_for_game;
use crate::store::CanonicalSnapshot;

/// Everything the external model is allowed to see for one game: rolling
/// form, prior-season ratings, and opening lines. All strictly pre-game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub game_id: String,
    pub date: NaiveDate,
    pub season: i32,
    pub home: RollingWindowStats,
    pub away: RollingWindowStats,
    pub home_rating: RatingSnapshot,
    pub away_rating: RatingSnapshot,
    pub opening_spread: Option<f64>,
    pub opening_total: Option<f64>,
}

/// The opaque prediction function. Returns the probability of the home/over
/// side for the given market and period, or `None` when the model declines
/// to price it.
pub trait Predictor {
    fn predict(&self, market: Market, period: Period, features: &FeatureVector) -> Option<f64>;
}

impl<F> Predictor for F
where
    F: Fn(Market, Period, &FeatureVector) -> Option<f64>,
{
    fn predict(&self, market: Market, period: Period, features: &FeatureVector) -> Option<f64> {
        self(market, period, features)
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub markets: Vec<Market>,
    /// Periods replayed per market; first-half lines settle against the
    /// first-half score split.
    pub periods: Vec<Period>,
    pub window_size: usize,
    /// Minimum |model - market| probability gap before a stake goes down.
    pub min_edge: f64,
    /// Fraction of full Kelly actually staked.
    pub kelly_multiplier: f64,
    /// Hard ceiling on any single stake, as a bankroll fraction.
    pub kelly_cap: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            markets: vec![Market::Spread, Market::Moneyline],
            periods: vec![Period::FullGame],
            window_size: 5,
            min_edge: 0.02,
            kelly_multiplier: 0.25,
            kelly_cap: 0.10,
        }
    }
}

/// Why a (game, market, period) triple produced no decision at all. Skips
/// are routine and diagnostically important, so they are ledger rows, not
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkipReason {
    MissingHomeRating,
    MissingAwayRating,
    MissingOpeningLine,
    MissingResult,
    NoModelProbability,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::MissingHomeRating => "missing_home_rating",
            SkipReason::MissingAwayRating => "missing_away_rating",
            SkipReason::MissingOpeningLine => "missing_opening_line",
            SkipReason::MissingResult => "missing_result",
            SkipReason::NoModelProbability => "no_model_probability",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetSide {
    Home,
    Away,
    Over,
    Under,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetOutcome {
    Win,
    Loss,
    Push,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRecord {
    pub side: BetSide,
    /// Line taken -- always the opening line; deciding off the close would
    /// be leakage.
    pub taken_line: f64,
    pub taken_price: i32,
    pub model_prob: f64,
    pub market_prob: f64,
    pub edge: f64,
    /// Bankroll fraction staked.
    pub stake: f64,
    pub outcome: BetOutcome,
    pub profit: f64,
    /// Signed movement between the taken line and the close, oriented so
    /// positive favors the taken side. `None` when no closing observation
    /// exists.
    pub clv: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerEntry {
    Bet(BetRecord),
    /// Evaluated; edge or Kelly fraction did not clear the configured bar.
    NoBet {
        model_prob: f64,
        market_prob: f64,
        edge: f64,
    },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub game_id: String,
    pub date: NaiveDate,
    pub market: Market,
    pub period: Period,
    pub entry: LedgerEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market: Option<Market>,
    pub period: Option<Period>,
    pub bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    pub staked: f64,
    pub profit: f64,
    pub clv_samples: usize,
    pub clv_positive: usize,
}

impl MarketSummary {
    pub fn win_rate(&self) -> f64 {
        let decided = self.wins + self.losses;
        if decided == 0 {
            0.0
        } else {
            self.wins as f64 / decided as f64
        }
    }

    pub fn roi(&self) -> f64 {
        if self.staked <= 0.0 {
            0.0
        } else {
            self.profit / self.staked
        }
    }

    pub fn clv_positive_rate(&self) -> f64 {
        if self.clv_samples == 0 {
            0.0
        } else {
            self.clv_positive as f64 / self.clv_samples as f64
        }
    }

    fn absorb(&mut self, bet: &BetRecord) {
        self.bets += 1;
        match bet.outcome {
            BetOutcome::Win => self.wins += 1,
            BetOutcome::Loss => self.losses += 1,
            BetOutcome::Push => self.pushes += 1,
        }
        self.staked += bet.stake;
        self.profit += bet.profit;
        if let Some(clv) = bet.clv {
            self.clv_samples += 1;
            if clv > 0.0 {
                self.clv_positive += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub ledger: Vec<LedgerRow>,
    /// (game, market, period) triples where a decision was reached (bet or
    /// no-bet).
    pub evaluated: usize,
    /// Triples skipped for a missing input, tallied by reason.
    pub skipped: usize,
    pub skip_reasons: BTreeMap<SkipReason, usize>,
    pub per_market: Vec<MarketSummary>,
    pub overall: MarketSummary,
    pub spread_model_version: String,
}

/// Home-side margin and combined score for the settled period, when the
/// score carries that period's split.
fn period_result(score: &ScoreResult, period: Period) -> Option<(i32, u32)> {
    match period {
        Period::FullGame => Some((score.margin(), score.total())),
        Period::FirstHalf => match (score.home_h1, score.away_h1) {
            (Some(h), Some(a)) => Some((h as i32 - a as i32, h + a)),
            _ => None,
        },
    }
}

/// Replay canonical games in chronological order (ties broken by tipoff then
/// game id -- the snapshot's load order) and simulate the staking policy.
pub fn run_backtest(
    snap: &CanonicalSnapshot,
    predictor: &dyn Predictor,
    spread_model: &dyn SpreadProbModel,
    cfg: &BacktestConfig,
) -> BacktestReport {
    let mut ledger = Vec::new();
    let mut evaluated = 0usize;
    let mut skipped = 0usize;
    let mut skip_reasons: BTreeMap<SkipReason, usize> = BTreeMap::new();
    let mut summaries: BTreeMap<(Market, Period), MarketSummary> = BTreeMap::new();
    let mut overall = MarketSummary::default();

    info!(
        games = snap.games.len(),
        store_version = snap.store_version,
        "starting backtest replay"
    );

    for game in &snap.games {
        let skip_game = |reason: SkipReason,
                         ledger: &mut Vec<LedgerRow>,
                         skipped: &mut usize,
                         skip_reasons: &mut BTreeMap<SkipReason, usize>| {
            for &market in &cfg.markets {
                for &period in &cfg.periods {
                    ledger.push(LedgerRow {
                        game_id: game.game_id.clone(),
                        date: game.date,
                        market,
                        period,
                        entry: LedgerEntry::Skip(reason),
                    });
                    *skipped += 1;
                    *skip_reasons.entry(reason).or_default() += 1;
                }
            }
        };

        // Prior-season ratings; the lookup owns the S-1 rule.
        let home_rating = match ratings_for_game(snap, game.home_team_id, game.season) {
            Ok(r) => r.clone(),
            Err(_) => {
                debug!(game_id = %game.game_id, "skip: no prior-season home rating");
                skip_game(
                    SkipReason::MissingHomeRating,
                    &mut ledger,
                    &mut skipped,
                    &mut skip_reasons,
                );
                continue;
            }
        };
        let away_rating = match ratings_for_game(snap, game.away_team_id, game.season) {
            Ok(r) => r.clone(),
            Err(_) => {
                skip_game(
                    SkipReason::MissingAwayRating,
                    &mut ledger,
                    &mut skipped,
                    &mut skip_reasons,
                );
                continue;
            }
        };

        let features = FeatureVector {
            game_id: game.game_id.clone(),
            date: game.date,
            season: game.season,
            home: rolling_stats(snap, game.home_team_id, game.date, cfg.window_size),
            away: rolling_stats(snap, game.away_team_id, game.date, cfg.window_size),
            home_rating,
            away_rating,
            opening_spread: opening_snapshot(snap, game, Market::Spread, Period::FullGame)
                .map(|s| s.line),
            opening_total: opening_snapshot(snap, game, Market::Total, Period::FullGame)
                .map(|s| s.line),
        };

        for &market in &cfg.markets {
            for &period in &cfg.periods {
                let skip = |reason: SkipReason,
                            ledger: &mut Vec<LedgerRow>,
                            skipped: &mut usize,
                            skip_reasons: &mut BTreeMap<SkipReason, usize>| {
                    ledger.push(LedgerRow {
                        game_id: game.game_id.clone(),
                        date: game.date,
                        market,
                        period,
                        entry: LedgerEntry::Skip(reason),
                    });
                    *skipped += 1;
                    *skip_reasons.entry(reason).or_default() += 1;
                };

                // Decisions price off the opening observation only.
                let Some(open) = opening_snapshot(snap, game, market, period) else {
                    skip(
                        SkipReason::MissingOpeningLine,
                        &mut ledger,
                        &mut skipped,
                        &mut skip_reasons,
                    );
                    continue;
                };

                let market_prob = match market {
                    Market::Spread => spread_model.home_win_prob(open.line),
                    Market::Total | Market::Moneyline => {
                        devig_two_way(open.price_a, open.price_b).0
                    }
                };

                // A playable bet also needs a settleable result for this
                // period; a final without a half split cannot settle 1H.
                let result = snap
                    .score(&game.game_id)
                    .and_then(|score| period_result(score, period));
                let Some((margin, total)) = result else {
                    skip(
                        SkipReason::MissingResult,
                        &mut ledger,
                        &mut skipped,
                        &mut skip_reasons,
                    );
                    continue;
                };

                let Some(model_prob) = predictor.predict(market, period, &features) else {
                    skip(
                        SkipReason::NoModelProbability,
                        &mut ledger,
                        &mut skipped,
                        &mut skip_reasons,
                    );
                    continue;
                };
                let model_prob = model_prob.clamp(0.0, 1.0);

                evaluated += 1;
                let edge = model_prob - market_prob;

                let no_bet = |edge: f64| LedgerRow {
                    game_id: game.game_id.clone(),
                    date: game.date,
                    market,
                    period,
                    entry: LedgerEntry::NoBet {
                        model_prob,
                        market_prob,
                        edge,
                    },
                };

                if edge.abs() < cfg.min_edge {
                    ledger.push(no_bet(edge));
                    continue;
                }

                // Positive edge backs home/over; negative backs the other
                // side.
                let (side, side_prob, taken_price) = if edge > 0.0 {
                    let side = match market {
                        Market::Total => BetSide::Over,
                        _ => BetSide::Home,
                    };
                    (side, model_prob, open.price_a)
                } else {
                    let side = match market {
                        Market::Total => BetSide::Under,
                        _ => BetSide::Away,
                    };
                    (side, 1.0 - model_prob, open.price_b)
                };

                let payout = american_payout_per_unit(taken_price);
                let kelly = (payout * side_prob - (1.0 - side_prob)) / payout;
                let stake = (kelly * cfg.kelly_multiplier).clamp(0.0, cfg.kelly_cap);
                if stake <= 0.0 {
                    // Edge cleared the bar but the price makes the bet -EV.
                    ledger.push(no_bet(edge));
                    continue;
                }

                let outcome = settle(market, side, open.line, margin, total);
                let profit = match outcome {
                    BetOutcome::Win => stake * payout,
                    BetOutcome::Loss => -stake,
                    BetOutcome::Push => 0.0,
                };

                let close = closing_snapshot(snap, game, market, period);
                let clv = close.and_then(|c| closing_line_value(market, side, open, c));

                let bet = BetRecord {
                    side,
                    taken_line: open.line,
                    taken_price,
                    model_prob,
                    market_prob,
                    edge,
                    stake,
                    outcome,
                    profit,
                    clv,
                };
                summaries.entry((market, period)).or_default().absorb(&bet);
                overall.absorb(&bet);
                ledger.push(LedgerRow {
                    game_id: game.game_id.clone(),
                    date: game.date,
                    market,
                    period,
                    entry: LedgerEntry::Bet(bet),
                });
            }
        }
    }

    let per_market = summaries
        .into_iter()
        .map(|((market, period), mut summary)| {
            summary.market = Some(market);
            summary.period = Some(period);
            summary
        })
        .collect();

    info!(
        evaluated,
        skipped,
        bets = overall.bets,
        "backtest replay finished"
    );

    BacktestReport {
        ledger,
        evaluated,
        skipped,
        skip_reasons,
        per_market,
        overall,
        spread_model_version: spread_model.version().to_string(),
    }
}

/// Settle one bet against the period's margin/total. Exact landings on the
/// line push.
fn settle(market: Market, side: BetSide, line: f64, margin: i32, total: u32) -> BetOutcome {
    match market {
        Market::Spread => {
            // Home line: home covers when margin + line > 0.
            let cover = margin as f64 + line;
            if cover == 0.0 {
                BetOutcome::Push
            } else if (cover > 0.0) == (side == BetSide::Home) {
                BetOutcome::Win
            } else {
                BetOutcome::Loss
            }
        }
        Market::Total => {
            let diff = total as f64 - line;
            if diff == 0.0 {
                BetOutcome::Push
            } else if (diff > 0.0) == (side == BetSide::Over) {
                BetOutcome::Win
            } else {
                BetOutcome::Loss
            }
        }
        Market::Moneyline => {
            if margin == 0 {
                BetOutcome::Push
            } else if (margin > 0) == (side == BetSide::Home) {
                BetOutcome::Win
            } else {
                BetOutcome::Loss
            }
        }
    }
}

/// CLV oriented to the taken side: positive means the market moved the way
/// the bet needed it to between the taken (opening) observation and the
/// close. Spreads and totals measure in points, moneylines in de-vigged
/// probability.
fn closing_line_value(
    market: Market,
    side: BetSide,
    open: &crate::entities::OddsSnapshot,
    close: &crate::entities::OddsSnapshot,
) -> Option<f64> {
    match market {
        Market::Spread => match side {
            BetSide::Home => Some(open.line - close.line),
            BetSide::Away => Some(close.line - open.line),
            _ => None,
        },
        Market::Total => match side {
            BetSide::Over => Some(close.line - open.line),
            BetSide::Under => Some(open.line - close.line),
            _ => None,
        },
        Market::Moneyline => {
            let (open_home, _) = devig_two_way(open.price_a, open.price_b);
            let (close_home, _) = devig_two_way(close.price_a, close.price_b);
            match side {
                BetSide::Home => Some(close_home - open_home),
                BetSide::Away => Some(open_home - close_home),
                _ => None,
            }
        }
    }
}
