use ncaam_edge::backtest::{
    run_backtest, BacktestConfig, BetOutcome, BetSide, LedgerEntry, SkipReason,
};
use ncaam_edge::entities::{Market, Period, Team};
use ncaam_edge::feed::{RawBatch, RawGameRow, RawOddsRow, RawRatingRow, RawScoreRow};
use ncaam_edge::market::NormalSpreadModel;
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

fn spread_row(date: &str, home: &str, away: &str, observed_at: &str, line: f64) -> RawOddsRow {
    RawOddsRow {
        event_id: format!("{date}-{home}"),
        commence_time: format!("{date}T23:00:00"),
        home_name: home.to_string(),
        away_name: away.to_string(),
        market: "spread".to_string(),
        period: None,
        line: Some(line),
        price_a: -110,
        price_b: -110,
        observed_at: observed_at.to_string(),
        source: "oddsfeed".to_string(),
    }
}

fn h1_spread_row(date: &str, home: &str, away: &str, observed_at: &str, line: f64) -> RawOddsRow {
    RawOddsRow {
        period: Some("1h".to_string()),
        ..spread_row(date, home, away, observed_at, line)
    }
}

fn rating_row(name: &str, season: i32) -> RawRatingRow {
    RawRatingRow {
        team_name: name.to_string(),
        season,
        adj_o: 115.0,
        adj_d: 95.0,
        tempo: 68.0,
        barthag: Some(0.9),
        source: "ratings".to_string(),
    }
}

/// Four games on the calendar, only one of which is fully bettable:
///   01-15 Duke/UNC      ratings + odds (full and 1H) + score with half split
///   01-16 Kansas/Gonzaga odds + score, no ratings
///   01-20 UNC/Duke      ratings, no odds
///   01-25 Duke/UNC      ratings + odds, no score
fn seeded_snapshot() -> CanonicalSnapshot {
    let dir = directory();
    let mut conn = open_in_memory().unwrap();
    let cfg = GateConfig::default();

    let games = RawBatch::Games(vec![
        game_row("2024-01-15", "Duke", "North Carolina"),
        game_row("2024-01-16", "Kansas", "Gonzaga"),
        game_row("2024-01-20", "North Carolina", "Duke"),
        game_row("2024-01-25", "Duke", "North Carolina"),
    ]);
    assert!(ingest_batch(&mut conn, &dir, &games, &cfg).unwrap().committed);

    let ratings = RawBatch::Ratings(vec![
        rating_row("Duke", 2023),
        rating_row("North Carolina", 2023),
    ]);
    assert!(ingest_batch(&mut conn, &dir, &ratings, &cfg)
        .unwrap()
        .committed);

    let odds = RawBatch::Odds(vec![
        spread_row(
            "2024-01-15",
            "Duke",
            "North Carolina",
            "2024-01-14T12:00:00",
            -5.5,
        ),
        spread_row(
            "2024-01-15",
            "Duke",
            "North Carolina",
            "2024-01-15T22:00:00",
            -7.5,
        ),
        spread_row(
            "2024-01-16",
            "Kansas",
            "Gonzaga",
            "2024-01-16T12:00:00",
            -3.0,
        ),
        spread_row(
            "2024-01-25",
            "Duke",
            "North Carolina",
            "2024-01-24T12:00:00",
            -4.0,
        ),
        h1_spread_row(
            "2024-01-15",
            "Duke",
            "North Carolina",
            "2024-01-14T12:00:00",
            -2.5,
        ),
        h1_spread_row(
            "2024-01-15",
            "Duke",
            "North Carolina",
            "2024-01-15T22:00:00",
            -3.5,
        ),
    ]);
    assert!(ingest_batch(&mut conn, &dir, &odds, &cfg).unwrap().committed);

    let scores = RawBatch::Scores(vec![
        RawScoreRow {
            date: "2024-01-15".to_string(),
            home_name: "Duke".to_string(),
            away_name: "North Carolina".to_string(),
            home_score: 80,
            away_score: 71,
            home_h1: Some(40),
            away_h1: Some(35),
            source: "scorefeed".to_string(),
        },
        RawScoreRow {
            date: "2024-01-16".to_string(),
            home_name: "Kansas".to_string(),
            away_name: "Gonzaga".to_string(),
            home_score: 70,
            away_score: 68,
            home_h1: None,
            away_h1: None,
            source: "scorefeed".to_string(),
        },
    ]);
    assert!(ingest_batch(&mut conn, &dir, &scores, &cfg)
        .unwrap()
        .committed);

    CanonicalSnapshot::load(&conn).unwrap()
}

fn spread_only_config() -> BacktestConfig {
    BacktestConfig {
        markets: vec![Market::Spread],
        ..BacktestConfig::default()
    }
}

#[test]
fn confident_model_places_one_capped_bet() {
    let snap = seeded_snapshot();
    let model = NormalSpreadModel::default();
    let predictor = |_: Market, _: Period, _: &ncaam_edge::backtest::FeatureVector| Some(0.95);

    let report = run_backtest(&snap, &predictor, &model, &spread_only_config());

    assert_eq!(report.evaluated, 1);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.overall.bets, 1);
    assert_eq!(report.overall.wins, 1);
    assert_eq!(report.spread_model_version, "normal_cdf_v1");

    let bet = report
        .ledger
        .iter()
        .find_map(|row| match &row.entry {
            LedgerEntry::Bet(b) => Some(b),
            _ => None,
        })
        .unwrap();
    assert_eq!(bet.side, BetSide::Home);
    assert_eq!(bet.taken_line, -5.5);
    // Quarter Kelly at this edge exceeds the cap.
    assert!((bet.stake - 0.10).abs() < 1e-9);
    assert_eq!(bet.outcome, BetOutcome::Win);
    assert!(bet.profit > 0.0);
    // Open -5.5 closed -7.5; the market moved toward the home bet.
    assert!((bet.clv.unwrap() - 2.0).abs() < 1e-9);
}

#[test]
fn missing_inputs_are_tallied_per_reason() {
    let snap = seeded_snapshot();
    let model = NormalSpreadModel::default();
    let predictor = |_: Market, _: Period, _: &ncaam_edge::backtest::FeatureVector| Some(0.95);

    let report = run_backtest(&snap, &predictor, &model, &spread_only_config());

    assert_eq!(report.skip_reasons[&SkipReason::MissingHomeRating], 1);
    assert_eq!(report.skip_reasons[&SkipReason::MissingOpeningLine], 1);
    assert_eq!(report.skip_reasons[&SkipReason::MissingResult], 1);
}

#[test]
fn edge_below_threshold_is_an_evaluated_no_bet() {
    let snap = seeded_snapshot();
    let model = NormalSpreadModel::default();
    // Roughly the market's own number at -5.5, so no edge either way.
    let predictor = |_: Market, _: Period, _: &ncaam_edge::backtest::FeatureVector| Some(0.69);

    let report = run_backtest(&snap, &predictor, &model, &spread_only_config());

    assert_eq!(report.evaluated, 1);
    assert_eq!(report.overall.bets, 0);
    assert!(report.ledger.iter().any(|row| matches!(
        row.entry,
        LedgerEntry::NoBet { edge, .. } if edge.abs() < 0.02
    )));
}

#[test]
fn declining_model_is_a_skip_not_a_no_bet() {
    let snap = seeded_snapshot();
    let model = NormalSpreadModel::default();
    let predictor = |_: Market, _: Period, _: &ncaam_edge::backtest::FeatureVector| -> Option<f64> { None };

    let report = run_backtest(&snap, &predictor, &model, &spread_only_config());

    assert_eq!(report.evaluated, 0);
    assert_eq!(report.skip_reasons[&SkipReason::NoModelProbability], 1);
}

#[test]
fn negative_edge_backs_the_away_side() {
    let snap = seeded_snapshot();
    let model = NormalSpreadModel::default();
    let predictor = |_: Market, _: Period, _: &ncaam_edge::backtest::FeatureVector| Some(0.10);

    let report = run_backtest(&snap, &predictor, &model, &spread_only_config());

    let bet = report
        .ledger
        .iter()
        .find_map(|row| match &row.entry {
            LedgerEntry::Bet(b) => Some(b),
            _ => None,
        })
        .unwrap();
    assert_eq!(bet.side, BetSide::Away);
    // Duke won by 9 against a -5.5 line, so the away side lost.
    assert_eq!(bet.outcome, BetOutcome::Loss);
    assert!(bet.profit < 0.0);
    // The close moved further toward home, against the away bet.
    assert!(bet.clv.unwrap() < 0.0);
}

#[test]
fn features_expose_prior_season_ratings_and_opening_line() {
    let snap = seeded_snapshot();
    let model = NormalSpreadModel::default();
    let predictor = |_: Market, _: Period, f: &ncaam_edge::backtest::FeatureVector| {
        assert_eq!(f.home_rating.season, f.season - 1);
        assert_eq!(f.away_rating.season, f.season - 1);
        if f.game_id == "20240115-1-2" {
            assert_eq!(f.opening_spread, Some(-5.5));
        }
        Some(0.95)
    };

    run_backtest(&snap, &predictor, &model, &spread_only_config());
}

#[test]
fn first_half_line_settles_against_the_half_split() {
    let snap = seeded_snapshot();
    let model = NormalSpreadModel::default();
    let predictor = |_: Market, _: Period, _: &ncaam_edge::backtest::FeatureVector| Some(0.95);

    let cfg = BacktestConfig {
        markets: vec![Market::Spread],
        periods: vec![Period::FirstHalf],
        ..BacktestConfig::default()
    };
    let report = run_backtest(&snap, &predictor, &model, &cfg);

    // Only the 01-15 game carries a 1H line; the others skip.
    assert_eq!(report.overall.bets, 1);
    assert_eq!(report.skip_reasons[&SkipReason::MissingHomeRating], 1);
    assert_eq!(report.skip_reasons[&SkipReason::MissingOpeningLine], 2);

    let bet = report
        .ledger
        .iter()
        .find_map(|row| match &row.entry {
            LedgerEntry::Bet(b) => Some(b),
            _ => None,
        })
        .unwrap();
    assert_eq!(bet.taken_line, -2.5);
    // Halves split 40-35: the home side covers -2.5 by the half margin.
    assert_eq!(bet.outcome, BetOutcome::Win);
    // 1H open -2.5 closed -3.5, toward the home bet.
    assert!((bet.clv.unwrap() - 1.0).abs() < 1e-9);

    let summary = &report.per_market[0];
    assert_eq!(summary.market, Some(Market::Spread));
    assert_eq!(summary.period, Some(Period::FirstHalf));
}

#[test]
fn final_without_half_split_cannot_settle_first_half() {
    let dir = directory();
    let mut conn = open_in_memory().unwrap();
    let gate = GateConfig::default();

    let games = RawBatch::Games(vec![game_row("2024-01-15", "Duke", "North Carolina")]);
    assert!(ingest_batch(&mut conn, &dir, &games, &gate).unwrap().committed);
    let ratings = RawBatch::Ratings(vec![
        rating_row("Duke", 2023),
        rating_row("North Carolina", 2023),
    ]);
    assert!(ingest_batch(&mut conn, &dir, &ratings, &gate)
        .unwrap()
        .committed);
    let odds = RawBatch::Odds(vec![h1_spread_row(
        "2024-01-15",
        "Duke",
        "North Carolina",
        "2024-01-14T12:00:00",
        -2.5,
    )]);
    assert!(ingest_batch(&mut conn, &dir, &odds, &gate).unwrap().committed);
    // Final score only; no half split.
    let scores = RawBatch::Scores(vec![RawScoreRow {
        date: "2024-01-15".to_string(),
        home_name: "Duke".to_string(),
        away_name: "North Carolina".to_string(),
        home_score: 80,
        away_score: 71,
        home_h1: None,
        away_h1: None,
        source: "scorefeed".to_string(),
    }]);
    assert!(ingest_batch(&mut conn, &dir, &scores, &gate)
        .unwrap()
        .committed);
    let snap = CanonicalSnapshot::load(&conn).unwrap();

    let model = NormalSpreadModel::default();
    let predictor = |_: Market, _: Period, _: &ncaam_edge::backtest::FeatureVector| Some(0.95);
    let cfg = BacktestConfig {
        markets: vec![Market::Spread],
        periods: vec![Period::FirstHalf],
        ..BacktestConfig::default()
    };
    let report = run_backtest(&snap, &predictor, &model, &cfg);

    assert_eq!(report.overall.bets, 0);
    assert_eq!(report.skip_reasons[&SkipReason::MissingResult], 1);
}

#[test]
fn rating_lookup_only_serves_the_prior_season() {
    let snap = seeded_snapshot();

    let rating = ncaam_edge::ratings::ratings_for_game(&snap, 1, 2024).unwrap();
    assert_eq!(rating.season, 2023);

    // A 2023-season game would need 2022 ratings, which do not exist; the
    // lookup must fail loudly rather than fall back to the current season.
    let err = ncaam_edge::ratings::ratings_for_game(&snap, 1, 2023).unwrap_err();
    assert!(err.to_string().contains("2022"));
}

#[test]
fn ledger_replays_in_chronological_order() {
    let snap = seeded_snapshot();
    let model = NormalSpreadModel::default();
    let predictor = |_: Market, _: Period, _: &ncaam_edge::backtest::FeatureVector| Some(0.95);

    let report = run_backtest(&snap, &predictor, &model, &spread_only_config());

    let dates: Vec<_> = report.ledger.iter().map(|row| row.date).collect();
    let mut sorted = dates.clone();
    sorted.sort();
    assert_eq!(dates, sorted);
}
