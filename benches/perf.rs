use chrono::NaiveDate;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use nba_forecast::assemble::assemble_records;
use nba_forecast::model::TrainingSet;
use nba_forecast::partition::split_by_game;
use nba_forecast::providers::parse_scoreboard_json;
use nba_forecast::stats::{GameRecord, Outcome, StatLine, TeamSeasonStats};

/// A full regular season: 1230 games, 30 teams.
fn season_records() -> (Vec<GameRecord>, Vec<TeamSeasonStats>) {
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    let mut games = Vec::with_capacity(2460);
    for g in 0..1230u32 {
        let home = 1 + g % 30;
        let away = 1 + (g + 1 + g / 30 % 29) % 30;
        for (team, pts, outcome) in [(home, 112.0, Outcome::Win), (away, 104.0, Outcome::Loss)] {
            games.push(GameRecord {
                game_id: format!("00223{g:05}"),
                team_id: team,
                game_date: date,
                matchup: None,
                is_home: Some(team == home),
                box_score: StatLine {
                    pts,
                    reb: 44.0,
                    ..StatLine::default()
                },
                outcome: Some(outcome),
            });
        }
    }
    let season = (1..=30)
        .map(|team_id| TeamSeasonStats {
            team_id,
            team_name: format!("Team {team_id}"),
            stats: StatLine {
                pts: 100.0 + team_id as f64,
                ..StatLine::default()
            },
        })
        .collect();
    (games, season)
}

fn bench_assemble_season(c: &mut Criterion) {
    let (games, season) = season_records();
    c.bench_function("assemble_season", |b| {
        b.iter(|| {
            let out = assemble_records(black_box(&games), black_box(&season));
            black_box(out.rows.len());
        })
    });
}

fn bench_split_and_matrix(c: &mut Criterion) {
    let (games, season) = season_records();
    let rows = assemble_records(&games, &season).rows;
    c.bench_function("split_and_matrix", |b| {
        b.iter(|| {
            let p = split_by_game(black_box(&rows), 0.2, 42).unwrap();
            let train = TrainingSet::from_rows(&p.train);
            black_box(train.len());
        })
    });
}

fn bench_scoreboard_parse(c: &mut Criterion) {
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date");
    c.bench_function("scoreboard_parse", |b| {
        b.iter(|| {
            let frame = parse_scoreboard_json(black_box(SCOREBOARD_JSON), date).unwrap();
            black_box(frame.len());
        })
    });
}

criterion_group!(
    perf,
    bench_assemble_season,
    bench_split_and_matrix,
    bench_scoreboard_parse
);
criterion_main!(perf);

static SCOREBOARD_JSON: &str = include_str!("../tests/fixtures/scoreboard_v2.json");
