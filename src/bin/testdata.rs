//! Seeds a demo guild and plays a few rounds through the engine, so a
//! command layer under development has data to point at.

use clap::Parser;
use diesel_migrations::MigrationHarness;
use itertools::Itertools;
use roulette::{
    MIGRATIONS,
    challenges::{
        catalog::{Catalog, NewTitle},
        lifecycle::Lifecycle,
        roster::Roster,
        rounds::engine::RoundEngine,
    },
    config::EngineConfig,
    karma::KarmaLedger,
    state::build_pool,
    stats::Stats,
};

const GUILD: i64 = 1000;
const CAST: &[(i64, &str)] = &[
    (1, "ayaka"),
    (2, "boris"),
    (3, "clementine"),
    (4, "dasha"),
    (5, "emil"),
    (6, "fern"),
];

#[derive(Parser)]
pub struct Seed {
    database_url: Option<String>,
    /// How many rounds to play through.
    #[clap(long, default_value_t = 2)]
    rounds: i64,
    /// End the challenge once the rounds are done.
    #[clap(long, action)]
    finish: bool,
}

fn main() {
    tracing_subscriber::fmt().init();

    let args = Seed::parse();
    let db_url = if let Some(url) = args.database_url {
        url
    } else {
        std::env::var("DATABASE_URL").expect(
            "please either set `DATABASE_URL` or pass the `--database-url` flag",
        )
    };

    let pool = build_pool(&db_url).unwrap();
    {
        let mut conn = pool.get().unwrap();
        conn.run_pending_migrations(MIGRATIONS).unwrap();
    }

    let config = EngineConfig::default();
    let lifecycle = Lifecycle::new(pool.clone(), config.clone());
    let catalog = Catalog::new(pool.clone(), config.clone());
    let roster = Roster::new(pool.clone());
    let engine = RoundEngine::new(pool.clone(), config.clone());
    let karma = KarmaLedger::new(pool.clone(), config.clone());
    let stats = Stats::new(pool, config);

    lifecycle.start_challenge(GUILD, "demo-season").unwrap();

    for (id, name) in CAST {
        roster.add_user(GUILD, *id, name).unwrap();
        for i in 0..args.rounds {
            catalog
                .add_title(
                    GUILD,
                    *id,
                    NewTitle {
                        name: Some(format!("{name}-pick-{i}")),
                        ..Default::default()
                    },
                    None,
                )
                .unwrap();
        }
    }

    let mut active = CAST.to_vec();
    for _ in 0..args.rounds {
        if active.len() < 3 {
            println!("not enough watchers left for another round");
            break;
        }

        let reveal = engine.start_round(GUILD, 7, None).unwrap();
        println!("round {}:", reveal.round.num);
        for (watcher, title) in &reveal.assignments {
            println!("  {watcher} watches {title}");
        }

        // Everyone rates except the back of the pack: one finishes the
        // title without rating it, one does nothing and drops out.
        let raters = &active[..active.len() - 2];
        let finisher = active[active.len() - 2];
        for (i, (id, _)) in raters.iter().enumerate() {
            engine.rate(GUILD, *id, 5.0 + (i % 5) as f32).unwrap();
        }
        roster.set_progress(GUILD, finisher.0, 12, Some(12)).unwrap();

        let outcome = engine.end_round(GUILD).unwrap();
        if !outcome.failed.is_empty() {
            println!(
                "  dropped: {}",
                outcome.failed.iter().map(|user| user.name.as_str()).join(", ")
            );
        }
        active.retain(|(_, name)| {
            !outcome.failed.iter().any(|user| user.name == *name)
        });
    }

    let touched = karma.recalc_guild(GUILD).unwrap();
    println!("karma recalculated for {touched} users");
    for row in stats.karma_table(GUILD).unwrap() {
        println!("  {} {}", row.user.name, row.karma);
    }

    if args.finish {
        lifecycle.end_challenge(GUILD).unwrap();
        lifecycle
            .set_award(GUILD, "https://example.org/awards/demo-season.png")
            .unwrap();
        println!("challenge closed and award set");
    }
}
