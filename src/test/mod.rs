//! End-to-end workloads. Each one drives the engine through its public
//! verb services the way a command layer would, against an in-memory
//! database with migrations applied.

mod stats_workload;

use diesel_migrations::MigrationHarness;

use crate::{
    MIGRATIONS,
    challenges::{
        catalog::Catalog,
        lifecycle::Lifecycle,
        roster::Roster,
        rounds::engine::RoundEngine,
    },
    config::EngineConfig,
    karma::KarmaLedger,
    metadata::{MetadataProvider, TitleInfo},
    state::{DbPool, build_pool},
    stats::Stats,
};

pub const GUILD: i64 = 100;

pub struct Harness {
    pub pool: DbPool,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new() -> Self {
        let pool = build_pool(":memory:").unwrap();

        {
            let mut conn = pool.get().unwrap();
            conn.run_pending_migrations(MIGRATIONS).unwrap();
        }

        Harness {
            pool,
            config: EngineConfig::default(),
        }
    }

    /// Fresh engine with a challenge already running.
    pub fn with_challenge(name: &str) -> Self {
        let harness = Self::new();
        harness.lifecycle().start_challenge(GUILD, name).unwrap();
        harness
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.pool.clone(), self.config.clone())
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.pool.clone(), self.config.clone())
    }

    pub fn roster(&self) -> Roster {
        Roster::new(self.pool.clone())
    }

    pub fn engine(&self) -> RoundEngine {
        RoundEngine::new(self.pool.clone(), self.config.clone())
    }

    pub fn karma(&self) -> KarmaLedger {
        KarmaLedger::new(self.pool.clone(), self.config.clone())
    }

    pub fn stats(&self) -> Stats {
        Stats::new(self.pool.clone(), self.config.clone())
    }
}

/// Canned metadata, so workloads can exercise the lookup path without
/// talking to anything.
pub struct FixedMetadata(pub TitleInfo);

impl MetadataProvider for FixedMetadata {
    fn lookup(&self, _url: &str) -> Option<TitleInfo> {
        Some(self.0.clone())
    }
}
