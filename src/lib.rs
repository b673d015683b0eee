//! Engine for community watch challenges. A guild runs one challenge at
//! a time; participants submit titles into pools, each round everyone
//! is rolled somebody else's submission to watch, and rating it (or
//! failing to) feeds progress, karma and the profile statistics.
//!
//! The command layer (bot, web, whatever) sits elsewhere: it parses
//! text, checks permissions and renders output, then calls the verb
//! services here ([`challenges::lifecycle::Lifecycle`],
//! [`challenges::rounds::engine::RoundEngine`],
//! [`challenges::catalog::Catalog`], [`challenges::roster::Roster`],
//! [`karma::KarmaLedger`], [`stats::Stats`]) with resolved ids.

use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub mod challenges;
pub mod config;
pub mod error;
pub mod guilds;
pub mod karma;
pub mod metadata;
pub mod record;
pub mod schema;
pub mod state;
pub mod stats;
pub mod users;
pub mod validation;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[cfg(test)]
mod test;
