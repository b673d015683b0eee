//! Karma bookkeeping. Karma is stored as a time series of running
//! totals per user; the newest row is the user's current karma. Rows
//! are keyed by (user, time) and re-persisting the same key overwrites
//! the value, which lets a full recalculation run as many times as it
//! likes without duplicating history.

use std::collections::HashSet;

use chrono::{NaiveDateTime, Utc};
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};

use crate::{
    challenges::roster::require_user,
    config::EngineConfig,
    error::EngineError,
    guilds::Guild,
    record::Record,
    schema::{karma_history, participants, rolls, rounds},
    state::DbPool,
};

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct KarmaEntry {
    pub user_id: String,
    pub karma: f64,
    pub time: NaiveDateTime,
}

impl KarmaEntry {
    pub fn latest_of(
        user_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<KarmaEntry>> {
        karma_history::table
            .filter(karma_history::user_id.eq(user_id))
            .order(karma_history::time.desc())
            .first::<KarmaEntry>(conn)
            .optional()
    }

    pub fn history_of(
        user_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<KarmaEntry>> {
        karma_history::table
            .filter(karma_history::user_id.eq(user_id))
            .order(karma_history::time)
            .load(conn)
    }

    pub fn clear_user(
        user_id: &str,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<usize> {
        diesel::delete(
            karma_history::table.filter(karma_history::user_id.eq(user_id)),
        )
        .execute(conn)
    }
}

impl Record for KarmaEntry {
    const TABLE: &'static str = "karma_history";
    const KEY_COLUMNS: &'static [&'static str] = &["user_id", "time"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(karma_history::table)
            .values((
                karma_history::user_id.eq(&self.user_id),
                karma_history::karma.eq(self.karma),
                karma_history::time.eq(self.time),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(
            karma_history::table.filter(
                karma_history::user_id
                    .eq(&self.user_id)
                    .and(karma_history::time.eq(self.time)),
            ),
        )
        .execute(conn)?;
        Ok(())
    }
}

pub struct KarmaLedger {
    pool: DbPool,
    config: EngineConfig,
}

impl KarmaLedger {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        KarmaLedger { pool, config }
    }

    /// The user's karma as of their newest history row, or the starting
    /// value if they have none.
    pub fn current(&self, user: i64) -> Result<f64, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let user = require_user(user, conn)?;
            let latest = KarmaEntry::latest_of(&user.id, conn)?;

            Ok(latest
                .map(|entry| entry.karma)
                .unwrap_or(self.config.starting_karma))
        })
    }

    /// Writes a karma value at `time` (now, if unset). A second write at
    /// the same instant replaces the first.
    pub fn record(
        &self,
        user: i64,
        karma: f64,
        time: Option<NaiveDateTime>,
    ) -> Result<KarmaEntry, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let user = require_user(user, conn)?;
            let entry = KarmaEntry {
                user_id: user.id,
                karma,
                time: time.unwrap_or_else(|| Utc::now().naive_utc()),
            };
            entry.persist(conn)?;

            Ok(entry)
        })
    }

    pub fn history(&self, user: i64) -> Result<Vec<KarmaEntry>, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let user = require_user(user, conn)?;
            KarmaEntry::history_of(&user.id, conn).map_err(EngineError::from)
        })
    }

    /// Wipes a user's history outright. Returns the number of rows
    /// dropped; `recalc_guild` can rebuild them from round results.
    pub fn clear_history(&self, user: i64) -> Result<usize, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let user = require_user(user, conn)?;
            KarmaEntry::clear_user(&user.id, conn).map_err(EngineError::from)
        })
    }

    /// Rebuilds karma history for everyone who ever took part in one of
    /// the guild's challenges. Each finished round pays one karma for a
    /// rated roll and takes one for a failure, timestamped at the
    /// round's finish; a user's rounds in *other* guilds count too, so
    /// the running totals stay whole for people playing several games
    /// at once. Replayed rows overwrite whatever sat at their key;
    /// manual [`KarmaLedger::record`] rows at other times survive.
    /// Returns how many users were rebuilt.
    #[tracing::instrument(skip(self))]
    pub fn recalc_guild(&self, guild: i64) -> Result<usize, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let guild =
                Guild::by_platform_id(guild, conn)?.ok_or_else(|| {
                    EngineError::not_found("this server has no challenges yet")
                })?;

            let mut affected: HashSet<String> = HashSet::new();
            for challenge in guild.challenges(conn)? {
                for participant in challenge.participants(conn)? {
                    affected.insert(participant.user_id);
                }
            }

            for user_id in &affected {
                let mut total = self.config.starting_karma;
                for (time, delta) in round_events_of(user_id, conn)? {
                    total += delta;

                    let entry = KarmaEntry {
                        user_id: user_id.clone(),
                        karma: total,
                        time,
                    };
                    entry.persist(conn)?;
                }
            }

            tracing::debug!(users = affected.len(), "recalculated karma");

            Ok(affected.len())
        })
    }
}

/// Everything that ever moved this user's karma, as `(when, delta)` in
/// play order: plus one for each rated roll of a finished round, minus
/// one for the round they failed.
fn round_events_of(
    user_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> QueryResult<Vec<(NaiveDateTime, f64)>> {
    let rated: Vec<NaiveDateTime> = rolls::table
        .inner_join(rounds::table)
        .inner_join(participants::table)
        .filter(
            participants::user_id
                .eq(user_id)
                .and(rounds::is_finished.eq(true))
                .and(rolls::score.is_not_null()),
        )
        .select(rounds::finish_time)
        .load(conn)?;

    let failed: Vec<NaiveDateTime> = participants::table
        .inner_join(
            rounds::table
                .on(participants::failed_round_id.eq(rounds::id.nullable())),
        )
        .filter(participants::user_id.eq(user_id))
        .select(rounds::finish_time)
        .load(conn)?;

    let mut events: Vec<(NaiveDateTime, f64)> = rated
        .into_iter()
        .map(|time| (time, 1.0))
        .chain(failed.into_iter().map(|time| (time, -1.0)))
        .collect();
    events.sort_by_key(|(time, _)| *time);

    Ok(events)
}
