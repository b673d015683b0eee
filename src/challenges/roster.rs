use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    challenges::{catalog::Title, current_challenge_of, require_running},
    error::EngineError,
    guilds::Guild,
    record::Record,
    schema::{banned_users, participants, rolls, rounds, titles, users},
    state::DbPool,
    users::User,
    validation,
};

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct Participant {
    pub id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub failed_round_id: Option<String>,
    pub progress_current: Option<i64>,
    pub progress_total: Option<i64>,
}

impl Participant {
    pub fn insert(
        challenge_id: &str,
        user_id: &str,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<Participant> {
        let participant = Participant {
            id: Uuid::now_v7().to_string(),
            challenge_id: challenge_id.to_string(),
            user_id: user_id.to_string(),
            failed_round_id: None,
            progress_current: None,
            progress_total: None,
        };
        diesel::insert_into(participants::table)
            .values((
                participants::id.eq(&participant.id),
                participants::challenge_id.eq(&participant.challenge_id),
                participants::user_id.eq(&participant.user_id),
                participants::failed_round_id.eq(None::<String>),
                participants::progress_current.eq(None::<i64>),
                participants::progress_total.eq(None::<i64>),
            ))
            .execute(conn)?;

        Ok(participant)
    }

    pub fn fetch(
        id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Participant> {
        participants::table
            .filter(participants::id.eq(id))
            .first(conn)
    }

    pub fn has_failed(&self) -> bool {
        self.failed_round_id.is_some()
    }

    /// Whether the participant has watched their whole current title, as
    /// far as reported progress can tell.
    pub fn has_completed(&self) -> bool {
        match (self.progress_current, self.progress_total) {
            (Some(current), Some(total)) => current >= total,
            _ => false,
        }
    }

    pub fn user(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<User> {
        users::table.filter(users::id.eq(&self.user_id)).first(conn)
    }

    /// Titles this participant has submitted to the challenge.
    pub fn submitted_titles(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Title>> {
        titles::table
            .filter(titles::participant_id.eq(&self.id))
            .order(titles::name)
            .load(conn)
    }

    /// How many rolls this participant has accumulated over the whole
    /// challenge.
    pub fn roll_count(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<i64> {
        rolls::table
            .inner_join(rounds::table)
            .filter(
                rounds::challenge_id
                    .eq(&self.challenge_id)
                    .and(rolls::participant_id.eq(&self.id)),
            )
            .count()
            .get_result(conn)
    }
}

impl Record for Participant {
    const TABLE: &'static str = "participants";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(participants::table)
            .values((
                participants::id.eq(&self.id),
                participants::challenge_id.eq(&self.challenge_id),
                participants::user_id.eq(&self.user_id),
                participants::failed_round_id.eq(&self.failed_round_id),
                participants::progress_current.eq(self.progress_current),
                participants::progress_total.eq(self.progress_total),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(
            participants::table.filter(participants::id.eq(&self.id)),
        )
        .execute(conn)?;
        Ok(())
    }
}

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct BannedUser {
    pub challenge_id: String,
    pub user_id: String,
}

impl BannedUser {
    pub fn exists(
        challenge_id: &str,
        user_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<bool> {
        let n: i64 = banned_users::table
            .filter(
                banned_users::challenge_id
                    .eq(challenge_id)
                    .and(banned_users::user_id.eq(user_id)),
            )
            .count()
            .get_result(conn)?;

        Ok(n > 0)
    }

    pub fn users_of_challenge(
        challenge_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<User>> {
        banned_users::table
            .inner_join(users::table)
            .filter(banned_users::challenge_id.eq(challenge_id))
            .select(users::all_columns)
            .order(users::name)
            .load(conn)
    }
}

impl Record for BannedUser {
    const TABLE: &'static str = "banned_users";
    const KEY_COLUMNS: &'static [&'static str] = &["challenge_id", "user_id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(banned_users::table)
            .values((
                banned_users::challenge_id.eq(&self.challenge_id),
                banned_users::user_id.eq(&self.user_id),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(
            banned_users::table.filter(
                banned_users::challenge_id
                    .eq(&self.challenge_id)
                    .and(banned_users::user_id.eq(&self.user_id)),
            ),
        )
        .execute(conn)?;
        Ok(())
    }
}

/// Membership of a guild's current challenge.
pub struct Roster {
    pool: DbPool,
}

impl Roster {
    pub fn new(pool: DbPool) -> Self {
        Roster { pool }
    }

    /// Signs `user` up for the current challenge, creating their account
    /// on first contact. Late joiners are fine; they sit out until the
    /// next round starts.
    #[tracing::instrument(skip(self))]
    pub fn add_user(
        &self,
        guild: i64,
        user: i64,
        name: &str,
    ) -> Result<Participant, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let user = match User::by_platform_id(user, conn)? {
                Some(user) => user,
                None => {
                    validation::is_valid_name(name)
                        .map_err(EngineError::Invalid)?;
                    if User::by_name(name, conn)?.is_some() {
                        return Err(EngineError::conflict(format!(
                            "the name {name:?} is taken"
                        )));
                    }
                    User::fetch_or_insert(user, name, conn)?
                }
            };

            if BannedUser::exists(&challenge.id, &user.id, conn)? {
                return Err(EngineError::conflict(format!(
                    "{} is banned from this challenge",
                    user.name
                )));
            }

            if challenge.participant_of_user(&user.id, conn)?.is_some() {
                return Err(EngineError::conflict(format!(
                    "{} is already in the challenge",
                    user.name
                )));
            }

            Participant::insert(&challenge.id, &user.id, conn)
                .map_err(EngineError::from)
        })
    }

    /// Removes a participant who has not left any footprint yet. Anyone
    /// with a roll keeps their history; ban them instead.
    #[tracing::instrument(skip(self))]
    pub fn remove_user(
        &self,
        guild: i64,
        user: i64,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let user = require_user(user, conn)?;
            let participant = challenge
                .participant_of_user(&user.id, conn)?
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "{} is not in the current challenge",
                        user.name
                    ))
                })?;

            if participant.roll_count(conn)? > 0 {
                return Err(EngineError::conflict(format!(
                    "{} has already rolled a title; ban them instead",
                    user.name
                )));
            }

            let submitted = participant.submitted_titles(conn)?;
            if submitted.iter().any(|t| t.is_used) {
                return Err(EngineError::conflict(format!(
                    "a title submitted by {} is being watched; ban them instead",
                    user.name
                )));
            }

            for title in &submitted {
                title.remove(conn)?;
            }
            participant.remove(conn)?;

            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn ban_user(&self, guild: i64, user: i64) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let user = require_user(user, conn)?;
            if BannedUser::exists(&challenge.id, &user.id, conn)? {
                return Err(EngineError::conflict(format!(
                    "{} is already banned",
                    user.name
                )));
            }

            BannedUser {
                challenge_id: challenge.id.clone(),
                user_id: user.id.clone(),
            }
            .persist(conn)?;

            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn unban_user(
        &self,
        guild: i64,
        user: i64,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let user = require_user(user, conn)?;
            if !BannedUser::exists(&challenge.id, &user.id, conn)? {
                return Err(EngineError::not_found(format!(
                    "{} is not banned",
                    user.name
                )));
            }

            BannedUser {
                challenge_id: challenge.id.clone(),
                user_id: user.id.clone(),
            }
            .remove(conn)?;

            Ok(())
        })
    }

    pub fn banned_users(&self, guild: i64) -> Result<Vec<User>, EngineError> {
        let mut conn = self.pool.get()?;

        let (_, challenge) = current_challenge_of(guild, &mut conn)?;
        BannedUser::users_of_challenge(&challenge.id, &mut conn)
            .map_err(EngineError::from)
    }

    /// Sets watch progress outright, either as `current` out of `total`
    /// or as a bare `current` when the length is unknown.
    pub fn set_progress(
        &self,
        guild: i64,
        user: i64,
        current: i64,
        total: Option<i64>,
    ) -> Result<Participant, EngineError> {
        self.update_progress(guild, user, |_| (current, total))
    }

    /// Bumps watch progress by `delta` episodes.
    pub fn add_progress(
        &self,
        guild: i64,
        user: i64,
        delta: i64,
    ) -> Result<Participant, EngineError> {
        self.update_progress(guild, user, |participant| {
            (
                participant.progress_current.unwrap_or(0) + delta,
                participant.progress_total,
            )
        })
    }

    fn update_progress(
        &self,
        guild: i64,
        user: i64,
        f: impl FnOnce(&Participant) -> (i64, Option<i64>),
    ) -> Result<Participant, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let user = require_user(user, conn)?;
            let mut participant = challenge
                .participant_of_user(&user.id, conn)?
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "{} is not in the current challenge",
                        user.name
                    ))
                })?;

            if participant.has_failed() {
                return Err(EngineError::conflict(format!(
                    "{} has already failed the challenge",
                    user.name
                )));
            }

            let (current, total) = f(&participant);
            if current < 0 {
                return Err(EngineError::invalid(
                    "progress cannot go below zero",
                ));
            }
            if let Some(total) = total {
                if total < 1 || current > total {
                    return Err(EngineError::invalid(format!(
                        "progress {current}/{total} does not add up"
                    )));
                }
            }

            participant.progress_current = Some(current);
            participant.progress_total = total;
            participant.persist(conn)?;

            Ok(participant)
        })
    }

    pub fn set_color(
        &self,
        user: i64,
        color: &str,
    ) -> Result<User, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            validation::is_valid_color(color).map_err(EngineError::Invalid)?;

            let mut user = require_user(user, conn)?;
            user.color = color.to_string();
            user.persist(conn)?;

            Ok(user)
        })
    }

    pub fn set_name(
        &self,
        user: i64,
        name: &str,
    ) -> Result<User, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            validation::is_valid_name(name).map_err(EngineError::Invalid)?;

            let mut user = require_user(user, conn)?;
            if let Some(other) = User::by_name(name, conn)? {
                if other.id != user.id {
                    return Err(EngineError::conflict(format!(
                        "the name {name:?} is taken"
                    )));
                }
            }

            user.name = name.to_string();
            user.persist(conn)?;

            Ok(user)
        })
    }

    /// Guilds whose current challenge the user is still competing in.
    /// Handy for routing direct messages back to the right game.
    pub fn active_guilds(&self, user: i64) -> Result<Vec<Guild>, EngineError> {
        let mut conn = self.pool.get()?;

        let user = require_user(user, &mut conn)?;
        user.active_guilds(&mut conn).map_err(EngineError::from)
    }
}

pub(crate) fn require_user(
    platform_id: i64,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<User, EngineError> {
    User::by_platform_id(platform_id, conn)?.ok_or_else(|| {
        EngineError::not_found("user has never joined a challenge")
    })
}
