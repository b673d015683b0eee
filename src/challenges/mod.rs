use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    challenges::{
        catalog::{Pool, Title},
        roster::Participant,
        rounds::Round,
    },
    error::EngineError,
    guilds::Guild,
    record::Record,
    schema::{challenges, participants, pools, titles, users},
    users::User,
};

pub mod catalog;
pub mod lifecycle;
pub mod roster;
pub mod rounds;

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct Challenge {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    pub start_time: NaiveDateTime,
    pub finish_time: Option<NaiveDateTime>,
    pub award_url: Option<String>,
    pub allow_hidden: bool,
}

impl Challenge {
    pub fn insert(
        guild_id: &str,
        name: &str,
        start_time: NaiveDateTime,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<Challenge> {
        let challenge = Challenge {
            id: Uuid::now_v7().to_string(),
            guild_id: guild_id.to_string(),
            name: name.to_string(),
            start_time,
            finish_time: None,
            award_url: None,
            allow_hidden: false,
        };
        diesel::insert_into(challenges::table)
            .values((
                challenges::id.eq(&challenge.id),
                challenges::guild_id.eq(&challenge.guild_id),
                challenges::name.eq(&challenge.name),
                challenges::start_time.eq(challenge.start_time),
                challenges::finish_time.eq(None::<NaiveDateTime>),
                challenges::award_url.eq(None::<String>),
                challenges::allow_hidden.eq(false),
            ))
            .execute(conn)?;

        Ok(challenge)
    }

    pub fn has_finished(&self) -> bool {
        self.finish_time.is_some()
    }

    pub fn pool_by_name(
        &self,
        name: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<Pool>> {
        pools::table
            .filter(
                pools::challenge_id.eq(&self.id).and(pools::name.eq(name)),
            )
            .first::<Pool>(conn)
            .optional()
    }

    /// Every title submitted to this challenge, across all pools.
    pub fn titles(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Title>> {
        titles::table
            .inner_join(pools::table)
            .filter(pools::challenge_id.eq(&self.id))
            .select(titles::all_columns)
            .order(titles::name)
            .load(conn)
    }

    pub fn title_with_name_exists(
        &self,
        name: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<bool> {
        let n: i64 = titles::table
            .inner_join(pools::table)
            .filter(
                pools::challenge_id.eq(&self.id).and(titles::name.eq(name)),
            )
            .count()
            .get_result(conn)?;

        Ok(n > 0)
    }

    pub fn participants(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Participant>> {
        participants::table
            .filter(participants::challenge_id.eq(&self.id))
            .load(conn)
    }

    /// Participants still in the game, with their user rows, ordered by
    /// user name so output is stable.
    pub fn active_participants(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<(Participant, User)>> {
        participants::table
            .inner_join(users::table)
            .filter(
                participants::challenge_id
                    .eq(&self.id)
                    .and(participants::failed_round_id.is_null()),
            )
            .order(users::name)
            .load(conn)
    }

    pub fn participants_with_users(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<(Participant, User)>> {
        participants::table
            .inner_join(users::table)
            .filter(participants::challenge_id.eq(&self.id))
            .order(users::name)
            .load(conn)
    }

    pub fn participant_of_user(
        &self,
        user_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<Participant>> {
        participants::table
            .filter(
                participants::challenge_id
                    .eq(&self.id)
                    .and(participants::user_id.eq(user_id)),
            )
            .first::<Participant>(conn)
            .optional()
    }

    pub fn rounds(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Round>> {
        use crate::schema::rounds;

        rounds::table
            .filter(rounds::challenge_id.eq(&self.id))
            .order(rounds::num)
            .load(conn)
    }

    pub fn last_round(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<Round>> {
        use crate::schema::rounds;

        rounds::table
            .filter(rounds::challenge_id.eq(&self.id))
            .order(rounds::num.desc())
            .first::<Round>(conn)
            .optional()
    }

    pub fn round_by_num(
        &self,
        num: i64,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<Round>> {
        use crate::schema::rounds;

        rounds::table
            .filter(
                rounds::challenge_id.eq(&self.id).and(rounds::num.eq(num)),
            )
            .first::<Round>(conn)
            .optional()
    }
}

impl Record for Challenge {
    const TABLE: &'static str = "challenges";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(challenges::table)
            .values((
                challenges::id.eq(&self.id),
                challenges::guild_id.eq(&self.guild_id),
                challenges::name.eq(&self.name),
                challenges::start_time.eq(self.start_time),
                challenges::finish_time.eq(self.finish_time),
                challenges::award_url.eq(&self.award_url),
                challenges::allow_hidden.eq(self.allow_hidden),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(challenges::table.filter(challenges::id.eq(&self.id)))
            .execute(conn)?;
        Ok(())
    }
}

/// A finished challenge is frozen: stats stay readable but nothing may
/// change any more.
pub fn require_running(challenge: &Challenge) -> Result<(), EngineError> {
    match challenge.has_finished() {
        true => Err(EngineError::conflict(format!(
            "challenge {:?} is already finished",
            challenge.name
        ))),
        false => Ok(()),
    }
}

/// Resolves a guild's current challenge, the scope almost every verb
/// operates in.
pub fn current_challenge_of(
    guild_platform_id: i64,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(Guild, Challenge), EngineError> {
    let guild = Guild::by_platform_id(guild_platform_id, conn)?
        .ok_or_else(|| {
            EngineError::not_found("this server has no challenges yet")
        })?;

    let challenge = guild
        .current_challenge(conn)?
        .ok_or_else(|| EngineError::not_found("no current challenge"))?;

    Ok((guild, challenge))
}
