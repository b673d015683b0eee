use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    record::Record,
    schema::{awards, guilds, participants, users},
};

pub const DEFAULT_COLOR: &str = "#FFFFFF";

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub platform_id: i64,
    pub name: String,
    pub color: String,
}

impl User {
    pub fn by_platform_id(
        platform_id: i64,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<User>> {
        users::table
            .filter(users::platform_id.eq(platform_id))
            .first::<User>(conn)
            .optional()
    }

    pub fn by_name(
        name: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<User>> {
        users::table
            .filter(users::name.eq(name))
            .first::<User>(conn)
            .optional()
    }

    /// Fetches the user behind `platform_id`, creating the row with
    /// `name` and the default color on first sight.
    pub fn fetch_or_insert(
        platform_id: i64,
        name: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<User> {
        if let Some(user) = Self::by_platform_id(platform_id, conn)? {
            return Ok(user);
        }

        let user = User {
            id: Uuid::now_v7().to_string(),
            platform_id,
            name: name.to_string(),
            color: DEFAULT_COLOR.to_string(),
        };
        diesel::insert_into(users::table)
            .values((
                users::id.eq(&user.id),
                users::platform_id.eq(user.platform_id),
                users::name.eq(&user.name),
                users::color.eq(&user.color),
            ))
            .execute(conn)?;

        Ok(user)
    }

    /// Guilds whose current challenge this user is still competing in.
    pub fn active_guilds(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<crate::guilds::Guild>> {
        let challenge_ids = participants::table
            .filter(
                participants::user_id
                    .eq(&self.id)
                    .and(participants::failed_round_id.is_null()),
            )
            .select(participants::challenge_id)
            .load::<String>(conn)?
            .into_iter()
            .map(Some)
            .collect::<Vec<_>>();

        guilds::table
            .filter(guilds::current_challenge_id.eq_any(challenge_ids))
            .order(guilds::platform_id)
            .load(conn)
    }
}

impl Record for User {
    const TABLE: &'static str = "users";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(users::table)
            .values((
                users::id.eq(&self.id),
                users::platform_id.eq(self.platform_id),
                users::name.eq(&self.name),
                users::color.eq(&self.color),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(users::table.filter(users::id.eq(&self.id)))
            .execute(conn)?;
        Ok(())
    }
}

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct Award {
    pub id: String,
    pub user_id: String,
    pub url: String,
    pub time: NaiveDateTime,
}

impl Award {
    pub fn grant(
        user_id: &str,
        url: &str,
        time: NaiveDateTime,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Award> {
        let award = Award {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            url: url.to_string(),
            time,
        };
        diesel::insert_into(awards::table)
            .values((
                awards::id.eq(&award.id),
                awards::user_id.eq(&award.user_id),
                awards::url.eq(&award.url),
                awards::time.eq(award.time),
            ))
            .execute(conn)?;

        Ok(award)
    }

    /// Deletes every direct award of `user_id` pointing at `url`, returning
    /// how many there were.
    pub fn revoke(
        user_id: &str,
        url: &str,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<usize> {
        diesel::delete(
            awards::table.filter(
                awards::user_id.eq(user_id).and(awards::url.eq(url)),
            ),
        )
        .execute(conn)
    }

    pub fn of_user(
        user_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Award>> {
        awards::table
            .filter(awards::user_id.eq(user_id))
            .order(awards::time)
            .load(conn)
    }
}

impl Record for Award {
    const TABLE: &'static str = "awards";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(awards::table)
            .values((
                awards::id.eq(&self.id),
                awards::user_id.eq(&self.user_id),
                awards::url.eq(&self.url),
                awards::time.eq(self.time),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(awards::table.filter(awards::id.eq(&self.id)))
            .execute(conn)?;
        Ok(())
    }
}
