use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    challenges::Challenge,
    record::Record,
    schema::{challenges, guilds},
};

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct Guild {
    pub id: String,
    pub platform_id: i64,
    pub current_challenge_id: Option<String>,
    pub spreadsheet_key: Option<String>,
}

impl Guild {
    pub fn by_platform_id(
        platform_id: i64,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<Guild>> {
        guilds::table
            .filter(guilds::platform_id.eq(platform_id))
            .first::<Guild>(conn)
            .optional()
    }

    pub fn fetch_or_insert(
        platform_id: i64,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Guild> {
        if let Some(guild) = Self::by_platform_id(platform_id, conn)? {
            return Ok(guild);
        }

        let guild = Guild {
            id: Uuid::now_v7().to_string(),
            platform_id,
            current_challenge_id: None,
            spreadsheet_key: None,
        };
        diesel::insert_into(guilds::table)
            .values((
                guilds::id.eq(&guild.id),
                guilds::platform_id.eq(guild.platform_id),
                guilds::current_challenge_id.eq(None::<String>),
                guilds::spreadsheet_key.eq(None::<String>),
            ))
            .execute(conn)?;

        Ok(guild)
    }

    pub fn current_challenge(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<Challenge>> {
        let Some(id) = &self.current_challenge_id else {
            return Ok(None);
        };

        challenges::table
            .filter(challenges::id.eq(id))
            .first::<Challenge>(conn)
            .optional()
    }

    pub fn challenge_by_name(
        &self,
        name: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<Challenge>> {
        challenges::table
            .filter(
                challenges::guild_id
                    .eq(&self.id)
                    .and(challenges::name.eq(name)),
            )
            .first::<Challenge>(conn)
            .optional()
    }

    /// All challenges ever run in this guild, oldest first.
    pub fn challenges(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Challenge>> {
        challenges::table
            .filter(challenges::guild_id.eq(&self.id))
            .order(challenges::start_time)
            .load(conn)
    }
}

impl Record for Guild {
    const TABLE: &'static str = "guilds";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(guilds::table)
            .values((
                guilds::id.eq(&self.id),
                guilds::platform_id.eq(self.platform_id),
                guilds::current_challenge_id.eq(&self.current_challenge_id),
                guilds::spreadsheet_key.eq(&self.spreadsheet_key),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(guilds::table.filter(guilds::id.eq(&self.id)))
            .execute(conn)?;
        Ok(())
    }
}
