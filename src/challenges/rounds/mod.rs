use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    challenges::catalog::Title,
    record::Record,
    schema::{participants, rolls, rounds, titles, users},
    users::User,
};

pub mod engine;

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct Round {
    pub id: String,
    pub challenge_id: String,
    pub num: i64,
    pub start_time: NaiveDateTime,
    pub finish_time: NaiveDateTime,
    pub is_finished: bool,
}

impl Round {
    pub fn insert(
        challenge_id: &str,
        num: i64,
        start_time: NaiveDateTime,
        finish_time: NaiveDateTime,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<Round> {
        let round = Round {
            id: Uuid::now_v7().to_string(),
            challenge_id: challenge_id.to_string(),
            num,
            start_time,
            finish_time,
            is_finished: false,
        };
        diesel::insert_into(rounds::table)
            .values((
                rounds::id.eq(&round.id),
                rounds::challenge_id.eq(&round.challenge_id),
                rounds::num.eq(round.num),
                rounds::start_time.eq(round.start_time),
                rounds::finish_time.eq(round.finish_time),
                rounds::is_finished.eq(round.is_finished),
            ))
            .execute(conn)?;

        Ok(round)
    }

    pub fn rolls(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Roll>> {
        rolls::table
            .filter(rolls::round_id.eq(&self.id))
            .load(conn)
    }

    pub fn roll_of(
        &self,
        participant_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Option<Roll>> {
        rolls::table
            .filter(
                rolls::round_id
                    .eq(&self.id)
                    .and(rolls::participant_id.eq(participant_id)),
            )
            .first::<Roll>(conn)
            .optional()
    }

    /// Every roll of this round together with who watches, who submitted
    /// and the title itself, ordered by watcher name.
    pub fn rolls_watchers_submitters(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<(Roll, User, User, Title)>> {
        let (watcher_part, submitter_part) = diesel::alias!(
            participants as watcher_part,
            participants as submitter_part
        );
        let (watcher, submitter) =
            diesel::alias!(users as watcher, users as submitter);

        rolls::table
            .filter(rolls::round_id.eq(&self.id))
            .inner_join(
                watcher_part.on(watcher_part
                    .field(participants::id)
                    .eq(rolls::participant_id)),
            )
            .inner_join(
                watcher.on(watcher
                    .field(users::id)
                    .eq(watcher_part.field(participants::user_id))),
            )
            .inner_join(titles::table.on(titles::id.eq(rolls::title_id)))
            .inner_join(
                submitter_part.on(submitter_part
                    .field(participants::id)
                    .eq(titles::participant_id)),
            )
            .inner_join(
                submitter.on(submitter
                    .field(users::id)
                    .eq(submitter_part.field(participants::user_id))),
            )
            .select((
                rolls::all_columns,
                watcher.fields(users::all_columns),
                submitter.fields(users::all_columns),
                titles::all_columns,
            ))
            .order(watcher.field(users::name))
            .load(conn)
    }
}

impl Record for Round {
    const TABLE: &'static str = "rounds";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(rounds::table)
            .values((
                rounds::id.eq(&self.id),
                rounds::challenge_id.eq(&self.challenge_id),
                rounds::num.eq(self.num),
                rounds::start_time.eq(self.start_time),
                rounds::finish_time.eq(self.finish_time),
                rounds::is_finished.eq(self.is_finished),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(rounds::table.filter(rounds::id.eq(&self.id)))
            .execute(conn)?;
        Ok(())
    }
}

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct Roll {
    pub round_id: String,
    pub participant_id: String,
    pub title_id: String,
    pub score: Option<f32>,
}

impl Roll {
    pub fn insert(
        round_id: &str,
        participant_id: &str,
        title_id: &str,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<Roll> {
        let roll = Roll {
            round_id: round_id.to_string(),
            participant_id: participant_id.to_string(),
            title_id: title_id.to_string(),
            score: None,
        };
        diesel::insert_into(rolls::table)
            .values((
                rolls::round_id.eq(&roll.round_id),
                rolls::participant_id.eq(&roll.participant_id),
                rolls::title_id.eq(&roll.title_id),
                rolls::score.eq(None::<f32>),
            ))
            .execute(conn)?;

        Ok(roll)
    }

    pub fn title(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Title> {
        Title::fetch(&self.title_id, conn)
    }

    /// How many rolls across the whole challenge point at this title.
    /// A title swapped between rounds is referenced more than once.
    pub fn references_to_title(
        title_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<i64> {
        rolls::table
            .filter(rolls::title_id.eq(title_id))
            .count()
            .get_result(conn)
    }
}

impl Record for Roll {
    const TABLE: &'static str = "rolls";
    const KEY_COLUMNS: &'static [&'static str] =
        &["round_id", "participant_id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(rolls::table)
            .values((
                rolls::round_id.eq(&self.round_id),
                rolls::participant_id.eq(&self.participant_id),
                rolls::title_id.eq(&self.title_id),
                rolls::score.eq(self.score),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(
            rolls::table.filter(
                rolls::round_id
                    .eq(&self.round_id)
                    .and(rolls::participant_id.eq(&self.participant_id)),
            ),
        )
        .execute(conn)?;
        Ok(())
    }
}
