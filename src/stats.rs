//! Read-only views composed from the round and karma state. Nothing in
//! here mutates; aggregation happens in Rust over plain loads so the
//! queries stay simple.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use itertools::Itertools;
use serde::Serialize;

use crate::{
    challenges::{
        Challenge, current_challenge_of,
        catalog::Title,
        roster::{Participant, require_user},
        rounds::{Roll, Round},
    },
    config::EngineConfig,
    error::EngineError,
    guilds::Guild,
    karma::KarmaEntry,
    schema::{challenges, participants, pools, rolls, titles, users},
    state::DbPool,
    users::{Award, User},
};

#[derive(Serialize, Clone, Debug)]
pub struct ProgressRow {
    pub user: User,
    pub current: Option<i64>,
    pub total: Option<i64>,
}

#[derive(Serialize, Clone, Debug)]
pub struct KarmaRow {
    pub user: User,
    pub karma: f64,
}

#[derive(Serialize, Clone, Debug)]
pub struct DifficultyRow {
    pub title: Title,
    pub submitter: User,
}

#[derive(Serialize, Clone, Debug)]
pub struct RoundSummary {
    pub round: Round,
    pub rows: Vec<(Roll, User, User, Title)>,
}

/// How often one particular counterpart showed up on the other end of a
/// roll.
#[derive(Serialize, Clone, Debug)]
pub struct CounterpartCount {
    pub name: String,
    pub count: i64,
}

#[derive(Serialize, Clone, Debug)]
pub struct UserStats {
    pub num_challenges: i64,
    pub num_completed: i64,
    pub avg_rate: Option<f64>,
    pub avg_title_score: Option<f64>,
    pub most_watched: Vec<CounterpartCount>,
    pub most_sniped: Vec<CounterpartCount>,
    pub finish_time: Option<NaiveDateTime>,
    pub karma: f64,
    pub awards: Vec<String>,
}

pub struct Stats {
    pool: DbPool,
    config: EngineConfig,
}

impl Stats {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        Stats { pool, config }
    }

    /// Progress of everyone still in the current challenge, ordered by
    /// name.
    pub fn progress_table(
        &self,
        guild: i64,
    ) -> Result<Vec<ProgressRow>, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;

            let rows = challenge
                .active_participants(conn)?
                .into_iter()
                .map(|(participant, user)| ProgressRow {
                    user,
                    current: participant.progress_current,
                    total: participant.progress_total,
                })
                .collect();

            Ok(rows)
        })
    }

    /// Karma leaderboard over everyone who ever joined one of the
    /// guild's challenges, highest first.
    pub fn karma_table(
        &self,
        guild: i64,
    ) -> Result<Vec<KarmaRow>, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let guild =
                Guild::by_platform_id(guild, conn)?.ok_or_else(|| {
                    EngineError::not_found("this server has no challenges yet")
                })?;

            let mut seen: HashMap<String, User> = HashMap::new();
            for challenge in guild.challenges(conn)? {
                for (_, user) in challenge.participants_with_users(conn)? {
                    seen.entry(user.id.clone()).or_insert(user);
                }
            }

            let mut rows = Vec::with_capacity(seen.len());
            for user in seen.into_values() {
                let karma = KarmaEntry::latest_of(&user.id, conn)?
                    .map(|entry| entry.karma)
                    .unwrap_or(self.config.starting_karma);
                rows.push(KarmaRow { user, karma });
            }

            rows.sort_by(|a, b| {
                b.karma
                    .total_cmp(&a.karma)
                    .then_with(|| a.user.name.cmp(&b.user.name))
            });

            Ok(rows)
        })
    }

    /// Titles of a challenge ranked by difficulty, hardest first unless
    /// `ascending`. Titles the metadata provider never scored carry no
    /// difficulty and are left out.
    pub fn difficulty_table(
        &self,
        guild: i64,
        challenge: Option<&str>,
        user: Option<i64>,
        ascending: bool,
    ) -> Result<Vec<DifficultyRow>, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let guild =
                Guild::by_platform_id(guild, conn)?.ok_or_else(|| {
                    EngineError::not_found("this server has no challenges yet")
                })?;

            let challenge = match challenge {
                Some(name) => {
                    guild.challenge_by_name(name, conn)?.ok_or_else(|| {
                        EngineError::not_found(format!(
                            "no challenge named {name:?}"
                        ))
                    })?
                }
                None => guild.current_challenge(conn)?.ok_or_else(|| {
                    EngineError::not_found("no current challenge")
                })?,
            };

            let filter_user = match user {
                Some(id) => Some(require_user(id, conn)?),
                None => None,
            };

            let mut rows: Vec<(Title, User)> = titles::table
                .inner_join(pools::table)
                .inner_join(participants::table.inner_join(users::table))
                .filter(
                    pools::challenge_id
                        .eq(&challenge.id)
                        .and(titles::difficulty.is_not_null()),
                )
                .select((titles::all_columns, users::all_columns))
                .load(conn)?;

            if let Some(user) = &filter_user {
                rows.retain(|(_, submitter)| submitter.id == user.id);
            }

            rows.sort_by(|a, b| {
                let order = if ascending {
                    a.0.difficulty.cmp(&b.0.difficulty)
                } else {
                    b.0.difficulty.cmp(&a.0.difficulty)
                };
                order.then_with(|| a.0.name.cmp(&b.0.name))
            });

            Ok(rows
                .into_iter()
                .map(|(title, submitter)| DifficultyRow { title, submitter })
                .collect())
        })
    }

    /// One round laid out in full: every roll with its watcher,
    /// submitter and title. Defaults to the newest round.
    pub fn round_summary(
        &self,
        guild: i64,
        num: Option<i64>,
    ) -> Result<RoundSummary, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;

            let round = match num {
                Some(num) => {
                    challenge.round_by_num(num, conn)?.ok_or_else(|| {
                        EngineError::not_found(format!("no round {num}"))
                    })?
                }
                None => challenge.last_round(conn)?.ok_or_else(|| {
                    EngineError::not_found("no rounds yet")
                })?,
            };

            let rows = round.rolls_watchers_submitters(conn)?;

            Ok(RoundSummary { round, rows })
        })
    }

    /// The profile card numbers for one user. Counts and averages span
    /// every guild the user played in; awards and the next deadline are
    /// scoped to the asking guild.
    pub fn user_profile(
        &self,
        guild: i64,
        user: i64,
    ) -> Result<(User, UserStats), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let user = require_user(user, conn)?;
            let guild = Guild::by_platform_id(guild, conn)?;

            let participations: Vec<(Participant, Challenge)> =
                participants::table
                    .inner_join(challenges::table)
                    .filter(participants::user_id.eq(&user.id))
                    .load(conn)?;

            let num_challenges = participations.len() as i64;
            let num_completed = participations
                .iter()
                .filter(|(participant, challenge)| {
                    participant.failed_round_id.is_none()
                        && challenge.finish_time.is_some()
                })
                .count() as i64;

            let own_scores: Vec<Option<f32>> = rolls::table
                .inner_join(participants::table)
                .filter(
                    participants::user_id
                        .eq(&user.id)
                        .and(rolls::score.is_not_null()),
                )
                .select(rolls::score)
                .load(conn)?;
            let avg_rate = average(&own_scores);

            let title_scores: Vec<Option<f32>> = rolls::table
                .inner_join(titles::table.inner_join(participants::table))
                .filter(
                    participants::user_id
                        .eq(&user.id)
                        .and(rolls::score.is_not_null()),
                )
                .select(rolls::score)
                .load(conn)?;
            let avg_title_score = average(&title_scores);

            let (watcher_part, submitter_part) = diesel::alias!(
                participants as watcher_part,
                participants as submitter_part
            );

            let watched_submitters: Vec<User> = rolls::table
                .inner_join(
                    watcher_part.on(watcher_part
                        .field(participants::id)
                        .eq(rolls::participant_id)),
                )
                .inner_join(titles::table.on(titles::id.eq(rolls::title_id)))
                .inner_join(
                    submitter_part.on(submitter_part
                        .field(participants::id)
                        .eq(titles::participant_id)),
                )
                .inner_join(users::table.on(
                    users::id.eq(submitter_part.field(participants::user_id)),
                ))
                .filter(watcher_part.field(participants::user_id).eq(&user.id))
                .select(users::all_columns)
                .load(conn)?;
            let most_watched = top_counterparts(watched_submitters);

            let sniping_watchers: Vec<User> = rolls::table
                .inner_join(
                    watcher_part.on(watcher_part
                        .field(participants::id)
                        .eq(rolls::participant_id)),
                )
                .inner_join(titles::table.on(titles::id.eq(rolls::title_id)))
                .inner_join(
                    submitter_part.on(submitter_part
                        .field(participants::id)
                        .eq(titles::participant_id)),
                )
                .inner_join(users::table.on(
                    users::id.eq(watcher_part.field(participants::user_id)),
                ))
                .filter(
                    submitter_part.field(participants::user_id).eq(&user.id),
                )
                .select(users::all_columns)
                .load(conn)?;
            let most_sniped = top_counterparts(sniping_watchers);

            // Challenge awards are only earned where they were granted;
            // direct awards follow the user everywhere.
            let mut award_rows: Vec<(Option<NaiveDateTime>, String)> =
                participations
                    .iter()
                    .filter(|(participant, challenge)| {
                        participant.failed_round_id.is_none()
                            && guild
                                .as_ref()
                                .is_some_and(|g| g.id == challenge.guild_id)
                    })
                    .filter_map(|(_, challenge)| {
                        challenge
                            .award_url
                            .as_ref()
                            .map(|url| (challenge.finish_time, url.clone()))
                    })
                    .collect();
            award_rows.extend(
                Award::of_user(&user.id, conn)?
                    .into_iter()
                    .map(|award| (Some(award.time), award.url)),
            );
            award_rows.sort();
            award_rows.dedup();
            let awards =
                award_rows.into_iter().map(|(_, url)| url).collect();

            let karma = KarmaEntry::latest_of(&user.id, conn)?
                .map(|entry| entry.karma)
                .unwrap_or(self.config.starting_karma);

            let finish_time = match &guild {
                Some(guild) => next_deadline(guild, &user, conn)?,
                None => None,
            };

            let stats = UserStats {
                num_challenges,
                num_completed,
                avg_rate,
                avg_title_score,
                most_watched,
                most_sniped,
                finish_time,
                karma,
                awards,
            };

            Ok((user, stats))
        })
    }
}

fn average(scores: &[Option<f32>]) -> Option<f64> {
    let scores: Vec<f64> =
        scores.iter().flatten().map(|s| *s as f64).collect();

    match scores.is_empty() {
        true => None,
        false => Some(scores.iter().sum::<f64>() / scores.len() as f64),
    }
}

/// Collapses one-user-per-roll rows into the six most frequent names.
fn top_counterparts(counterparts: Vec<User>) -> Vec<CounterpartCount> {
    let mut counts: Vec<(String, usize)> = counterparts
        .into_iter()
        .map(|user| user.name)
        .counts()
        .into_iter()
        .collect();

    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(6);

    counts
        .into_iter()
        .map(|(name, count)| CounterpartCount {
            name,
            count: count as i64,
        })
        .collect()
}

/// When the user still has a horse in the race, the open round's
/// deadline; otherwise nothing.
fn next_deadline(
    guild: &Guild,
    user: &User,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Option<NaiveDateTime>, EngineError> {
    let Some(challenge) = guild.current_challenge(conn)? else {
        return Ok(None);
    };
    let Some(round) = challenge.last_round(conn)? else {
        return Ok(None);
    };
    if round.is_finished {
        return Ok(None);
    }
    let Some(participant) = challenge.participant_of_user(&user.id, conn)?
    else {
        return Ok(None);
    };
    if participant.has_failed() {
        return Ok(None);
    }

    Ok(Some(round.finish_time))
}
