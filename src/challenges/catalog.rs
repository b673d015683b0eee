use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    challenges::{current_challenge_of, require_running},
    config::EngineConfig,
    error::EngineError,
    metadata::MetadataProvider,
    record::Record,
    schema::{pools, titles},
    state::DbPool,
    users::User,
    validation,
};

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct Pool {
    pub id: String,
    pub challenge_id: String,
    pub name: String,
}

impl Pool {
    pub fn insert(
        challenge_id: &str,
        name: &str,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<Pool> {
        let pool = Pool {
            id: Uuid::now_v7().to_string(),
            challenge_id: challenge_id.to_string(),
            name: name.to_string(),
        };
        diesel::insert_into(pools::table)
            .values((
                pools::id.eq(&pool.id),
                pools::challenge_id.eq(&pool.challenge_id),
                pools::name.eq(&pool.name),
            ))
            .execute(conn)?;

        Ok(pool)
    }

    pub fn titles(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Title>> {
        titles::table
            .filter(titles::pool_id.eq(&self.id))
            .order(titles::name)
            .load(conn)
    }

    /// Titles still up for grabs. Hidden titles are included: they are
    /// secret, not exempt.
    pub fn unused_titles(
        &self,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Vec<Title>> {
        titles::table
            .filter(
                titles::pool_id.eq(&self.id).and(titles::is_used.eq(false)),
            )
            .order(titles::name)
            .load(conn)
    }
}

impl Record for Pool {
    const TABLE: &'static str = "pools";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(pools::table)
            .values((
                pools::id.eq(&self.id),
                pools::challenge_id.eq(&self.challenge_id),
                pools::name.eq(&self.name),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(pools::table.filter(pools::id.eq(&self.id)))
            .execute(conn)?;
        Ok(())
    }
}

#[derive(Queryable, Serialize, Deserialize, Clone, Debug)]
pub struct Title {
    pub id: String,
    pub pool_id: String,
    pub participant_id: String,
    pub name: String,
    pub url: Option<String>,
    pub is_used: bool,
    pub is_hidden: bool,
    pub score: Option<f32>,
    pub duration: Option<i64>,
    pub num_of_episodes: Option<i64>,
    pub difficulty: Option<i64>,
}

impl Title {
    pub fn fetch(
        id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> QueryResult<Title> {
        titles::table.filter(titles::id.eq(id)).first(conn)
    }
}

impl Record for Title {
    const TABLE: &'static str = "titles";
    const KEY_COLUMNS: &'static [&'static str] = &["id"];

    fn persist(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::replace_into(titles::table)
            .values((
                titles::id.eq(&self.id),
                titles::pool_id.eq(&self.pool_id),
                titles::participant_id.eq(&self.participant_id),
                titles::name.eq(&self.name),
                titles::url.eq(&self.url),
                titles::is_used.eq(self.is_used),
                titles::is_hidden.eq(self.is_hidden),
                titles::score.eq(self.score),
                titles::duration.eq(self.duration),
                titles::num_of_episodes.eq(self.num_of_episodes),
                titles::difficulty.eq(self.difficulty),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &mut impl Connection<Backend = Sqlite>,
    ) -> QueryResult<()> {
        diesel::delete(titles::table.filter(titles::id.eq(&self.id)))
            .execute(conn)?;
        Ok(())
    }
}

/// Similarity between a query and a candidate name, 0 to 100.
///
/// Plain edit distance punishes reordered words hard, so a token-sorted
/// comparison also gets a try and the better of the two wins.
pub fn similarity(query: &str, candidate: &str) -> u8 {
    let a = query.to_lowercase();
    let b = candidate.to_lowercase();

    let direct = strsim::normalized_levenshtein(&a, &b);

    let sort_tokens = |s: &str| {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    };
    let sorted =
        strsim::normalized_levenshtein(&sort_tokens(&a), &sort_tokens(&b));

    (direct.max(sorted) * 100.0).round() as u8
}

/// Picks the candidate whose name best matches `query`, or `None` when
/// nothing clears `threshold`. Candidates must arrive in a stable order
/// so ties resolve the same way every run.
pub fn best_match<'t>(
    query: &str,
    candidates: &'t [Title],
    threshold: u8,
) -> Option<&'t Title> {
    let mut best: Option<(&Title, u8)> = None;
    for title in candidates {
        let score = similarity(query, &title.name);
        if score >= threshold && best.map(|(_, s)| score > s).unwrap_or(true)
        {
            best = Some((title, score));
        }
    }

    best.map(|(title, _)| title)
}

/// Arguments for putting a new title up. `name` may be omitted when `url`
/// points at something the metadata provider recognises.
#[derive(Clone, Debug, Default)]
pub struct NewTitle {
    pub name: Option<String>,
    pub url: Option<String>,
    pub pool: Option<String>,
    pub is_hidden: bool,
}

/// The title shelf of a guild's current challenge.
pub struct Catalog {
    pool: DbPool,
    config: EngineConfig,
}

impl Catalog {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        Catalog { pool, config }
    }

    pub fn add_pool(
        &self,
        guild: i64,
        name: &str,
    ) -> Result<Pool, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            if challenge.pool_by_name(name, conn)?.is_some() {
                return Err(EngineError::conflict(format!(
                    "pool {name:?} already exists"
                )));
            }

            Pool::insert(&challenge.id, name, conn).map_err(EngineError::from)
        })
    }

    /// Drops a pool and its unused titles. A pool with a title that is
    /// already being watched stays.
    pub fn remove_pool(
        &self,
        guild: i64,
        name: &str,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let pool =
                challenge.pool_by_name(name, conn)?.ok_or_else(|| {
                    EngineError::not_found(format!("no pool named {name:?}"))
                })?;

            let titles = pool.titles(conn)?;
            if titles.iter().any(|t| t.is_used) {
                return Err(EngineError::conflict(format!(
                    "pool {name:?} has titles that are already being watched"
                )));
            }

            for title in &titles {
                title.remove(conn)?;
            }
            pool.remove(conn)?;

            Ok(())
        })
    }

    pub fn rename_pool(
        &self,
        guild: i64,
        name: &str,
        new_name: &str,
    ) -> Result<Pool, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let mut pool =
                challenge.pool_by_name(name, conn)?.ok_or_else(|| {
                    EngineError::not_found(format!("no pool named {name:?}"))
                })?;

            if challenge.pool_by_name(new_name, conn)?.is_some() {
                return Err(EngineError::conflict(format!(
                    "pool {new_name:?} already exists"
                )));
            }

            pool.name = new_name.to_string();
            pool.persist(conn)?;

            Ok(pool)
        })
    }

    /// Puts a title up for the current challenge. The metadata lookup,
    /// if any, runs before the write transaction opens; a url nobody
    /// recognises simply leaves the numeric fields empty.
    #[tracing::instrument(skip(self, provider))]
    pub fn add_title(
        &self,
        guild: i64,
        submitter: i64,
        draft: NewTitle,
        provider: Option<&dyn MetadataProvider>,
    ) -> Result<Title, EngineError> {
        let info = match (&draft.url, provider) {
            (Some(url), provider) => {
                validation::is_valid_url(url).map_err(EngineError::Invalid)?;
                provider.and_then(|p| p.lookup(url))
            }
            (None, _) => None,
        };

        let name = draft
            .name
            .clone()
            .or_else(|| info.as_ref().map(|i| i.name.clone()))
            .ok_or_else(|| {
                EngineError::invalid("a title needs a name or a recognised url")
            })?;
        if name.trim().is_empty() {
            return Err(EngineError::invalid("a title needs a name"));
        }

        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let user =
                User::by_platform_id(submitter, conn)?.ok_or_else(|| {
                    EngineError::not_found("user has never joined a challenge")
                })?;
            let participant = challenge
                .participant_of_user(&user.id, conn)?
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "{} is not in the current challenge",
                        user.name
                    ))
                })?;

            if draft.is_hidden && !challenge.allow_hidden {
                return Err(EngineError::conflict(
                    "hidden titles are not allowed in this challenge"
                        .to_string(),
                ));
            }

            let pool_name =
                draft.pool.as_deref().unwrap_or(&self.config.default_pool);
            let pool = challenge
                .pool_by_name(pool_name, conn)?
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "no pool named {pool_name:?}"
                    ))
                })?;

            if challenge.title_with_name_exists(&name, conn)? {
                return Err(EngineError::conflict(format!(
                    "title {name:?} already exists"
                )));
            }

            let title = Title {
                id: Uuid::now_v7().to_string(),
                pool_id: pool.id.clone(),
                participant_id: participant.id.clone(),
                name,
                url: draft.url.clone(),
                is_used: false,
                is_hidden: draft.is_hidden,
                score: info.as_ref().and_then(|i| i.score),
                duration: info.as_ref().and_then(|i| i.duration),
                num_of_episodes: info.as_ref().and_then(|i| i.num_of_episodes),
                difficulty: info.as_ref().and_then(|i| i.difficulty),
            };
            diesel::insert_into(titles::table)
                .values((
                    titles::id.eq(&title.id),
                    titles::pool_id.eq(&title.pool_id),
                    titles::participant_id.eq(&title.participant_id),
                    titles::name.eq(&title.name),
                    titles::url.eq(&title.url),
                    titles::is_used.eq(title.is_used),
                    titles::is_hidden.eq(title.is_hidden),
                    titles::score.eq(title.score),
                    titles::duration.eq(title.duration),
                    titles::num_of_episodes.eq(title.num_of_episodes),
                    titles::difficulty.eq(title.difficulty),
                ))
                .execute(conn)?;

            Ok(title)
        })
    }

    /// Fuzzy lookup across every pool of the current challenge.
    pub fn resolve_title(
        &self,
        guild: i64,
        query: &str,
    ) -> Result<Option<Title>, EngineError> {
        let mut conn = self.pool.get()?;

        let (_, challenge) = current_challenge_of(guild, &mut conn)?;
        let candidates = challenge.titles(&mut conn)?;

        Ok(best_match(query, &candidates, self.config.match_threshold)
            .cloned())
    }

    pub fn remove_title(
        &self,
        guild: i64,
        query: &str,
    ) -> Result<Title, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let candidates = challenge.titles(conn)?;
            let title = best_match(
                query,
                &candidates,
                self.config.match_threshold,
            )
            .cloned()
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "no title matching {query:?}"
                ))
            })?;

            if title.is_used {
                return Err(EngineError::conflict(format!(
                    "title {:?} is already being watched",
                    title.name
                )));
            }

            title.remove(conn)?;

            Ok(title)
        })
    }

    pub fn rename_title(
        &self,
        guild: i64,
        query: &str,
        new_name: &str,
    ) -> Result<Title, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            if new_name.trim().is_empty() {
                return Err(EngineError::invalid("a title needs a name"));
            }

            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let candidates = challenge.titles(conn)?;
            let mut title = best_match(
                query,
                &candidates,
                self.config.match_threshold,
            )
            .cloned()
            .ok_or_else(|| {
                EngineError::not_found(format!(
                    "no title matching {query:?}"
                ))
            })?;

            if title.name != new_name
                && challenge.title_with_name_exists(new_name, conn)?
            {
                return Err(EngineError::conflict(format!(
                    "title {new_name:?} already exists"
                )));
            }

            title.name = new_name.to_string();
            title.persist(conn)?;

            Ok(title)
        })
    }

    /// Re-runs the metadata lookup for every title with a url, returning
    /// how many rows changed. All lookups happen before the write
    /// transaction opens; names are left alone so manual renames survive
    /// a refresh.
    pub fn refresh_title_info(
        &self,
        guild: i64,
        provider: &dyn MetadataProvider,
    ) -> Result<usize, EngineError> {
        let mut conn = self.pool.get()?;

        let (_, challenge) = current_challenge_of(guild, &mut conn)?;

        let mut lookups = Vec::new();
        for title in challenge.titles(&mut conn)? {
            let Some(url) = &title.url else { continue };
            let Some(info) = provider.lookup(url) else { continue };
            lookups.push((title.id.clone(), info));
        }

        conn.transaction(|conn| {
            let mut updated = 0;
            for (id, info) in &lookups {
                let title = titles::table
                    .filter(titles::id.eq(id))
                    .first::<Title>(conn)
                    .optional()?;
                let Some(mut title) = title else { continue };

                title.score = info.score;
                title.duration = info.duration;
                title.num_of_episodes = info.num_of_episodes;
                title.difficulty = info.difficulty;
                title.persist(conn)?;
                updated += 1;
            }

            Ok(updated)
        })
    }
}

#[cfg(test)]
mod test {
    use super::similarity;

    #[test]
    fn test_similarity() {
        assert_eq!(similarity("steins gate", "Steins Gate"), 100);
        assert!(similarity("gate steins", "Steins Gate") >= 60);
        assert!(similarity("stein gate", "Steins;Gate") >= 60);
        assert!(similarity("breaking bad", "Steins Gate") < 60);
        assert!(similarity("", "Steins Gate") < 60);
    }
}
