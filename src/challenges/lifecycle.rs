use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use rand::{SeedableRng, seq::IndexedRandom};
use rand_chacha::ChaCha20Rng;

use crate::{
    challenges::{
        Challenge,
        catalog::{Pool, Title, best_match},
        current_challenge_of, require_running,
        roster::{Participant, require_user},
        rounds::{Roll, Round},
    },
    config::EngineConfig,
    error::EngineError,
    guilds::Guild,
    record::Record,
    state::DbPool,
    users::{Award, User},
    validation,
};

/// The result of a title exchange: who now watches what.
#[derive(Debug)]
pub struct SwapOutcome {
    pub first: (User, Title),
    pub second: (User, Title),
}

/// Opens and closes challenges and covers the admin overrides that cut
/// across a running round: swapping, rerolling and force-assigning
/// titles, plus awards and guild settings.
pub struct Lifecycle {
    pool: DbPool,
    config: EngineConfig,
}

impl Lifecycle {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        Lifecycle { pool, config }
    }

    /// Creates a challenge and makes it the guild's current one. The
    /// previous challenge, finished or not, keeps its state; only the
    /// pointer moves.
    #[tracing::instrument(skip(self))]
    pub fn start_challenge(
        &self,
        guild: i64,
        name: &str,
    ) -> Result<Challenge, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let mut guild = Guild::fetch_or_insert(guild, conn)?;
            if guild.challenge_by_name(name, conn)?.is_some() {
                return Err(EngineError::conflict(format!(
                    "challenge {name:?} already exists"
                )));
            }

            let challenge = Challenge::insert(
                &guild.id,
                name,
                Utc::now().naive_utc(),
                conn,
            )?;

            // Submissions with no pool named land in the default pool, so
            // a new challenge starts with it ready.
            Pool::insert(&challenge.id, &self.config.default_pool, conn)?;

            guild.current_challenge_id = Some(challenge.id.clone());
            guild.persist(conn)?;

            tracing::debug!(challenge = %challenge.name, "started challenge");

            Ok(challenge)
        })
    }

    /// Stamps the current challenge as finished. The pointer stays where
    /// it is so stats keep working; the next `start_challenge` replaces
    /// it.
    #[tracing::instrument(skip(self))]
    pub fn end_challenge(
        &self,
        guild: i64,
    ) -> Result<Challenge, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, mut challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            if let Some(round) = challenge.last_round(conn)? {
                if !round.is_finished {
                    return Err(EngineError::conflict(format!(
                        "round {} is still running; end it first",
                        round.num
                    )));
                }
            }

            challenge.finish_time = Some(Utc::now().naive_utc());
            challenge.persist(conn)?;

            tracing::debug!(challenge = %challenge.name, "ended challenge");

            Ok(challenge)
        })
    }

    /// Exchanges the titles two participants rolled in the open round.
    #[tracing::instrument(skip(self))]
    pub fn swap_titles(
        &self,
        guild: i64,
        first: i64,
        second: i64,
    ) -> Result<SwapOutcome, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            if first == second {
                return Err(EngineError::conflict(
                    "cannot swap a user with themselves",
                ));
            }

            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;
            let round = open_round(&challenge, conn)?;

            let a = roll_party(&challenge, &round, first, conn)?;
            let b = roll_party(&challenge, &round, second, conn)?;

            exchange(a, b, conn)
        })
    }

    /// Like [`Lifecycle::swap_titles`], but the partner is drawn at
    /// random from `candidates` (minus the user themselves). An empty
    /// candidate list means anyone who has not rated their roll this
    /// round is fair game.
    #[tracing::instrument(skip(self))]
    pub fn random_swap(
        &self,
        guild: i64,
        user: i64,
        candidates: &[i64],
    ) -> Result<SwapOutcome, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;
            let round = open_round(&challenge, conn)?;

            let a = roll_party(&challenge, &round, user, conn)?;

            let pool: Vec<i64> = if candidates.is_empty() {
                round
                    .rolls_watchers_submitters(conn)?
                    .into_iter()
                    .filter(|(roll, _, _, _)| roll.score.is_none())
                    .map(|(_, watcher, _, _)| watcher.platform_id)
                    .filter(|&id| id != user)
                    .collect()
            } else {
                candidates
                    .iter()
                    .copied()
                    .filter(|&id| id != user)
                    .collect()
            };

            let mut rng = ChaCha20Rng::from_os_rng();
            let partner = pool.choose(&mut rng).copied().ok_or_else(|| {
                EngineError::conflict("nobody is available to swap with")
            })?;

            let b = roll_party(&challenge, &round, partner, conn)?;

            exchange(a, b, conn)
        })
    }

    /// Hands the participant a fresh random title from the pool instead
    /// of the one they rolled. Their own submissions and the title they
    /// are giving back are never drawn.
    #[tracing::instrument(skip(self))]
    pub fn reroll_title(
        &self,
        guild: i64,
        user: i64,
        pool: Option<&str>,
    ) -> Result<Title, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;
            let round = open_round(&challenge, conn)?;

            let (user, mut participant, mut roll) =
                roll_party(&challenge, &round, user, conn)?;
            if roll.score.is_some() {
                return Err(EngineError::conflict(format!(
                    "{} already rated their title",
                    user.name
                )));
            }

            let pool_name = pool.unwrap_or(&self.config.default_pool);
            let pool = challenge
                .pool_by_name(pool_name, conn)?
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "no pool named {pool_name:?}"
                    ))
                })?;

            let candidates: Vec<Title> = pool
                .unused_titles(conn)?
                .into_iter()
                .filter(|t| t.participant_id != participant.id)
                .collect();

            let mut rng = ChaCha20Rng::from_os_rng();
            let mut title = candidates
                .choose(&mut rng)
                .cloned()
                .ok_or(EngineError::InsufficientTitles {
                    needed: 1,
                    available: 0,
                })?;

            release_title(&roll, conn)?;

            roll.title_id = title.id.clone();
            roll.persist(conn)?;

            title.is_used = true;
            title.persist(conn)?;

            participant.progress_current = None;
            participant.progress_total = None;
            participant.persist(conn)?;

            Ok(title)
        })
    }

    /// Force-assigns a specific title (found fuzzily by name) to the
    /// participant's open roll.
    #[tracing::instrument(skip(self))]
    pub fn set_title(
        &self,
        guild: i64,
        user: i64,
        query: &str,
    ) -> Result<Title, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;
            let round = open_round(&challenge, conn)?;

            let (user, mut participant, mut roll) =
                roll_party(&challenge, &round, user, conn)?;
            if roll.score.is_some() {
                return Err(EngineError::conflict(format!(
                    "{} already rated their title",
                    user.name
                )));
            }

            let candidates = challenge.titles(conn)?;
            let mut title =
                best_match(query, &candidates, self.config.match_threshold)
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::not_found(format!(
                            "no title matching {query:?}"
                        ))
                    })?;

            if title.id == roll.title_id {
                return Err(EngineError::conflict(format!(
                    "{} already has {:?}",
                    user.name, title.name
                )));
            }
            if title.is_used {
                return Err(EngineError::conflict(format!(
                    "title {:?} is already taken",
                    title.name
                )));
            }

            release_title(&roll, conn)?;

            roll.title_id = title.id.clone();
            roll.persist(conn)?;

            title.is_used = true;
            title.persist(conn)?;

            participant.progress_current = None;
            participant.progress_total = None;
            participant.persist(conn)?;

            Ok(title)
        })
    }

    /// Attaches the award image handed to everyone who survives the
    /// current challenge. Works after the challenge has ended, which is
    /// when awards are usually drawn up.
    pub fn set_award(&self, guild: i64, url: &str) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            validation::is_valid_url(url).map_err(EngineError::Invalid)?;

            let (_, mut challenge) = current_challenge_of(guild, conn)?;
            challenge.award_url = Some(url.to_string());
            challenge.persist(conn)?;

            Ok(())
        })
    }

    /// Grants a one-off award directly to a user, outside any challenge.
    pub fn add_award(
        &self,
        user: i64,
        url: &str,
    ) -> Result<Award, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            validation::is_valid_url(url).map_err(EngineError::Invalid)?;

            let user = require_user(user, conn)?;
            Award::grant(&user.id, url, Utc::now().naive_utc(), conn)
                .map_err(EngineError::from)
        })
    }

    pub fn remove_award(
        &self,
        user: i64,
        url: &str,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let user = require_user(user, conn)?;
            match Award::revoke(&user.id, url, conn)? {
                0 => Err(EngineError::not_found(format!(
                    "{} has no award pointing at {url}",
                    user.name
                ))),
                _ => Ok(()),
            }
        })
    }

    /// Lets participants submit hidden titles (or stops them again). The
    /// flag also drops automatically whenever a round starts.
    pub fn set_allow_hidden(
        &self,
        guild: i64,
        value: bool,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, mut challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            challenge.allow_hidden = value;
            challenge.persist(conn)?;

            Ok(())
        })
    }

    pub fn set_spreadsheet_key(
        &self,
        guild: i64,
        key: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let mut guild = Guild::fetch_or_insert(guild, conn)?;
            guild.spreadsheet_key = key.map(str::to_string);
            guild.persist(conn)?;

            Ok(())
        })
    }
}

fn open_round(
    challenge: &Challenge,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Round, EngineError> {
    challenge
        .last_round(conn)?
        .filter(|r| !r.is_finished)
        .ok_or_else(|| EngineError::not_found("no open round"))
}

fn roll_party(
    challenge: &Challenge,
    round: &Round,
    platform_id: i64,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(User, Participant, Roll), EngineError> {
    let user = require_user(platform_id, conn)?;
    let participant = challenge
        .participant_of_user(&user.id, conn)?
        .ok_or_else(|| {
            EngineError::not_found(format!(
                "{} is not in the current challenge",
                user.name
            ))
        })?;
    let roll = round.roll_of(&participant.id, conn)?.ok_or_else(|| {
        EngineError::not_found(format!(
            "nothing was rolled for {} this round",
            user.name
        ))
    })?;

    Ok((user, participant, roll))
}

/// Frees the title a roll points at, unless another roll (an earlier
/// round, say) still references it.
fn release_title(
    roll: &Roll,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> QueryResult<()> {
    if Roll::references_to_title(&roll.title_id, conn)? > 1 {
        return Ok(());
    }

    let mut title = Title::fetch(&roll.title_id, conn)?;
    title.is_used = false;
    title.persist(conn)?;

    Ok(())
}

fn exchange(
    a: (User, Participant, Roll),
    b: (User, Participant, Roll),
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<SwapOutcome, EngineError> {
    let (user_a, mut participant_a, mut roll_a) = a;
    let (user_b, mut participant_b, mut roll_b) = b;

    if roll_a.score.is_some() || roll_b.score.is_some() {
        return Err(EngineError::conflict(
            "one of the titles has already been rated",
        ));
    }

    std::mem::swap(&mut roll_a.title_id, &mut roll_b.title_id);
    roll_a.persist(conn)?;
    roll_b.persist(conn)?;

    for participant in [&mut participant_a, &mut participant_b] {
        participant.progress_current = None;
        participant.progress_total = None;
        participant.persist(conn)?;
    }

    let title_a = roll_a.title(conn)?;
    let title_b = roll_b.title(conn)?;

    Ok(SwapOutcome {
        first: (user_a, title_a),
        second: (user_b, title_b),
    })
}
