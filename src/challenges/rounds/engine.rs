use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha20Rng;

use crate::{
    challenges::{
        catalog::Title,
        current_challenge_of, require_running,
        roster::{BannedUser, Participant, require_user},
        rounds::{Roll, Round},
    },
    config::EngineConfig,
    error::EngineError,
    record::Record,
    state::DbPool,
    users::User,
    validation,
};

const MAX_SHUFFLE_ATTEMPTS: usize = 100;

/// Draws one title per participant, uniformly at random among the
/// assignments where nobody receives their own submission.
///
/// A fresh shuffle is tried first; retrying rejected shuffles keeps the
/// draw uniform. When valid draws are thin on the ground (two players
/// with one title each) the swap pass finishes deterministically.
pub fn assign_titles(
    participants: &[Participant],
    titles: &[Title],
    rng: &mut ChaCha20Rng,
) -> Result<Vec<usize>, EngineError> {
    if participants.is_empty() {
        return Err(EngineError::conflict("there is nobody to roll for"));
    }
    if titles.len() < participants.len() {
        return Err(EngineError::InsufficientTitles {
            needed: participants.len(),
            available: titles.len(),
        });
    }

    // With enough titles overall, the draw is only impossible when some
    // participant submitted every single unused title themselves.
    for participant in participants {
        if titles.iter().all(|t| t.participant_id == participant.id) {
            return Err(EngineError::conflict(
                "every unused title in the pool came from the same participant",
            ));
        }
    }

    let n = participants.len();
    let mut order: Vec<usize> = (0..titles.len()).collect();

    let own = |slot: usize, title_idx: usize| {
        titles[title_idx].participant_id == participants[slot].id
    };

    for _ in 0..MAX_SHUFFLE_ATTEMPTS {
        order.shuffle(rng);
        if (0..n).all(|i| !own(i, order[i])) {
            return Ok(order[..n].to_vec());
        }
    }

    // Repair the last shuffle violation by violation. The checks above
    // guarantee each one has a resolving swap partner.
    for i in 0..n {
        if !own(i, order[i]) {
            continue;
        }

        let partner = (0..order.len()).find(|&k| {
            k != i && !own(i, order[k]) && (k >= n || !own(k, order[i]))
        });

        match partner {
            Some(k) => order.swap(i, k),
            None => {
                return Err(EngineError::conflict(
                    "could not draw titles without self-assignments",
                ));
            }
        }
    }

    Ok(order[..n].to_vec())
}

/// What a freshly started round looks like to the channel: everyone's
/// assignment, keyed by user name.
#[derive(Debug)]
pub struct RoundReveal {
    pub round: Round,
    pub assignments: BTreeMap<String, String>,
}

/// Who fell out when a round was closed.
#[derive(Debug)]
pub struct RoundOutcome {
    pub round: Round,
    pub failed: Vec<User>,
}

/// Runs rounds inside a guild's current challenge: rolling titles,
/// collecting ratings and closing the books.
pub struct RoundEngine {
    pool: DbPool,
    config: EngineConfig,
}

impl RoundEngine {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        RoundEngine { pool, config }
    }

    /// Starts a round of `days` days, rolling a title for every active,
    /// unbanned participant from the given pool (or the default one).
    /// Hidden titles go public the moment they are rolled, so the
    /// challenge's hidden flag resets too.
    #[tracing::instrument(skip(self))]
    pub fn start_round(
        &self,
        guild: i64,
        days: i64,
        pool: Option<&str>,
    ) -> Result<RoundReveal, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            if days < 1 {
                return Err(EngineError::invalid(
                    "a round has to run for at least a day",
                ));
            }
            let now = Utc::now().naive_utc();
            let finish = add_days(now, days)?;

            let (_, mut challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let last = challenge.last_round(conn)?;
            if let Some(last) = &last {
                if !last.is_finished {
                    return Err(EngineError::conflict(format!(
                        "round {} is still running",
                        last.num
                    )));
                }
            }

            let pool_name = pool.unwrap_or(&self.config.default_pool);
            let pool = challenge
                .pool_by_name(pool_name, conn)?
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "no pool named {pool_name:?}"
                    ))
                })?;

            let banned: HashSet<String> =
                BannedUser::users_of_challenge(&challenge.id, conn)?
                    .into_iter()
                    .map(|user| user.id)
                    .collect();
            let roster: Vec<(Participant, User)> = challenge
                .active_participants(conn)?
                .into_iter()
                .filter(|(_, user)| !banned.contains(&user.id))
                .collect();

            let titles = pool.unused_titles(conn)?;
            let participants: Vec<Participant> =
                roster.iter().map(|(p, _)| p.clone()).collect();

            let mut rng = ChaCha20Rng::from_os_rng();
            let picks = assign_titles(&participants, &titles, &mut rng)?;

            let num = last.map(|r| r.num + 1).unwrap_or(1);
            let round =
                Round::insert(&challenge.id, num, now, finish, conn)?;

            let mut assignments = BTreeMap::new();
            for ((mut participant, user), title_idx) in
                roster.into_iter().zip(picks)
            {
                let mut title = titles[title_idx].clone();

                Roll::insert(&round.id, &participant.id, &title.id, conn)?;

                title.is_used = true;
                title.persist(conn)?;

                participant.progress_current = None;
                participant.progress_total = None;
                participant.persist(conn)?;

                assignments.insert(user.name, title.name);
            }

            if challenge.allow_hidden {
                challenge.allow_hidden = false;
                challenge.persist(conn)?;
            }

            tracing::debug!(round = num, "started round");

            Ok(RoundReveal { round, assignments })
        })
    }

    /// Closes the open round. Whoever neither rated their roll nor
    /// finished watching it fails the challenge here.
    #[tracing::instrument(skip(self))]
    pub fn end_round(&self, guild: i64) -> Result<RoundOutcome, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let mut round = challenge
                .last_round(conn)?
                .filter(|r| !r.is_finished)
                .ok_or_else(|| EngineError::not_found("no open round"))?;

            let mut failed = Vec::new();
            for roll in round.rolls(conn)? {
                let mut participant =
                    Participant::fetch(&roll.participant_id, conn)?;
                if participant.has_failed() {
                    continue;
                }
                if roll.score.is_some() || participant.has_completed() {
                    continue;
                }

                participant.failed_round_id = Some(round.id.clone());
                participant.persist(conn)?;
                failed.push(participant.user(conn)?);
            }

            round.is_finished = true;
            round.persist(conn)?;

            tracing::debug!(
                round = round.num,
                failures = failed.len(),
                "finished round"
            );

            Ok(RoundOutcome { round, failed })
        })
    }

    pub fn extend_round(
        &self,
        guild: i64,
        days: i64,
    ) -> Result<Round, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            if days < 1 {
                return Err(EngineError::invalid(
                    "a round can only be extended forwards",
                ));
            }

            let (_, challenge) = current_challenge_of(guild, conn)?;
            require_running(&challenge)?;

            let mut round = challenge
                .last_round(conn)?
                .filter(|r| !r.is_finished)
                .ok_or_else(|| EngineError::not_found("no open round"))?;

            round.finish_time = add_days(round.finish_time, days)?;
            round.persist(conn)?;

            Ok(round)
        })
    }

    /// Records how `user` rated the title rolled for them in the latest
    /// round. Rating after the round closed is fine; a failure already
    /// handed out stays.
    #[tracing::instrument(skip(self))]
    pub fn rate(
        &self,
        guild: i64,
        user: i64,
        score: f32,
    ) -> Result<Title, EngineError> {
        let mut conn = self.pool.get()?;

        conn.transaction(|conn| {
            validation::is_valid_score(score).map_err(EngineError::Invalid)?;

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

            let round = challenge.last_round(conn)?.ok_or_else(|| {
                EngineError::not_found("no round has been rolled yet")
            })?;

            let mut roll = round
                .roll_of(&participant.id, conn)?
                .ok_or_else(|| {
                    EngineError::not_found(format!(
                        "nothing was rolled for {} this round",
                        user.name
                    ))
                })?;

            roll.score = Some(score);
            roll.persist(conn)?;

            roll.title(conn).map_err(EngineError::from)
        })
    }
}

/// `start` pushed `days` days ahead, refused once it falls off the
/// calendar.
fn add_days(
    start: NaiveDateTime,
    days: i64,
) -> Result<NaiveDateTime, EngineError> {
    Duration::try_days(days)
        .and_then(|delta| start.checked_add_signed(delta))
        .ok_or_else(|| EngineError::invalid("cannot schedule that far ahead"))
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::assign_titles;
    use crate::{
        challenges::{catalog::Title, roster::Participant},
        error::EngineError,
    };

    fn participant(i: usize) -> Participant {
        Participant {
            id: format!("p{i}"),
            challenge_id: "c".to_string(),
            user_id: format!("u{i}"),
            failed_round_id: None,
            progress_current: None,
            progress_total: None,
        }
    }

    fn title(i: usize, submitter: usize) -> Title {
        Title {
            id: format!("t{i}"),
            pool_id: "pool".to_string(),
            participant_id: format!("p{submitter}"),
            name: format!("title {i}"),
            url: None,
            is_used: false,
            is_hidden: false,
            score: None,
            duration: None,
            num_of_episodes: None,
            difficulty: None,
        }
    }

    #[test]
    fn test_two_participants_must_swap() {
        let participants = vec![participant(0), participant(1)];
        let titles = vec![title(0, 0), title(1, 1)];

        for seed in 0..50 {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let picks =
                assign_titles(&participants, &titles, &mut rng).unwrap();
            assert_eq!(picks, vec![1, 0]);
        }
    }

    #[test]
    fn test_never_assigns_own_title() {
        let participants: Vec<_> = (0..6).map(participant).collect();
        let titles: Vec<_> = (0..10).map(|i| title(i, i % 6)).collect();

        for seed in 0..100 {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let picks =
                assign_titles(&participants, &titles, &mut rng).unwrap();

            assert_eq!(picks.len(), participants.len());
            let mut seen = std::collections::HashSet::new();
            for (slot, &pick) in picks.iter().enumerate() {
                assert_ne!(
                    titles[pick].participant_id,
                    participants[slot].id
                );
                assert!(seen.insert(pick));
            }
        }
    }

    #[test]
    fn test_too_few_titles() {
        let participants: Vec<_> = (0..3).map(participant).collect();
        let titles = vec![title(0, 0), title(1, 1)];

        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let err =
            assign_titles(&participants, &titles, &mut rng).unwrap_err();
        match err {
            EngineError::InsufficientTitles { needed, available } => {
                assert_eq!(needed, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientTitles, got {other:?}"),
        }
    }

    #[test]
    fn test_sole_submitter_cannot_roll() {
        let participants = vec![participant(0)];
        let titles = vec![title(0, 0), title(1, 0)];

        let mut rng = ChaCha20Rng::seed_from_u64(0);
        assert!(matches!(
            assign_titles(&participants, &titles, &mut rng),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn test_empty_roster() {
        let titles = vec![title(0, 0)];
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        assert!(matches!(
            assign_titles(&[], &titles, &mut rng),
            Err(EngineError::Conflict(_))
        ));
    }
}
