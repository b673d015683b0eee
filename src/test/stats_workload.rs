//! Workloads around progress, karma and the derived statistics.

use chrono::{DateTime, Duration};

use crate::{
    challenges::catalog::NewTitle,
    error::EngineError,
    guilds::Guild,
    metadata::TitleInfo,
    test::{FixedMetadata, GUILD, Harness},
};

const ALICE: i64 = 1;
const BOB: i64 = 2;
const CAROL: i64 = 3;

fn submit(harness: &Harness, user: i64, title: &str) {
    harness
        .catalog()
        .add_title(
            GUILD,
            user,
            NewTitle {
                name: Some(title.to_string()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
}

#[test]
fn test_progress_tracking() {
    let harness = Harness::with_challenge("Spring");
    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();
    harness.roster().add_user(GUILD, BOB, "bob").unwrap();
    submit(&harness, ALICE, "A");
    submit(&harness, BOB, "B");
    harness.engine().start_round(GUILD, 7, None).unwrap();

    harness.roster().set_progress(GUILD, ALICE, 3, Some(12)).unwrap();
    let alice = harness.roster().add_progress(GUILD, ALICE, 1).unwrap();
    assert_eq!(alice.progress_current, Some(4));
    assert_eq!(alice.progress_total, Some(12));

    // A bare count is fine when the length is unknown.
    let bob = harness.roster().set_progress(GUILD, BOB, 5, None).unwrap();
    assert_eq!(bob.progress_current, Some(5));
    assert_eq!(bob.progress_total, None);

    assert!(matches!(
        harness
            .roster()
            .set_progress(GUILD, ALICE, 13, Some(12))
            .unwrap_err(),
        EngineError::Invalid(_)
    ));
    assert!(matches!(
        harness.roster().add_progress(GUILD, BOB, -10).unwrap_err(),
        EngineError::Invalid(_)
    ));

    let table = harness.stats().progress_table(GUILD).unwrap();
    let rows: Vec<(&str, Option<i64>, Option<i64>)> = table
        .iter()
        .map(|row| (row.user.name.as_str(), row.current, row.total))
        .collect();
    assert_eq!(
        rows,
        vec![("alice", Some(4), Some(12)), ("bob", Some(5), None)]
    );

    // Finishing the title counts as surviving the round, rating or not.
    harness.roster().set_progress(GUILD, BOB, 12, Some(12)).unwrap();
    let outcome = harness.engine().end_round(GUILD).unwrap();
    let failed: Vec<&str> =
        outcome.failed.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(failed, vec!["alice"]);

    assert!(matches!(
        harness.roster().set_progress(GUILD, ALICE, 5, Some(12)).unwrap_err(),
        EngineError::Conflict(_)
    ));
}

#[test]
fn test_karma_overwrite_at_same_instant() {
    let harness = Harness::with_challenge("Spring");
    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();
    harness.roster().add_user(GUILD, BOB, "bob").unwrap();

    let t = DateTime::from_timestamp(1_700_000_000, 0).unwrap().naive_utc();

    harness.karma().record(ALICE, 1.0, Some(t)).unwrap();
    harness.karma().record(ALICE, 5.0, Some(t)).unwrap();

    // Exactly one row for that instant, holding the later value.
    let history = harness.karma().history(ALICE).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].karma, 5.0);
    assert_eq!(harness.karma().current(ALICE).unwrap(), 5.0);

    harness
        .karma()
        .record(ALICE, 7.0, Some(t + Duration::days(1)))
        .unwrap();
    assert_eq!(harness.karma().current(ALICE).unwrap(), 7.0);
    assert_eq!(harness.karma().history(ALICE).unwrap().len(), 2);

    // No history at all falls back to the starting value.
    assert_eq!(harness.karma().current(BOB).unwrap(), 0.0);
    assert!(matches!(
        harness.karma().current(CAROL).unwrap_err(),
        EngineError::NotFound(_)
    ));

    assert_eq!(harness.karma().clear_history(ALICE).unwrap(), 2);
    assert!(harness.karma().history(ALICE).unwrap().is_empty());
    assert_eq!(harness.karma().current(ALICE).unwrap(), 0.0);
}

#[test]
fn test_recalc_replays_the_timeline() {
    let harness = Harness::with_challenge("Spring");
    for (id, name) in [(ALICE, "alice"), (BOB, "bob"), (CAROL, "carol")] {
        harness.roster().add_user(GUILD, id, name).unwrap();
    }
    for title in ["A1", "A2"] {
        submit(&harness, ALICE, title);
    }
    for title in ["B1", "B2"] {
        submit(&harness, BOB, title);
    }
    for title in ["C1", "C2"] {
        submit(&harness, CAROL, title);
    }

    // Round one: everyone rates, nobody falls.
    harness.engine().start_round(GUILD, 7, None).unwrap();
    harness.engine().rate(GUILD, ALICE, 8.0).unwrap();
    harness.engine().rate(GUILD, BOB, 6.0).unwrap();
    harness.engine().rate(GUILD, CAROL, 9.0).unwrap();
    assert!(harness.engine().end_round(GUILD).unwrap().failed.is_empty());

    // Round two: a rating, a completion, a failure.
    harness.engine().start_round(GUILD, 7, None).unwrap();
    harness.engine().rate(GUILD, ALICE, 7.0).unwrap();
    harness.roster().set_progress(GUILD, BOB, 1, Some(1)).unwrap();
    let outcome = harness.engine().end_round(GUILD).unwrap();
    let failed: Vec<&str> =
        outcome.failed.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(failed, vec!["carol"]);

    assert_eq!(harness.karma().recalc_guild(GUILD).unwrap(), 3);

    // Rated rolls pay one, the failure takes one back.
    assert_eq!(harness.karma().current(ALICE).unwrap(), 2.0);
    assert_eq!(harness.karma().current(BOB).unwrap(), 1.0);
    assert_eq!(harness.karma().current(CAROL).unwrap(), 0.0);

    let alice_history: Vec<f64> = harness
        .karma()
        .history(ALICE)
        .unwrap()
        .iter()
        .map(|entry| entry.karma)
        .collect();
    assert_eq!(alice_history, vec![1.0, 2.0]);
    let carol_history: Vec<f64> = harness
        .karma()
        .history(CAROL)
        .unwrap()
        .iter()
        .map(|entry| entry.karma)
        .collect();
    assert_eq!(carol_history, vec![1.0, 0.0]);

    // Running it again lands on the same rows.
    harness.karma().recalc_guild(GUILD).unwrap();
    assert_eq!(harness.karma().history(ALICE).unwrap().len(), 2);
    assert_eq!(harness.karma().current(ALICE).unwrap(), 2.0);
    assert_eq!(harness.karma().current(CAROL).unwrap(), 0.0);

    let table = harness.stats().karma_table(GUILD).unwrap();
    let rows: Vec<(&str, f64)> = table
        .iter()
        .map(|row| (row.user.name.as_str(), row.karma))
        .collect();
    assert_eq!(rows, vec![("alice", 2.0), ("bob", 1.0), ("carol", 0.0)]);
}

#[test]
fn test_recalc_spans_guilds() {
    const OTHER: i64 = 200;

    let harness = Harness::with_challenge("Spring");
    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();
    harness.roster().add_user(GUILD, BOB, "bob").unwrap();
    submit(&harness, ALICE, "A");
    submit(&harness, BOB, "B");
    harness.engine().start_round(GUILD, 7, None).unwrap();
    harness.engine().rate(GUILD, ALICE, 8.0).unwrap();
    harness.engine().rate(GUILD, BOB, 7.0).unwrap();
    harness.engine().end_round(GUILD).unwrap();

    // alice also plays in a second guild.
    harness.lifecycle().start_challenge(OTHER, "Parallel").unwrap();
    harness.roster().add_user(OTHER, ALICE, "alice").unwrap();
    harness.roster().add_user(OTHER, CAROL, "carol").unwrap();
    for (user, title) in [(ALICE, "PA"), (CAROL, "PC")] {
        harness
            .catalog()
            .add_title(
                OTHER,
                user,
                NewTitle {
                    name: Some(title.to_string()),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
    }
    harness.engine().start_round(OTHER, 7, None).unwrap();
    harness.engine().rate(OTHER, ALICE, 6.0).unwrap();
    harness.engine().rate(OTHER, CAROL, 9.0).unwrap();
    harness.engine().end_round(OTHER).unwrap();

    // A manual correction sitting past every round.
    let t = DateTime::from_timestamp(4_000_000_000, 0).unwrap().naive_utc();
    harness.karma().record(ALICE, 10.0, Some(t)).unwrap();

    // Recalculating either guild leaves the other guild's rows and the
    // manual one standing.
    harness.karma().recalc_guild(GUILD).unwrap();
    harness.karma().recalc_guild(OTHER).unwrap();

    let totals: Vec<f64> = harness
        .karma()
        .history(ALICE)
        .unwrap()
        .iter()
        .map(|entry| entry.karma)
        .collect();
    assert_eq!(totals, vec![1.0, 2.0, 10.0]);
    assert_eq!(harness.karma().current(ALICE).unwrap(), 10.0);
    assert_eq!(harness.karma().current(CAROL).unwrap(), 1.0);
}

#[test]
fn test_difficulty_table() {
    let harness = Harness::with_challenge("Spring");
    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();
    harness.roster().add_user(GUILD, BOB, "bob").unwrap();

    let akira = FixedMetadata(TitleInfo {
        name: "Akira".to_string(),
        score: Some(8.1),
        duration: Some(124),
        num_of_episodes: Some(1),
        difficulty: Some(62),
    });
    let monster = FixedMetadata(TitleInfo {
        name: "Monster".to_string(),
        score: Some(8.8),
        duration: Some(1628),
        num_of_episodes: Some(74),
        difficulty: Some(90),
    });

    harness
        .catalog()
        .add_title(
            GUILD,
            ALICE,
            NewTitle {
                url: Some("https://example.org/akira".to_string()),
                ..Default::default()
            },
            Some(&akira),
        )
        .unwrap();
    harness
        .catalog()
        .add_title(
            GUILD,
            BOB,
            NewTitle {
                url: Some("https://example.org/monster".to_string()),
                ..Default::default()
            },
            Some(&monster),
        )
        .unwrap();
    // No metadata, no difficulty, no ranking entry.
    submit(&harness, ALICE, "Plain");

    let table = harness
        .stats()
        .difficulty_table(GUILD, None, None, false)
        .unwrap();
    let rows: Vec<(&str, Option<i64>)> = table
        .iter()
        .map(|row| (row.title.name.as_str(), row.title.difficulty))
        .collect();
    assert_eq!(rows, vec![("Monster", Some(90)), ("Akira", Some(62))]);

    let easiest_first = harness
        .stats()
        .difficulty_table(GUILD, None, None, true)
        .unwrap();
    assert_eq!(easiest_first[0].title.name, "Akira");

    let mine = harness
        .stats()
        .difficulty_table(GUILD, None, Some(ALICE), false)
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].title.name, "Akira");
    assert_eq!(mine[0].submitter.name, "alice");

    assert!(matches!(
        harness
            .stats()
            .difficulty_table(GUILD, Some("Nope"), None, false)
            .unwrap_err(),
        EngineError::NotFound(_)
    ));

    // Past challenges stay addressable by name.
    harness.lifecycle().end_challenge(GUILD).unwrap();
    harness.lifecycle().start_challenge(GUILD, "Summer").unwrap();
    let by_name = harness
        .stats()
        .difficulty_table(GUILD, Some("Spring"), None, false)
        .unwrap();
    assert_eq!(by_name.len(), 2);
}

#[test]
fn test_round_summary() {
    let harness = Harness::with_challenge("Spring");
    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();
    harness.roster().add_user(GUILD, BOB, "bob").unwrap();

    assert!(matches!(
        harness.stats().round_summary(GUILD, None).unwrap_err(),
        EngineError::NotFound(_)
    ));

    for title in ["A1", "A2"] {
        submit(&harness, ALICE, title);
    }
    for title in ["B1", "B2"] {
        submit(&harness, BOB, title);
    }
    harness.engine().start_round(GUILD, 7, None).unwrap();
    harness.engine().rate(GUILD, ALICE, 8.0).unwrap();
    harness.engine().rate(GUILD, BOB, 7.0).unwrap();
    harness.engine().end_round(GUILD).unwrap();
    harness.engine().start_round(GUILD, 7, None).unwrap();

    let latest = harness.stats().round_summary(GUILD, None).unwrap();
    assert_eq!(latest.round.num, 2);
    let watchers: Vec<&str> = latest
        .rows
        .iter()
        .map(|(_, watcher, _, _)| watcher.name.as_str())
        .collect();
    assert_eq!(watchers, vec!["alice", "bob"]);

    let first = harness.stats().round_summary(GUILD, Some(1)).unwrap();
    assert_eq!(first.round.num, 1);
    assert!(first.rows.iter().all(|(roll, _, _, _)| roll.score.is_some()));

    assert!(matches!(
        harness.stats().round_summary(GUILD, Some(5)).unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[test]
fn test_user_profile() {
    let harness = Harness::with_challenge("Spring");
    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();
    harness.roster().add_user(GUILD, BOB, "bob").unwrap();
    for title in ["A1", "A2"] {
        submit(&harness, ALICE, title);
    }
    for title in ["B1", "B2"] {
        submit(&harness, BOB, title);
    }

    harness.engine().start_round(GUILD, 7, None).unwrap();
    harness.engine().rate(GUILD, ALICE, 8.0).unwrap();
    harness.engine().rate(GUILD, BOB, 6.0).unwrap();
    harness.engine().end_round(GUILD).unwrap();

    let second = harness.engine().start_round(GUILD, 7, None).unwrap();

    // Mid-round, an active participant sees the deadline.
    let (_, stats) = harness.stats().user_profile(GUILD, ALICE).unwrap();
    assert_eq!(stats.finish_time, Some(second.round.finish_time));

    harness.engine().rate(GUILD, ALICE, 9.0).unwrap();
    harness.engine().end_round(GUILD).unwrap();
    harness.lifecycle().end_challenge(GUILD).unwrap();

    harness
        .lifecycle()
        .set_award(GUILD, "https://example.org/spring.png")
        .unwrap();
    harness
        .lifecycle()
        .add_award(BOB, "https://example.org/heart.png")
        .unwrap();
    harness.karma().recalc_guild(GUILD).unwrap();

    let (user, stats) = harness.stats().user_profile(GUILD, ALICE).unwrap();
    assert_eq!(user.name, "alice");
    assert_eq!(stats.num_challenges, 1);
    assert_eq!(stats.num_completed, 1);
    assert_eq!(stats.avg_rate, Some(8.5));
    assert_eq!(stats.avg_title_score, Some(6.0));
    assert_eq!(stats.most_watched.len(), 1);
    assert_eq!(stats.most_watched[0].name, "bob");
    assert_eq!(stats.most_watched[0].count, 2);
    assert_eq!(stats.most_sniped[0].name, "bob");
    assert_eq!(stats.most_sniped[0].count, 2);
    assert_eq!(stats.karma, 2.0);
    assert_eq!(stats.awards, vec!["https://example.org/spring.png"]);
    assert_eq!(stats.finish_time, None);

    let (_, stats) = harness.stats().user_profile(GUILD, BOB).unwrap();
    assert_eq!(stats.num_challenges, 1);
    assert_eq!(stats.num_completed, 0);
    assert_eq!(stats.avg_rate, Some(6.0));
    assert_eq!(stats.avg_title_score, Some(8.5));
    assert_eq!(stats.karma, 0.0);
    // Failed the challenge, so no challenge award; the direct one stays.
    assert_eq!(stats.awards, vec!["https://example.org/heart.png"]);

    // Unknown guild: the cross-guild numbers still stand, the
    // guild-scoped extras drop away.
    let (_, stats) = harness.stats().user_profile(GUILD + 1, ALICE).unwrap();
    assert_eq!(stats.num_challenges, 1);
    assert!(stats.awards.is_empty());
    assert_eq!(stats.finish_time, None);
}

#[test]
fn test_direct_award_lifecycle() {
    const MEDAL: &str = "https://example.org/medal.png";

    let harness = Harness::with_challenge("Spring");
    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();

    assert!(matches!(
        harness.lifecycle().add_award(ALICE, "medal.png").unwrap_err(),
        EngineError::Invalid(_)
    ));
    assert!(matches!(
        harness.lifecycle().add_award(BOB, MEDAL).unwrap_err(),
        EngineError::NotFound(_)
    ));

    harness.lifecycle().add_award(ALICE, MEDAL).unwrap();
    let (_, stats) = harness.stats().user_profile(GUILD, ALICE).unwrap();
    assert_eq!(stats.awards, vec![MEDAL]);

    // Revoking wants the exact url of a granted award.
    assert!(matches!(
        harness
            .lifecycle()
            .remove_award(ALICE, "https://example.org/other.png")
            .unwrap_err(),
        EngineError::NotFound(_)
    ));

    harness.lifecycle().remove_award(ALICE, MEDAL).unwrap();
    let (_, stats) = harness.stats().user_profile(GUILD, ALICE).unwrap();
    assert!(stats.awards.is_empty());

    // A second revoke finds nothing left.
    assert!(matches!(
        harness.lifecycle().remove_award(ALICE, MEDAL).unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[test]
fn test_color_and_spreadsheet_settings() {
    let harness = Harness::with_challenge("Spring");
    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();

    assert!(matches!(
        harness.roster().set_color(ALICE, "red").unwrap_err(),
        EngineError::Invalid(_)
    ));

    harness.roster().set_color(ALICE, "#1a2B3c").unwrap();
    let (alice, _) = harness.stats().user_profile(GUILD, ALICE).unwrap();
    assert_eq!(alice.color, "#1a2B3c");

    // The sheet key is per guild and overwritable.
    harness
        .lifecycle()
        .set_spreadsheet_key(GUILD, Some("sheet-1"))
        .unwrap();
    harness
        .lifecycle()
        .set_spreadsheet_key(GUILD, Some("sheet-2"))
        .unwrap();

    let mut conn = harness.pool.get().unwrap();
    let guild = Guild::by_platform_id(GUILD, &mut conn).unwrap().unwrap();
    assert_eq!(guild.spreadsheet_key.as_deref(), Some("sheet-2"));
    drop(conn);

    harness.lifecycle().set_spreadsheet_key(GUILD, None).unwrap();
    let mut conn = harness.pool.get().unwrap();
    let guild = Guild::by_platform_id(GUILD, &mut conn).unwrap().unwrap();
    assert_eq!(guild.spreadsheet_key, None);
}

#[test]
fn test_stats_tolerate_empty_sets() {
    let harness = Harness::with_challenge("Spring");

    assert!(harness.stats().progress_table(GUILD).unwrap().is_empty());
    assert!(harness.stats().karma_table(GUILD).unwrap().is_empty());
    assert!(
        harness
            .stats()
            .difficulty_table(GUILD, None, None, false)
            .unwrap()
            .is_empty()
    );
    assert!(matches!(
        harness.stats().user_profile(GUILD, ALICE).unwrap_err(),
        EngineError::NotFound(_)
    ));

    harness.roster().add_user(GUILD, ALICE, "alice").unwrap();
    let (_, stats) = harness.stats().user_profile(GUILD, ALICE).unwrap();
    assert_eq!(stats.num_challenges, 1);
    assert_eq!(stats.num_completed, 0);
    assert_eq!(stats.avg_rate, None);
    assert_eq!(stats.avg_title_score, None);
    assert!(stats.most_watched.is_empty());
    assert!(stats.most_sniped.is_empty());
    assert_eq!(stats.karma, 0.0);
    assert!(stats.awards.is_empty());
    assert_eq!(stats.finish_time, None);

    let guilds = harness.roster().active_guilds(ALICE).unwrap();
    assert_eq!(guilds.len(), 1);
    assert_eq!(guilds[0].platform_id, GUILD);
}
