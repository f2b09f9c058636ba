use chrono::NaiveDate;
use progressd::badges::{BadgePatch, NewBadge};
use progressd::config::{AwardRule, AwardTrigger};
use progressd::streak::StreakKind;
use progressd::{AttendanceStatus, Engine, EngineError, ProgressEvent};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn open_engine(prefix: &str) -> (PathBuf, Engine) {
    let workspace = temp_dir(prefix);
    let engine = Engine::open(&workspace).expect("open engine");
    engine.register_student("s1", "Grace Hopper", true).expect("register");
    (workspace, engine)
}

fn new_badge(name: &str, xp_reward: i64, repeatable: bool) -> NewBadge {
    NewBadge {
        name: name.to_string(),
        description: format!("{} badge", name),
        icon: "star".to_string(),
        xp_reward,
        is_active: true,
        repeatable,
    }
}

fn present(d: u32) -> ProgressEvent {
    ProgressEvent::AttendanceMarked {
        status: AttendanceStatus::Present,
        date: NaiveDate::from_ymd_opt(2026, 9, d).expect("valid date"),
        subject_id: None,
    }
}

/// Links a three-day attendance rule worth `xp_reward` to `badge_id`.
fn link_streak_rule(engine: &Engine, badge_id: &str, xp_reward: i64) {
    let mut cfg = engine.config().expect("config");
    cfg.rules = vec![AwardRule {
        id: "attend3".to_string(),
        title: "Three in a Row".to_string(),
        description: String::new(),
        xp_reward,
        trigger: AwardTrigger::StreakReached {
            kind: StreakKind::Attendance,
            days: 3,
        },
        repeatable: false,
        badge_id: Some(badge_id.to_string()),
    }];
    engine.update_config(&cfg).expect("update config");
}

fn set_active(engine: &Engine, badge_id: &str, active: bool) {
    engine
        .update_badge(
            badge_id,
            &BadgePatch {
                is_active: Some(active),
                ..BadgePatch::default()
            },
        )
        .expect("toggle badge");
}

#[test]
fn unused_badge_can_be_deleted() {
    let (workspace, engine) = open_engine("badges-delete-unused");
    let badge = engine.create_badge(&new_badge("Helper", 0, false)).expect("create");
    engine.delete_badge(&badge.id).expect("delete");
    assert!(matches!(
        engine.get_badge(&badge.id),
        Err(EngineError::NotFound { entity: "badge", .. })
    ));
    assert!(matches!(
        engine.delete_badge(&badge.id),
        Err(EngineError::NotFound { .. })
    ));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn awarded_badge_cannot_be_deleted_only_deactivated() {
    let (workspace, engine) = open_engine("badges-delete-guard");
    let badge = engine.create_badge(&new_badge("Mentor", 20, false)).expect("create");
    let grant = engine.grant_badge("s1", &badge.id, "staff-1").expect("grant");
    assert!(grant.newly_awarded);
    assert_eq!(grant.achievement.granted_by.as_deref(), Some("staff-1"));

    match engine.delete_badge(&badge.id) {
        Err(EngineError::BadgeInUse {
            badge_id,
            usage_count,
        }) => {
            assert_eq!(badge_id, badge.id);
            assert_eq!(usage_count, 1);
        }
        other => panic!("expected BadgeInUse, got {:?}", other),
    }
    assert_eq!(engine.list_achievements("s1").expect("list").len(), 1);

    let updated = engine
        .update_badge(
            &badge.id,
            &BadgePatch {
                is_active: Some(false),
                ..BadgePatch::default()
            },
        )
        .expect("deactivate");
    assert!(!updated.is_active);
    assert!(updated.updated_at.is_some());
    assert!(engine.list_badges(false).expect("active badges").is_empty());
    assert_eq!(engine.list_badges(true).expect("all badges").len(), 1);

    assert!(matches!(
        engine.grant_badge("s1", &badge.id, "staff-1"),
        Err(EngineError::InvalidEvent(_))
    ));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn one_time_badge_grant_is_idempotent() {
    let (workspace, engine) = open_engine("badges-one-time");
    let badge = engine.create_badge(&new_badge("Founder", 15, false)).expect("create");
    let first = engine.grant_badge("s1", &badge.id, "staff-1").expect("grant");
    let second = engine.grant_badge("s1", &badge.id, "staff-2").expect("regrant");
    assert!(!second.newly_awarded);
    assert_eq!(second.achievement.id, first.achievement.id);
    assert_eq!(engine.get_progress("s1").expect("progress").total_xp, 15);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn repeatable_badge_takes_next_occurrence() {
    let (workspace, engine) = open_engine("badges-repeatable");
    let badge = engine
        .create_badge(&new_badge("Star of the Week", 10, true))
        .expect("create");
    let first = engine.grant_badge("s1", &badge.id, "staff-1").expect("grant 1");
    let second = engine.grant_badge("s1", &badge.id, "staff-1").expect("grant 2");
    assert!(first.newly_awarded && second.newly_awarded);
    assert_eq!(first.achievement.occurrence, 1);
    assert_eq!(second.achievement.occurrence, 2);
    assert_eq!(engine.get_progress("s1").expect("progress").total_xp, 20);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn revoking_reverses_reward_and_allows_regrant() {
    let (workspace, engine) = open_engine("badges-revoke");
    let badge = engine.create_badge(&new_badge("Explorer", 25, false)).expect("create");
    let grant = engine.grant_badge("s1", &badge.id, "staff-1").expect("grant");

    let revocation = engine
        .revoke_achievement("s1", &grant.achievement.id)
        .expect("revoke");
    assert_eq!(revocation.xp_reversed, 25);
    assert_eq!(engine.get_progress("s1").expect("progress").total_xp, 0);
    assert!(engine.list_achievements("s1").expect("list").is_empty());
    // Reward entry plus its offset; the ledger never loses history.
    assert_eq!(engine.list_ledger("s1").expect("ledger").len(), 2);

    assert!(matches!(
        engine.revoke_achievement("s1", &grant.achievement.id),
        Err(EngineError::NotFound { .. })
    ));
    engine.delete_badge(&badge.id).expect("delete once unused");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn badges_referenced_by_rules_are_guarded() {
    let (workspace, engine) = open_engine("badges-rule-reference");
    let badge = engine.create_badge(&new_badge("Regular", 0, false)).expect("create");
    let mut cfg = engine.config().expect("config");
    cfg.rules.push(AwardRule {
        id: "attend10".to_string(),
        title: "Regular".to_string(),
        description: String::new(),
        xp_reward: 0,
        trigger: AwardTrigger::StreakReached {
            kind: StreakKind::Attendance,
            days: 10,
        },
        repeatable: false,
        badge_id: Some(badge.id.clone()),
    });
    engine.update_config(&cfg).expect("update config");
    assert!(matches!(
        engine.delete_badge(&badge.id),
        Err(EngineError::Configuration(_))
    ));

    cfg.rules.last_mut().expect("rule").badge_id = Some("missing".to_string());
    assert!(matches!(
        engine.update_config(&cfg),
        Err(EngineError::Configuration(_))
    ));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn badge_fields_are_validated() {
    let (workspace, engine) = open_engine("badges-validation");
    assert!(matches!(
        engine.create_badge(&new_badge("  ", 0, false)),
        Err(EngineError::InvalidEvent(_))
    ));
    assert!(matches!(
        engine.create_badge(&new_badge("Negative", -5, false)),
        Err(EngineError::InvalidEvent(_))
    ));
    assert!(matches!(
        engine.grant_badge("s1", "no-such-badge", "staff-1"),
        Err(EngineError::NotFound { .. })
    ));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn rules_skip_inactive_badges_until_reactivated() {
    let (workspace, engine) = open_engine("badges-rule-inactive");
    let badge = engine.create_badge(&new_badge("Steady", 50, false)).expect("create");
    link_streak_rule(&engine, &badge.id, 50);
    set_active(&engine, &badge.id, false);

    for d in 1..=3 {
        let outcome = engine.apply_event("s1", &present(d), None).expect("apply");
        assert!(outcome.achievements.is_empty());
    }
    assert!(engine.list_achievements("s1").expect("list").is_empty());
    assert_eq!(engine.get_progress("s1").expect("progress").total_xp, 30);

    set_active(&engine, &badge.id, true);
    let awarded = engine.evaluate_rules("s1").expect("evaluate");
    assert_eq!(awarded.len(), 1);
    assert_eq!(awarded[0].badge_id.as_deref(), Some(badge.id.as_str()));
    assert_eq!(engine.get_progress("s1").expect("progress").total_xp, 80);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn one_time_badge_from_rule_blocks_manual_grant() {
    let (workspace, engine) = open_engine("badges-rule-then-grant");
    let badge = engine.create_badge(&new_badge("Steady", 50, false)).expect("create");
    link_streak_rule(&engine, &badge.id, 50);

    for d in 1..=3 {
        engine.apply_event("s1", &present(d), None).expect("apply");
    }
    let from_rule = engine.list_achievements("s1").expect("list");
    assert_eq!(from_rule.len(), 1);

    let grant = engine.grant_badge("s1", &badge.id, "staff-1").expect("grant");
    assert!(!grant.newly_awarded);
    assert_eq!(grant.achievement.id, from_rule[0].id);
    assert_eq!(engine.list_achievements("s1").expect("list").len(), 1);
    assert_eq!(engine.get_progress("s1").expect("progress").total_xp, 80);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn manual_grant_of_one_time_badge_blocks_rule_award() {
    let (workspace, engine) = open_engine("badges-grant-then-rule");
    let badge = engine.create_badge(&new_badge("Steady", 50, false)).expect("create");
    link_streak_rule(&engine, &badge.id, 50);
    engine.grant_badge("s1", &badge.id, "staff-1").expect("grant");

    for d in 1..=3 {
        let outcome = engine.apply_event("s1", &present(d), None).expect("apply");
        assert!(outcome.achievements.is_empty());
    }
    let achievements = engine.list_achievements("s1").expect("list");
    assert_eq!(achievements.len(), 1);
    assert_eq!(achievements[0].granted_by.as_deref(), Some("staff-1"));
    assert_eq!(engine.get_progress("s1").expect("progress").total_xp, 80);

    let _ = std::fs::remove_dir_all(workspace);
}
