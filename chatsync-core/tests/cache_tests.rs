// File: chatsync-core/tests/cache_tests.rs

use std::collections::HashSet;

use chatsync_common::models::{CacheConfig, MessageStatus, ServerMessage};
use chatsync_core::ChatSyncService;
use chatsync_core::test_utils::helpers::{config_with_cap, server_msg, server_msgs};

fn service() -> ChatSyncService {
    ChatSyncService::in_memory(CacheConfig::default())
}

fn assert_consistent(service: &ChatSyncService) {
    service
        .cache()
        .check_invariants()
        .unwrap_or_else(|e| panic!("invariant violated: {e}"));

    let snap = service.snapshot();
    assert_eq!(snap.total_count, snap.order.len());
    let unique: HashSet<&String> = snap.order.iter().collect();
    assert_eq!(unique.len(), snap.order.len(), "duplicate identifiers in order");
    for ident in &snap.order {
        let in_confirmed = snap.confirmed.contains_key(ident);
        let in_pending = snap.pending.contains_key(ident);
        assert!(in_confirmed ^ in_pending, "{ident} must resolve in exactly one map");
    }
    assert_eq!(snap.confirmed.len() + snap.pending.len(), snap.order.len());
}

#[test]
fn test_optimistic_round_trip() {
    let mut service = service();
    let t1 = service.add_optimistic_message("hi");

    let rendered = service.get_messages_for_render();
    assert_eq!(rendered[0].content, "hi");
    assert_eq!(rendered[0].status, MessageStatus::Sending);
    assert_eq!(rendered[0].temp_id.as_deref(), Some(t1.as_str()));

    service.confirm_message(&t1, ServerMessage::new("m1", "hi", true).with_timestamp(1_700_000_000_000));

    let rendered = service.get_messages_for_render();
    assert_eq!(rendered[0].id.as_deref(), Some("m1"));
    assert_eq!(rendered[0].status, MessageStatus::Sent);
    assert!(service.get_message(&t1).is_none(), "temp id must no longer resolve");
    assert!(service.snapshot().pending.is_empty());
    assert_consistent(&service);
}

#[test]
fn test_confirm_twice_is_ignored() {
    let mut service = service();
    let t1 = service.add_optimistic_message("hi");
    service.confirm_message(&t1, server_msg("m1", "hi"));
    let before = service.snapshot();

    service.confirm_message(&t1, server_msg("m2", "hi"));
    assert_eq!(service.snapshot(), before);
}

#[test]
fn test_failure_retry_cycle() {
    let mut service = service();
    let t2 = service.add_optimistic_message("x");
    service.mark_message_failed(&t2);

    let failed = service.get_message(&t2).unwrap();
    assert_eq!(failed.status, MessageStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(service.failed_messages().len(), 1);

    let retried = service.retry_message(&t2).expect("failed message should retry");
    assert_eq!(retried.status, MessageStatus::Sending);
    assert_eq!(retried.retry_count, 2);

    let before = service.snapshot();
    assert!(service.retry_message(&t2).is_none(), "already sending");
    assert_eq!(service.snapshot(), before);
    assert!(service.failed_messages().is_empty());
    assert_eq!(service.pending_messages().len(), 1);
}

#[test]
fn test_failed_message_keeps_position() {
    let mut service = service();
    let t = service.add_optimistic_message("first");
    service.add_received_message(server_msg("m1", "reply"));
    service.mark_message_failed(&t);
    assert_eq!(service.snapshot().order, vec!["m1".to_string(), t]);
}

#[test]
fn test_idempotent_receive() {
    let mut service = service();
    service.add_received_message(server_msg("m200", "pushed"));
    let before = service.snapshot();

    service.add_received_message(server_msg("m200", "pushed again"));
    let after = service.snapshot();
    assert_eq!(after.order.len(), before.order.len());
    assert_eq!(after.confirmed, before.confirmed);
}

#[test]
fn test_history_append_then_replace() {
    let mut service = service();
    service.add_received_message(server_msg("m100", "live"));

    service.add_history_messages(
        vec![server_msg("h1", "old 1"), server_msg("h2", "old 2")],
        true,
        2,
        true,
    );
    let snap = service.snapshot();
    assert_eq!(snap.order, vec!["m100", "h1", "h2"]);
    assert_eq!(snap.page, 2);
    assert!(snap.has_more);
    assert_eq!(snap.total_count, 3);

    service.add_history_messages(vec![server_msg("z1", "fresh")], false, 1, false);
    let snap = service.snapshot();
    assert_eq!(snap.order, vec!["z1"]);
    assert!(!snap.confirmed.contains_key("m100"));
    assert!(!snap.has_more);
    assert_eq!(snap.page, 1);
    assert_consistent(&service);
}

#[test]
fn test_history_append_skips_known_ids() {
    let mut service = service();
    service.add_history_messages(server_msgs("h", 3), true, 1, false);
    service.add_history_messages(
        vec![server_msg("h2", "again"), server_msg("h3", "new")],
        false,
        2,
        true,
    );
    assert_eq!(service.snapshot().order, vec!["h0", "h1", "h2", "h3"]);
    assert_eq!(service.get_message("h2").unwrap().content, "message 2");
}

#[test]
fn test_history_replace_drops_pending() {
    let mut service = service();
    let t = service.add_optimistic_message("in flight");
    service.add_history_messages(vec![server_msg("h1", "x")], true, 1, false);
    assert!(service.get_message(&t).is_none());
    assert!(service.snapshot().pending.is_empty());
}

#[test]
fn test_history_preserves_supplied_order() {
    let mut service = service();
    let page = vec![
        ServerMessage::new("b", "b", false).with_timestamp(10),
        ServerMessage::new("a", "a", false).with_timestamp(30),
        ServerMessage::new("c", "c", false).with_timestamp(20),
    ];
    service.add_history_messages(page, true, 1, false);
    assert_eq!(service.snapshot().order, vec!["b", "a", "c"]);
}

#[test]
fn test_eviction_ordering() {
    let mut service = service();
    for i in 0..205 {
        service.add_received_message(server_msg(&format!("m{i}"), "x"));
    }
    let snap = service.snapshot();
    assert_eq!(snap.order.len(), 200);
    for i in 0..5 {
        assert!(!snap.order.contains(&format!("m{i}")), "m{i} should be evicted");
        assert!(!snap.confirmed.contains_key(&format!("m{i}")));
    }
    for i in 5..205 {
        assert!(snap.order.contains(&format!("m{i}")));
    }
    assert_eq!(snap.order[0], "m204");
    assert_eq!(snap.order[199], "m5");
    assert_consistent(&service);
}

#[test]
fn test_history_larger_than_cap_is_truncated() {
    let mut service = ChatSyncService::in_memory(config_with_cap(10));
    service.add_history_messages(server_msgs("h", 25), true, 1, false);
    let snap = service.snapshot();
    assert_eq!(snap.order.len(), 10);
    assert_eq!(snap.order[0], "h0");
    assert_eq!(snap.order[9], "h9");
}

#[test]
fn test_recent_messages_for_context() {
    let mut service = service();
    for i in 0..20 {
        service.add_received_message(server_msg(&format!("m{i}"), &format!("{i}")));
    }
    let context = service.get_recent_messages_for_context(15);
    assert_eq!(context.len(), 15);
    assert_eq!(context[0].id.as_deref(), Some("m19"));
    assert_eq!(context[14].id.as_deref(), Some("m5"));
    assert_eq!(service.recent_context(), context);
    assert_eq!(service.get_recent_messages_for_context(100).len(), 20);
}

#[test]
fn test_clear_all_resets_to_defaults() {
    let mut service = service();
    service.add_received_message(server_msg("m1", "x"));
    service.add_optimistic_message("y");
    service.set_loading(true);

    service.clear_all();
    let snap = service.snapshot();
    assert!(snap.order.is_empty());
    assert!(snap.confirmed.is_empty());
    assert!(snap.pending.is_empty());
    assert!(!snap.is_loading);
    assert_eq!(snap.last_sync_timestamp, None);
}

/// Drives a long pseudo-random sequence of operations and checks the
/// partition, uniqueness and cap invariants after every step.
#[test]
fn test_invariants_hold_under_mixed_operations() {
    let mut service = ChatSyncService::in_memory(config_with_cap(25));
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move |bound: u64| {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed % bound
    };
    let mut temp_ids: Vec<String> = Vec::new();

    for step in 0..2_000 {
        match next(8) {
            0 | 1 => temp_ids.push(service.add_optimistic_message(format!("local {step}"))),
            2 if !temp_ids.is_empty() => {
                let tid = temp_ids[next(temp_ids.len() as u64) as usize].clone();
                service.confirm_message(&tid, server_msg(&format!("s{}", next(60)), "ack"));
            }
            3 if !temp_ids.is_empty() => {
                let tid = temp_ids[next(temp_ids.len() as u64) as usize].clone();
                service.mark_message_failed(&tid);
            }
            4 if !temp_ids.is_empty() => {
                let tid = temp_ids[next(temp_ids.len() as u64) as usize].clone();
                service.retry_message(&tid);
            }
            5 if !temp_ids.is_empty() && next(4) == 0 => {
                let tid = temp_ids[next(temp_ids.len() as u64) as usize].clone();
                service.add_received_message(server_msg(&tid, "echo"));
            }
            5 => service.add_received_message(server_msg(&format!("s{}", next(60)), "push")),
            6 => {
                let page: Vec<ServerMessage> = (0..next(6))
                    .map(|_| server_msg(&format!("s{}", next(60)), "history"))
                    .collect();
                service.add_history_messages(page, next(2) == 0, step as u32, next(4) != 0);
            }
            _ => service.set_loading_more(next(2) == 0),
        }
        assert!(service.snapshot().order.len() <= 25);
        assert_consistent(&service);
    }
}
