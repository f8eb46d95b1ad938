use super::*;
use crate::frame::ErrorCode;
use std::collections::VecDeque;
use std::sync::Arc;
use time::macros::datetime;

/// Hands out a fixed sequence of ids, then zero (always unusable).
struct ScriptedIds(std::sync::Mutex<VecDeque<ChatId>>);

impl ScriptedIds {
    fn new(ids: &[ChatId]) -> Self {
        Self(std::sync::Mutex::new(ids.iter().copied().collect()))
    }
}

impl ChatIdSource for ScriptedIds {
    fn next_id(&self) -> ChatId {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or(0)
    }
}

const T: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);

// =============================================================================
// CREATE
// =============================================================================

#[tokio::test]
async fn create_returns_distinct_positive_ids() {
    let registry = ChatRegistry::default();
    let mut seen = HashSet::new();
    for _ in 0..64 {
        let id = registry.create_chat(&[1, 2]).await.expect("create should succeed");
        assert!(id > 0);
        assert!(seen.insert(id), "id {id} returned twice");
    }
    assert_eq!(registry.chat_count().await, 64);
}

#[tokio::test]
async fn create_rejects_empty_participants() {
    let registry = ChatRegistry::default();
    let err = registry.create_chat(&[]).await.expect_err("empty set should fail");
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert_eq!(registry.chat_count().await, 0);
}

#[tokio::test]
async fn create_rejects_zero_participant() {
    let registry = ChatRegistry::default();
    let err = registry.create_chat(&[1, 0]).await.expect_err("zero id should fail");
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert_eq!(registry.chat_count().await, 0);
}

#[tokio::test]
async fn create_collapses_duplicate_participants() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[3, 1, 3, 2, 1]).await.unwrap();
    let snap = registry.snapshot(id).await.unwrap();
    assert_eq!(snap.id, id);
    assert_eq!(snap.participants, vec![1, 2, 3]);
    assert!(snap.messages.is_empty());
}

#[tokio::test]
async fn create_retries_on_collision() {
    let registry = ChatRegistry::with_id_source(ScriptedIds::new(&[7, 7, 9]), 4);

    let first = registry.create_chat(&[1]).await.unwrap();
    let second = registry.create_chat(&[2]).await.unwrap();

    assert_eq!(first, 7);
    assert_eq!(second, 9);
    assert_eq!(registry.snapshot(7).await.unwrap().participants, vec![1]);
    assert_eq!(registry.snapshot(9).await.unwrap().participants, vec![2]);
}

#[tokio::test]
async fn create_skips_non_positive_candidates() {
    let registry = ChatRegistry::with_id_source(ScriptedIds::new(&[0, -5, 11]), 3);
    assert_eq!(registry.create_chat(&[1]).await.unwrap(), 11);
}

#[tokio::test]
async fn create_reports_internal_when_ids_exhausted() {
    let registry = ChatRegistry::with_id_source(ScriptedIds::new(&[7, 7, 7, 7]), 3);
    registry.create_chat(&[1]).await.unwrap();
    registry.post_message(7, 1, "keep me", Some(T)).await.unwrap();

    let err = registry.create_chat(&[2]).await.expect_err("should exhaust");
    assert!(matches!(err, ChatError::Internal(_)));

    // The existing chat was not overwritten.
    let snap = registry.snapshot(7).await.unwrap();
    assert_eq!(snap.participants, vec![1]);
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(registry.chat_count().await, 1);
}

// =============================================================================
// DELETE
// =============================================================================

#[tokio::test]
async fn delete_never_created_is_not_found() {
    let registry = ChatRegistry::default();
    let err = registry.delete_chat(12345).await.expect_err("should fail");
    assert!(matches!(err, ChatError::NotFound(12345)));
}

#[tokio::test]
async fn delete_zero_is_not_found() {
    let registry = ChatRegistry::default();
    assert!(matches!(registry.delete_chat(0).await, Err(ChatError::NotFound(0))));
}

#[tokio::test]
async fn delete_twice_second_is_not_found() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[1, 2]).await.unwrap();

    registry.delete_chat(id).await.expect("first delete should succeed");
    let err = registry.delete_chat(id).await.expect_err("second delete should fail");
    assert!(matches!(err, ChatError::NotFound(got) if got == id));
}

#[tokio::test]
async fn delete_leaves_unrelated_chats_alone() {
    let registry = ChatRegistry::default();
    let keep = registry.create_chat(&[1, 2]).await.unwrap();
    let drop_id = registry.create_chat(&[3]).await.unwrap();
    registry.post_message(keep, 1, "still here", Some(T)).await.unwrap();

    registry.delete_chat(drop_id).await.unwrap();

    assert_eq!(registry.message_count(keep).await.unwrap(), 1);
    assert!(registry.is_member(keep, 2).await.unwrap());
    assert!(matches!(registry.snapshot(drop_id).await, Err(ChatError::NotFound(_))));
}

// =============================================================================
// POST
// =============================================================================

#[tokio::test]
async fn post_from_non_member_is_rejected_without_mutation() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[1, 2]).await.unwrap();
    registry.post_message(id, 1, "first", Some(T)).await.unwrap();
    let before = registry.message_count(id).await.unwrap();

    let err = registry.post_message(id, 99, "intruder", Some(T)).await.expect_err("should fail");

    assert!(matches!(err, ChatError::NotAMember { chat_id, sender_id: 99 } if chat_id == id));
    assert_eq!(registry.message_count(id).await.unwrap(), before);
}

#[tokio::test]
async fn post_rejects_zero_chat_id() {
    let registry = ChatRegistry::default();
    let err = registry.post_message(0, 1, "hi", Some(T)).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(ref m) if m.contains("chat_id")));
}

#[tokio::test]
async fn post_rejects_zero_sender() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[1]).await.unwrap();
    let err = registry.post_message(id, 0, "hi", Some(T)).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(ref m) if m.contains("from_user_id")));
    assert_eq!(registry.message_count(id).await.unwrap(), 0);
}

#[tokio::test]
async fn post_rejects_empty_text() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[1]).await.unwrap();
    let err = registry.post_message(id, 1, "", Some(T)).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(ref m) if m.contains("text")));
    assert_eq!(registry.message_count(id).await.unwrap(), 0);
}

#[tokio::test]
async fn post_rejects_missing_timestamp() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[1]).await.unwrap();
    let err = registry.post_message(id, 1, "hi", None).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(ref m) if m.contains("created_at")));
    assert_eq!(registry.message_count(id).await.unwrap(), 0);
}

#[tokio::test]
async fn post_validation_precedes_existence_check() {
    let registry = ChatRegistry::default();
    // Chat 5 does not exist, but the empty text is reported first.
    let err = registry.post_message(5, 1, "", Some(T)).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
}

#[tokio::test]
async fn post_to_unknown_chat_is_not_found() {
    let registry = ChatRegistry::default();
    let err = registry.post_message(404, 1, "hi", Some(T)).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(404)));
}

#[tokio::test]
async fn messages_keep_append_order() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[1, 2]).await.unwrap();
    for (sender, text) in [(1, "a"), (2, "b"), (1, "c")] {
        registry.post_message(id, sender, text, Some(T)).await.unwrap();
    }

    let texts: Vec<String> = registry
        .snapshot(id)
        .await
        .unwrap()
        .messages
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn full_chat_lifecycle() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[1, 2]).await.unwrap();

    registry.post_message(id, 1, "hi", Some(T)).await.unwrap();
    let snap = registry.snapshot(id).await.unwrap();
    assert_eq!(snap.messages, vec![Message { sender_id: 1, text: "hi".into(), created_at: T }]);

    let err = registry.post_message(id, 3, "let me in", Some(T)).await.unwrap_err();
    assert!(matches!(err, ChatError::NotAMember { .. }));
    assert_eq!(registry.message_count(id).await.unwrap(), 1);

    registry.delete_chat(id).await.unwrap();
    let err = registry.post_message(id, 1, "anyone?", Some(T)).await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(got) if got == id));
}

// =============================================================================
// READ PATH
// =============================================================================

#[tokio::test]
async fn is_member_reports_membership_and_missing_chat() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[1, 2]).await.unwrap();
    assert!(registry.is_member(id, 1).await.unwrap());
    assert!(!registry.is_member(id, 3).await.unwrap());

    registry.delete_chat(id).await.unwrap();
    assert!(matches!(registry.is_member(id, 1).await, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn post_accepts_exactly_the_members_is_member_reports() {
    let registry = ChatRegistry::default();
    let id = registry.create_chat(&[4, 5]).await.unwrap();

    for user in [4, 5, 6] {
        let member = registry.is_member(id, user).await.unwrap();
        let posted = registry.post_message(id, user, "hey", Some(T)).await;
        assert_eq!(posted.is_ok(), member, "user {user}");
    }
    assert_eq!(registry.message_count(id).await.unwrap(), 2);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_posts_are_all_kept_exactly_once() {
    const N: usize = 200;
    let registry = Arc::new(ChatRegistry::default());
    let id = registry.create_chat(&[1, 2]).await.unwrap();

    let mut handles = Vec::with_capacity(N);
    for i in 0..N {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let sender = if i % 2 == 0 { 1 } else { 2 };
            registry.post_message(id, sender, &format!("msg-{i}"), Some(T)).await
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked").expect("post should succeed");
    }

    let snap = registry.snapshot(id).await.unwrap();
    assert_eq!(snap.messages.len(), N);
    let texts: HashSet<String> = snap.messages.into_iter().map(|m| m.text).collect();
    assert_eq!(texts.len(), N);
    for i in 0..N {
        assert!(texts.contains(&format!("msg-{i}")));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_yield_unique_ids() {
    let registry = Arc::new(ChatRegistry::default());
    let mut handles = Vec::new();
    for i in 1..=100 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move { registry.create_chat(&[i]).await }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let id = handle.await.expect("task panicked").expect("create should succeed");
        assert!(ids.insert(id));
    }
    assert_eq!(registry.chat_count().await, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_racing_post_never_leaves_a_message_behind() {
    let registry = Arc::new(ChatRegistry::default());

    for round in 0..200 {
        let id = registry.create_chat(&[1]).await.unwrap();

        let poster = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.post_message(id, 1, &format!("round-{round}"), Some(T)).await })
        };
        let deleter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.delete_chat(id).await })
        };

        let posted = poster.await.expect("poster panicked");
        deleter.await.expect("deleter panicked").expect("delete should succeed");

        match posted {
            Ok(()) | Err(ChatError::NotFound(_)) => {}
            Err(other) => panic!("unexpected post outcome: {other}"),
        }
        assert!(matches!(registry.message_count(id).await, Err(ChatError::NotFound(_))));
    }
    assert_eq!(registry.chat_count().await, 0);
}

// =============================================================================
// ERRORS / HELPERS
// =============================================================================

#[test]
fn error_codes_are_distinct_per_kind() {
    let cases = [
        (ChatError::InvalidInput("x".into()), "E_INVALID_INPUT", false),
        (ChatError::NotFound(1), "E_CHAT_NOT_FOUND", false),
        (ChatError::NotAMember { chat_id: 1, sender_id: 2 }, "E_NOT_A_MEMBER", false),
        (ChatError::Internal("x".into()), "E_INTERNAL", true),
    ];
    for (err, code, retryable) in cases {
        assert_eq!(err.error_code(), code);
        assert_eq!(err.retryable(), retryable);
    }
}

#[test]
fn parse_created_at_accepts_rfc3339() {
    let parsed = parse_created_at("2024-03-01T12:00:00Z").unwrap();
    assert_eq!(parsed, T);

    let offset = parse_created_at("2024-03-01T14:00:00+02:00").unwrap();
    assert_eq!(offset, T);
}

#[test]
fn parse_created_at_rejects_garbage() {
    for raw in ["", "yesterday", "2024-13-01T00:00:00Z", "1709294400"] {
        let err = parse_created_at(raw).expect_err("should fail");
        assert!(matches!(err, ChatError::InvalidInput(_)), "{raw} should be invalid input");
    }
}
