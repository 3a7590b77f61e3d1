//! Edge case tests for synclist-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use synclist_engine::{
    Change, ContentMatch, MatchPolicy, Reconciler, Record, RowSchema, DEFAULT_TOLERANCE_MS,
};
use serde_json::json;

const T: u64 = 1_706_745_600_000;

fn ids(reconciler: &Reconciler) -> Vec<String> {
    reconciler.view().into_iter().map(|r| r.id).collect()
}

// ============================================================================
// Payload Edge Cases
// ============================================================================

#[test]
fn empty_text_messages_still_match() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    reconciler.stage(json!({"text": ""}), T);

    let outcome = reconciler.apply_insert(Record::confirmed("srv-1", T + 1, json!({"text": ""})));

    assert!(outcome.retired.is_some());
    assert_eq!(ids(&reconciler), vec!["srv-1"]);
}

#[test]
fn unicode_text_matches_exactly() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());

    let texts = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "Null\0Test",
    ];

    for (i, text) in texts.iter().enumerate() {
        reconciler.stage(json!({"text": text}), T + i as u64);
    }
    assert_eq!(reconciler.pending_count(), texts.len());

    for (i, text) in texts.iter().enumerate().rev() {
        let outcome = reconciler.apply_insert(Record::confirmed(
            format!("srv-{}", i),
            T + i as u64 + 100,
            json!({"text": text}),
        ));
        assert!(outcome.retired.is_some(), "No match for: {}", text);
    }

    assert_eq!(reconciler.pending_count(), 0);
    assert_eq!(reconciler.len(), texts.len());
}

#[test]
fn near_identical_text_does_not_match() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    reconciler.stage(json!({"text": "hi"}), T);

    for text in ["Hi", "hi ", " hi", "hí"] {
        let outcome =
            reconciler.apply_insert(Record::confirmed(format!("srv-{}", text), T, json!({"text": text})));
        assert_eq!(outcome.retired, None, "Unexpected match for: {:?}", text);
    }
    assert_eq!(reconciler.pending_count(), 1);
}

#[test]
fn nested_payloads_compare_deeply() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    reconciler.stage(
        json!({"product": {"id": "p-1", "price": 12.5}, "kind": "share"}),
        T,
    );

    let differs = Record::confirmed(
        "srv-1",
        T,
        json!({"product": {"id": "p-1", "price": 13.0}, "kind": "share"}),
    );
    assert_eq!(reconciler.apply_insert(differs).retired, None);

    let same = Record::confirmed(
        "srv-2",
        T,
        json!({"product": {"id": "p-1", "price": 12.5}, "kind": "share", "room": "r-1"}),
    );
    assert!(reconciler.apply_insert(same).retired.is_some());
}

// ============================================================================
// Timestamp Edge Cases
// ============================================================================

#[test]
fn tolerance_boundary_is_inclusive() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    reconciler.stage(json!({"text": "edge"}), T);
    reconciler.stage(json!({"text": "edge"}), T);

    let outside = Record::confirmed("srv-far", T + DEFAULT_TOLERANCE_MS + 1, json!({"text": "edge"}));
    assert_eq!(reconciler.apply_insert(outside).retired, None);

    let boundary = Record::confirmed("srv-edge", T + DEFAULT_TOLERANCE_MS, json!({"text": "edge"}));
    assert!(reconciler.apply_insert(boundary).retired.is_some());
}

#[test]
fn zero_tolerance_requires_same_millisecond() {
    let mut reconciler = Reconciler::new(MatchPolicy::default().with_tolerance(0));
    reconciler.stage(json!({"text": "now"}), T);

    assert_eq!(
        reconciler
            .apply_insert(Record::confirmed("srv-1", T + 1, json!({"text": "now"})))
            .retired,
        None
    );
    assert!(reconciler
        .apply_insert(Record::confirmed("srv-2", T, json!({"text": "now"})))
        .retired
        .is_some());
}

#[test]
fn extreme_timestamps() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    reconciler.apply_insert(Record::confirmed("srv-max", u64::MAX, json!({"text": "end"})));
    reconciler.apply_insert(Record::confirmed("srv-zero", 0, json!({"text": "start"})));
    reconciler.stage(json!({"text": "middle"}), T);

    let view = reconciler.view();
    assert_eq!(view[0].id, "srv-zero");
    assert!(view[1].is_optimistic());
    assert_eq!(view[2].id, "srv-max");

    // Pruning with `now` before creation never underflows
    assert!(reconciler.prune_stale(0, 0).is_empty());
}

#[test]
fn server_clock_behind_client_clock() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    reconciler.stage(json!({"text": "skew"}), T + 1_500);

    let outcome = reconciler.apply_insert(Record::confirmed("srv-1", T, json!({"text": "skew"})));

    assert!(outcome.retired.is_some());
}

// ============================================================================
// Ordering Edge Cases
// ============================================================================

#[test]
fn out_of_order_inserts_are_sorted() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    for (id, at) in [("c", 30), ("a", 10), ("d", 40), ("b", 20)] {
        reconciler.apply_insert(Record::confirmed(id, at, json!({"text": id})));
    }

    assert_eq!(ids(&reconciler), vec!["a", "b", "c", "d"]);
}

#[test]
fn many_records_same_timestamp_keep_arrival_order() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    for i in 0..100 {
        reconciler.apply_insert(Record::confirmed(format!("srv-{:03}", i), T, json!({"n": i})));
    }

    let expected: Vec<String> = (0..100).map(|i| format!("srv-{:03}", i)).collect();
    assert_eq!(ids(&reconciler), expected);
}

#[test]
fn refetch_after_insert_reorders_by_fetch() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    reconciler.apply_insert(Record::confirmed("b", T, json!({})));
    reconciler.apply_insert(Record::confirmed("a", T, json!({})));
    assert_eq!(ids(&reconciler), vec!["b", "a"]);

    reconciler.apply_initial_fetch(vec![
        Record::confirmed("a", T, json!({})),
        Record::confirmed("b", T, json!({})),
    ]);
    assert_eq!(ids(&reconciler), vec!["a", "b"]);
}

// ============================================================================
// Lifecycle Edge Cases
// ============================================================================

#[test]
fn empty_initial_fetch_clears_confirmed() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    reconciler.apply_insert(Record::confirmed("srv-1", T, json!({"text": "x"})));

    assert_eq!(
        reconciler.apply_initial_fetch(Vec::<Record>::new()).confirmed,
        0
    );
    assert!(reconciler.is_empty());
}

#[test]
fn insert_after_retraction_does_not_resurrect_placeholder() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    let temp_id = reconciler.stage(json!({"text": "failed"}), T);
    reconciler.remove_optimistic(&temp_id);

    let outcome = reconciler.apply_insert(
        Record::confirmed("srv-1", T + 10, json!({"text": "failed"})).with_client_ref(temp_id),
    );

    assert_eq!(outcome.retired, None);
    assert_eq!(ids(&reconciler), vec!["srv-1"]);
}

#[test]
fn write_response_and_notification_both_applied() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    let temp_id = reconciler.stage(json!({"text": "twice"}), T);
    let confirmed =
        Record::confirmed("srv-1", T + 300, json!({"text": "twice"})).with_client_ref(temp_id);

    // Write response first, then the subscription echo
    let first = reconciler.apply_insert(confirmed.clone());
    let second = reconciler.apply_change(Change::Insert { record: confirmed });

    assert!(first.inserted);
    assert!(!second.is_effective());
    assert_eq!(ids(&reconciler), vec!["srv-1"]);
}

#[test]
fn update_before_insert_is_dropped() {
    let mut reconciler = Reconciler::new(MatchPolicy::default());
    let applied = reconciler.apply_update(&Record::confirmed("srv-1", T, json!({"isRead": true})));
    assert!(!applied);

    reconciler.apply_insert(Record::confirmed("srv-1", T, json!({"text": "x", "isRead": false})));
    assert_eq!(reconciler.view()[0].payload["isRead"], false);
}

// ============================================================================
// Decoding Edge Cases
// ============================================================================

#[test]
fn decoded_rows_feed_the_reconciler() {
    let schema = RowSchema::new().with_client_ref("client_ref");
    let mut reconciler = Reconciler::new(
        MatchPolicy::default().with_content(ContentMatch::Fields(vec!["content".into()])),
    );
    let temp_id = reconciler.stage(json!({"content": "hello"}), T);

    let change = schema
        .decode_notification(&json!({
            "event": "INSERT",
            "record": {
                "id": 17,
                "created_at": "2024-02-01T00:00:01Z",
                "content": "hello",
                "client_ref": temp_id,
            }
        }))
        .unwrap();
    let outcome = reconciler.apply_change(change);

    assert!(outcome.is_effective());
    assert_eq!(ids(&reconciler), vec!["17"]);
    assert_eq!(reconciler.view()[0].created_at, T + 1_000);
}

#[test]
fn rfc3339_offsets_normalize_to_utc() {
    let schema = RowSchema::new();
    let utc = schema
        .decode_row(&json!({"id": "a", "created_at": "2024-02-01T00:00:00Z"}))
        .unwrap();
    let offset = schema
        .decode_row(&json!({"id": "b", "created_at": "2024-02-01T02:00:00+02:00"}))
        .unwrap();

    assert_eq!(utc.created_at, offset.created_at);
}
