use chat_core::{
    sort_newest_first, App, Author, CacheOperation, CacheOutput, CachedMessages, Effect, Event,
    FeedError, FeedOperation, FeedOutput, Message, MessageId, Model, SubscriptionId, SyncState,
    UnixTimeMs, UserId,
};
use crux_core::testing::AppTester;

fn msg(id: &str, at: u64) -> Message {
    Message {
        id: MessageId::new(id),
        text: format!("message {id}"),
        created_at: UnixTimeMs(at),
        author: Author {
            id: UserId::new("u-2"),
            name: "Grace".into(),
            color: Some("#B9C6AE".into()),
        },
        image: None,
        location: None,
    }
}

fn open_chat(app: &AppTester<App, Effect>, model: &mut Model) -> Vec<Effect> {
    app.update(
        Event::ChatOpened {
            name: "Ada".into(),
            color: Some("#474056".into()),
            user_id: Some("u-1".into()),
            room: None,
        },
        model,
    )
    .effects
}

fn deliver_snapshot(
    app: &AppTester<App, Effect>,
    model: &mut Model,
    messages: Vec<Message>,
) -> Vec<Effect> {
    let subscription = model
        .active_subscription
        .clone()
        .expect("a live subscription");
    app.update(
        Event::SnapshotReceived {
            subscription,
            result: Box::new(Ok(FeedOutput::Snapshot { messages })),
        },
        model,
    )
    .effects
}

fn feed_ops(effects: &[Effect]) -> Vec<&FeedOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Feed(req) => Some(&req.operation),
            _ => None,
        })
        .collect()
}

fn cache_ops(effects: &[Effect]) -> Vec<&CacheOperation> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Cache(req) => Some(&req.operation),
            _ => None,
        })
        .collect()
}

fn has_render(effects: &[Effect]) -> bool {
    effects.iter().any(|e| matches!(e, Effect::Render(_)))
}

#[test]
fn opening_online_subscribes() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();

    let effects = open_chat(&app, &mut model);

    assert_eq!(model.sync_state, SyncState::Subscribed);
    let subscription = model.active_subscription.clone().expect("subscription id");

    let ops = feed_ops(&effects);
    assert_eq!(ops.len(), 1);
    match ops[0] {
        FeedOperation::Subscribe {
            room,
            subscription: sub,
        } => {
            assert_eq!(room.as_str(), "messages");
            assert_eq!(*sub, subscription);
        }
        other => panic!("expected a subscribe operation, got {other:?}"),
    }
    assert!(has_render(&effects));
}

#[test]
fn opening_with_explicit_room_subscribes_to_it() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();

    let effects = app
        .update(
            Event::ChatOpened {
                name: "Ada".into(),
                color: None,
                user_id: Some("u-1".into()),
                room: Some("lounge".into()),
            },
            &mut model,
        )
        .effects;

    let ops = feed_ops(&effects);
    assert!(matches!(
        ops[0],
        FeedOperation::Subscribe { room, .. } if room.as_str() == "lounge"
    ));
}

#[test]
fn snapshot_replaces_published_list_and_caches_it() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);

    let effects = deliver_snapshot(&app, &mut model, vec![msg("a", 100), msg("b", 300)]);

    let ids: Vec<&str> = model.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);

    let ops = cache_ops(&effects);
    assert_eq!(ops.len(), 1);
    match ops[0] {
        CacheOperation::Write { key, bytes } => {
            assert_eq!(key.as_str(), "cache:messages");
            assert_eq!(CachedMessages::decode(bytes).len(), 2);
        }
        CacheOperation::Read { .. } => panic!("expected a cache write"),
    }
    assert!(has_render(&effects));
}

#[test]
fn later_snapshot_wins_wholesale() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);

    deliver_snapshot(&app, &mut model, vec![msg("a", 100), msg("b", 200)]);
    deliver_snapshot(&app, &mut model, vec![msg("c", 300)]);

    let ids: Vec<&str> = model.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["c"]);
}

#[test]
fn stale_subscription_snapshot_is_dropped() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);
    deliver_snapshot(&app, &mut model, vec![msg("a", 100)]);

    let update = app.update(
        Event::SnapshotReceived {
            subscription: SubscriptionId::new("stale"),
            result: Box::new(Ok(FeedOutput::Snapshot {
                messages: vec![msg("z", 999)],
            })),
        },
        &mut model,
    );

    let ids: Vec<&str> = model.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);
    assert!(update.effects.is_empty());
}

#[test]
fn subscription_error_is_terminal_but_keeps_the_list() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);
    deliver_snapshot(&app, &mut model, vec![msg("a", 100)]);

    let subscription = model.active_subscription.clone().unwrap();
    let update = app.update(
        Event::SnapshotReceived {
            subscription,
            result: Box::new(Err(FeedError::unavailable("backend went away"))),
        },
        &mut model,
    );

    assert_eq!(model.sync_state, SyncState::Unsubscribed);
    assert!(model.active_subscription.is_none());
    assert!(model.active_alert.is_some());
    assert_eq!(model.messages.len(), 1, "last good list stays visible");

    // Terminal: no resubscribe is attempted.
    assert!(feed_ops(&update.effects).is_empty());
    assert!(has_render(&update.effects));
}

#[test]
fn opening_offline_reads_cache_instead_of_subscribing() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();

    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    let effects = open_chat(&app, &mut model);

    assert_eq!(model.sync_state, SyncState::Cached);
    assert!(model.active_subscription.is_none());
    assert!(feed_ops(&effects).is_empty());

    let ops = cache_ops(&effects);
    assert_eq!(ops.len(), 1);
    assert!(matches!(
        ops[0],
        CacheOperation::Read { key } if key.as_str() == "cache:messages"
    ));
}

#[test]
fn cache_miss_publishes_the_empty_list() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    open_chat(&app, &mut model);

    let update = app.update(
        Event::CacheLoaded {
            result: Box::new(Ok(CacheOutput::Read { bytes: None })),
        },
        &mut model,
    );

    assert!(model.messages.is_empty());
    assert!(model.active_alert.is_none(), "a miss is not an error");
    assert!(has_render(&update.effects));
}

#[test]
fn corrupt_cache_publishes_the_empty_list() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    open_chat(&app, &mut model);

    app.update(
        Event::CacheLoaded {
            result: Box::new(Ok(CacheOutput::Read {
                bytes: Some(b"{ definitely not a snapshot".to_vec()),
            })),
        },
        &mut model,
    );

    assert!(model.messages.is_empty());
    assert!(model.active_alert.is_none());
}

#[test]
fn cached_list_is_served_while_offline() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    open_chat(&app, &mut model);

    let envelope = CachedMessages::new(vec![msg("a", 100), msg("b", 200)]);
    app.update(
        Event::CacheLoaded {
            result: Box::new(Ok(CacheOutput::Read {
                bytes: Some(serde_json::to_vec(&envelope).unwrap()),
            })),
        },
        &mut model,
    );

    let ids: Vec<&str> = model.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);

    let view = app.view(&model);
    assert!(!view.online);
    assert!(!view.composer_enabled);
    assert_eq!(view.messages.len(), 2);
}

#[test]
fn reconnect_resubscribes_and_live_snapshot_replaces_cache() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    open_chat(&app, &mut model);

    let envelope = CachedMessages::new(vec![msg("stale", 100)]);
    app.update(
        Event::CacheLoaded {
            result: Box::new(Ok(CacheOutput::Read {
                bytes: Some(serde_json::to_vec(&envelope).unwrap()),
            })),
        },
        &mut model,
    );

    let update = app.update(Event::NetworkStatusChanged { online: true }, &mut model);
    assert_eq!(model.sync_state, SyncState::Subscribed);
    assert!(matches!(
        feed_ops(&update.effects)[..],
        [FeedOperation::Subscribe { .. }]
    ));

    deliver_snapshot(&app, &mut model, vec![msg("live-1", 200), msg("live-2", 300)]);
    let ids: Vec<&str> = model.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["live-2", "live-1"]);
}

#[test]
fn offline_then_online_round_trip_preserves_the_list() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);

    let effects = deliver_snapshot(&app, &mut model, vec![msg("m1", 200), msg("m2", 100)]);
    let before = model.messages.clone();

    // Capture the bytes the core asked the shell to persist.
    let cached_bytes = effects
        .iter()
        .find_map(|e| match e {
            Effect::Cache(req) => match &req.operation {
                CacheOperation::Write { bytes, .. } => Some(bytes.clone()),
                CacheOperation::Read { .. } => None,
            },
            _ => None,
        })
        .expect("a cache write");

    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    app.update(
        Event::CacheLoaded {
            result: Box::new(Ok(CacheOutput::Read {
                bytes: Some(cached_bytes),
            })),
        },
        &mut model,
    );
    assert_eq!(model.messages, before, "cache round-trip is lossless");

    // No new remote writes: the first live snapshot equals the old list.
    app.update(Event::NetworkStatusChanged { online: true }, &mut model);
    deliver_snapshot(&app, &mut model, before.clone());
    assert_eq!(model.messages, before);
}

#[test]
fn two_clients_converge_on_the_same_snapshot() {
    let app = AppTester::<App, _>::default();

    let mut model_a = Model::default();
    let mut model_b = Model::default();
    open_chat(&app, &mut model_a);
    open_chat(&app, &mut model_b);

    // Both subscriptions observe the collection after "hi" lands.
    let snapshot = vec![
        {
            let mut m = msg("hi", 300);
            m.text = "hi".into();
            m
        },
        msg("earlier", 100),
    ];
    deliver_snapshot(&app, &mut model_a, snapshot.clone());
    deliver_snapshot(&app, &mut model_b, snapshot);

    assert_eq!(model_a.messages, model_b.messages);
    assert_eq!(model_a.messages[0].text, "hi");
}

#[test]
fn late_cache_load_does_not_clobber_the_live_list() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    open_chat(&app, &mut model);

    // Reconnect before the cache read resolves.
    app.update(Event::NetworkStatusChanged { online: true }, &mut model);
    deliver_snapshot(&app, &mut model, vec![msg("live", 500)]);

    let envelope = CachedMessages::new(vec![msg("old", 100)]);
    let update = app.update(
        Event::CacheLoaded {
            result: Box::new(Ok(CacheOutput::Read {
                bytes: Some(serde_json::to_vec(&envelope).unwrap()),
            })),
        },
        &mut model,
    );

    let ids: Vec<&str> = model.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["live"]);
    assert!(update.effects.is_empty());
}

#[test]
fn going_offline_detaches_alerts_and_falls_back_to_cache() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);
    let subscription = model.active_subscription.clone().unwrap();

    let update = app.update(Event::NetworkStatusChanged { online: false }, &mut model);

    assert_eq!(model.sync_state, SyncState::Cached);
    assert!(model.active_subscription.is_none());

    let ops = feed_ops(&update.effects);
    assert_eq!(ops.len(), 1);
    match ops[0] {
        FeedOperation::Detach { subscription: s } => assert_eq!(s, &subscription),
        other => panic!("expected a detach operation, got {other:?}"),
    }
    assert!(matches!(cache_ops(&update.effects)[..], [CacheOperation::Read { .. }]));

    let alert = model.active_alert.as_ref().expect("offline alert");
    assert_eq!(alert.code(), "NETWORK_ERROR");
}

#[test]
fn repeated_status_reports_do_not_churn_the_subscription() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);
    let subscription = model.active_subscription.clone().unwrap();

    let update = app.update(Event::NetworkStatusChanged { online: true }, &mut model);

    assert_eq!(model.active_subscription, Some(subscription));
    assert!(update.effects.is_empty());
}

#[test]
fn reconnect_mints_a_fresh_subscription_id() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);
    let first = model.active_subscription.clone().unwrap();

    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    app.update(Event::NetworkStatusChanged { online: true }, &mut model);

    let second = model.active_subscription.clone().unwrap();
    assert_ne!(first, second);
}

#[test]
fn closing_the_chat_detaches_and_clears_the_session() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);
    let subscription = model.active_subscription.clone().unwrap();

    let update = app.update(Event::ChatClosed, &mut model);

    assert!(model.session.is_none());
    assert_eq!(model.sync_state, SyncState::Unsubscribed);
    let ops = feed_ops(&update.effects);
    assert_eq!(ops.len(), 1);
    match ops[0] {
        FeedOperation::Detach { subscription: s } => assert_eq!(s, &subscription),
        other => panic!("expected a detach operation, got {other:?}"),
    }

    // Events arriving after close are ignored.
    let update = app.update(
        Event::SnapshotReceived {
            subscription: SubscriptionId::new("anything"),
            result: Box::new(Ok(FeedOutput::Snapshot {
                messages: vec![msg("x", 1)],
            })),
        },
        &mut model,
    );
    assert!(model.messages.is_empty());
    assert!(update.effects.is_empty());
}

#[test]
fn alert_dismissal_clears_the_alert() {
    let app = AppTester::<App, _>::default();
    let mut model = Model::default();
    open_chat(&app, &mut model);
    app.update(Event::NetworkStatusChanged { online: false }, &mut model);
    assert!(model.active_alert.is_some());

    let update = app.update(Event::AlertDismissed, &mut model);
    assert!(model.active_alert.is_none());
    assert!(has_render(&update.effects));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn the_last_snapshot_always_wins(
            snapshots in proptest::collection::vec(
                proptest::collection::vec(0u64..1_000, 0..8),
                1..6,
            )
        ) {
            let app = AppTester::<App, _>::default();
            let mut model = Model::default();
            open_chat(&app, &mut model);

            let mut last = Vec::new();
            for (snap_index, timestamps) in snapshots.iter().enumerate() {
                let messages: Vec<Message> = timestamps
                    .iter()
                    .enumerate()
                    .map(|(i, &at)| msg(&format!("m-{snap_index}-{i}"), at))
                    .collect();
                last = messages.clone();
                deliver_snapshot(&app, &mut model, messages);
            }

            sort_newest_first(&mut last);
            prop_assert_eq!(&model.messages, &last);

            // Descending order holds throughout.
            for pair in model.messages.windows(2) {
                prop_assert!(pair[0].created_at >= pair[1].created_at);
            }
        }
    }
}
