//! End-user secret rotation, event queries and purging.

mod support;

use keygraph_accounts::KeyGraphError;
use keygraph_store::ids::next_sequence;
use keygraph_store::{Event, EventQuery, Store};
use pretty_assertions::assert_eq;
use support::{acme, graph};
use uuid::{NoContext, Timestamp, Uuid};

#[tokio::test]
async fn first_secret_is_created() {
    let (graph, store) = graph();
    let account_id = acme(&graph).await;

    let assoc = graph.associate_user_secret(&account_id, "user-1", "sealed-1").unwrap();
    assert_eq!(assoc.parked_secret_id, None);
    assert_eq!(assoc.migrated_events, 0);

    let tx = store.transaction().unwrap();
    assert_eq!(tx.find_secret(&assoc.secret_id).unwrap().encrypted_secret, "sealed-1");
}

#[tokio::test]
async fn rotation_moves_events_to_parked_secret() {
    const N: usize = 5;
    let (graph, store) = graph();
    let account_id = acme(&graph).await;

    graph.associate_user_secret(&account_id, "user-1", "sealed-old").unwrap();
    let mut originals = Vec::new();
    for i in 0..N {
        originals.push(
            graph
                .insert_event(&account_id, Some("user-1"), &format!("payload-{i}"))
                .unwrap(),
        );
    }
    let cursor = graph.query_events("user-1", None).await.unwrap().sequence;

    let assoc = graph.associate_user_secret(&account_id, "user-1", "sealed-new").unwrap();
    let parked = assoc.parked_secret_id.clone().unwrap();
    assert_ne!(parked, assoc.secret_id);
    assert_eq!(assoc.migrated_events, N);

    let tx = store.transaction().unwrap();
    assert_eq!(tx.find_secret(&assoc.secret_id).unwrap().encrypted_secret, "sealed-new");
    assert_eq!(tx.find_secret(&parked).unwrap().encrypted_secret, "sealed-old");

    assert!(tx
        .find_events(&EventQuery::for_secrets(vec![assoc.secret_id.clone()]))
        .unwrap()
        .is_empty());
    let moved = tx
        .find_events(&EventQuery::for_secrets(vec![parked.clone()]))
        .unwrap();
    assert_eq!(moved.len(), N);
    let mut payloads: Vec<_> = moved.iter().map(|e| e.payload.clone()).collect();
    payloads.sort();
    assert_eq!(payloads, (0..N).map(|i| format!("payload-{i}")).collect::<Vec<_>>());
    for event in &moved {
        let index: usize = event.payload["payload-".len()..].parse().unwrap();
        let original = originals[index];
        assert_ne!(event.event_id, original);
        assert_eq!(
            event.event_id.get_timestamp().unwrap().to_unix(),
            original.get_timestamp().unwrap().to_unix()
        );
    }
    drop(tx);

    let delta = graph.query_events("user-1", cursor).await.unwrap();
    assert!(delta.events.is_empty());
    let mut deleted = delta.deleted_events.clone();
    deleted.sort();
    assert_eq!(deleted, originals);
}

#[tokio::test]
async fn rotation_without_events() {
    let (graph, _) = graph();
    let account_id = acme(&graph).await;
    graph.associate_user_secret(&account_id, "user-1", "a").unwrap();
    let assoc = graph.associate_user_secret(&account_id, "user-1", "b").unwrap();
    assert!(assoc.parked_secret_id.is_some());
    assert_eq!(assoc.migrated_events, 0);
}

#[tokio::test]
async fn identified_event_needs_secret() {
    let (graph, _) = graph();
    let account_id = acme(&graph).await;

    let err = graph.insert_event(&account_id, Some("stranger"), "p").unwrap_err();
    assert!(matches!(err, KeyGraphError::UnknownSecret(_)));
    assert!(graph.insert_event(&account_id, None, "p").is_ok());

    let err = graph
        .insert_event(&uuid::Uuid::new_v4(), None, "p")
        .unwrap_err();
    assert!(matches!(err, KeyGraphError::UnknownAccount(_)));
}

#[tokio::test]
async fn query_events_groups_by_account() {
    let (graph, _) = graph();
    let acme_id = acme(&graph).await;
    let globex_id = graph
        .create_account("Globex", support::ALICE, support::ALICE_PASSWORD)
        .await
        .unwrap();

    for account_id in [acme_id, globex_id] {
        graph.associate_user_secret(&account_id, "user-1", "s").unwrap();
        graph.insert_event(&account_id, Some("user-1"), "mine").unwrap();
    }
    graph.associate_user_secret(&acme_id, "user-2", "s").unwrap();
    graph.insert_event(&acme_id, Some("user-2"), "theirs").unwrap();
    graph.insert_event(&acme_id, None, "anonymous").unwrap();

    let result = graph.query_events("user-1", None).await.unwrap();
    assert_eq!(result.events.len(), 2);
    assert_eq!(result.events[&acme_id].len(), 1);
    assert_eq!(result.events[&globex_id][0].payload, "mine");
    assert!(result.deleted_events.is_empty());
}

#[tokio::test]
async fn purge_removes_everything_of_one_user() {
    let (graph, _) = graph();
    let account_id = acme(&graph).await;
    graph.associate_user_secret(&account_id, "user-1", "s").unwrap();
    graph.associate_user_secret(&account_id, "user-2", "s").unwrap();
    for _ in 0..3 {
        graph.insert_event(&account_id, Some("user-1"), "p").unwrap();
    }
    let kept = graph.insert_event(&account_id, Some("user-2"), "p").unwrap();
    let cursor = graph.get_account(&account_id, true, None).unwrap().sequence;

    assert_eq!(graph.purge("user-1").await.unwrap(), 3);
    assert!(graph.query_events("user-1", None).await.unwrap().events.is_empty());

    let account = graph.get_account(&account_id, true, cursor).unwrap();
    assert_eq!(account.deleted_events.len(), 3);
    let remaining = graph.get_account(&account_id, true, None).unwrap();
    assert_eq!(remaining.events.len(), 1);
    assert_eq!(remaining.events[0].event_id, kept);

    assert_eq!(graph.purge("user-1").await.unwrap(), 0);
}

#[tokio::test]
async fn expire_drops_events_past_retention() {
    let (graph, store) = graph();
    let account_id = acme(&graph).await;
    let stale = Uuid::new_v7(Timestamp::from_unix(NoContext, 1_600_000_000, 0));
    let mut tx = store.transaction().unwrap();
    tx.create_event(Event {
        event_id: stale,
        sequence: next_sequence(),
        account_id,
        secret_id: None,
        payload: "old".into(),
    })
    .unwrap();
    tx.commit().unwrap();
    let fresh = graph.insert_event(&account_id, None, "new").unwrap();

    assert_eq!(graph.expire(chrono::Duration::days(30)).unwrap(), 1);
    let remaining = graph.get_account(&account_id, true, None).unwrap();
    assert_eq!(remaining.events.len(), 1);
    assert_eq!(remaining.events[0].event_id, fresh);

    assert_eq!(graph.expire(chrono::Duration::days(30)).unwrap(), 0);
    assert!(matches!(
        graph.expire(chrono::Duration::days(-1)),
        Err(KeyGraphError::Validation(_))
    ));
}
