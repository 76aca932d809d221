//! Delta-sync protocol tests over an in-process transport: full
//! reconciliation from version zero, removal ordering, resume vectors,
//! forward compatibility, and live updates.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{account_record, issue_record, repository_record, test_store, MockGateway};
use hubmirror::gateway::{AccountRecord, LabelRecord};
use hubmirror::session::messages::{EntryRecord, ServerMessage, SyncAction, SyncLogEntry};
use hubmirror::session::ChannelTransport;
use hubmirror::{SessionError, SessionTransport, Store, SyncConfig, SyncService};

const WAIT: Duration = Duration::from_secs(5);

fn test_config(page_size: usize) -> SyncConfig {
    let mut config = SyncConfig::with_poll_period(Duration::from_millis(50));
    config.page_size = page_size;
    config
}

async fn recv_sync(client: &mut ChannelTransport) -> ServerMessage {
    let text = tokio::time::timeout(WAIT, client.recv())
        .await
        .expect("server should answer in time")
        .expect("connection should stay open");
    serde_json::from_str(&text).expect("well-formed server message")
}

/// Receive pages until `remaining` hits zero; returns all entries in order.
async fn drain_reconciliation(client: &mut ChannelTransport) -> Vec<SyncLogEntry> {
    let mut entries = Vec::new();
    loop {
        let ServerMessage::Sync(message) = recv_sync(client).await;
        entries.extend(message.logs);
        if message.remaining == 0 {
            return entries;
        }
    }
}

/// Seed one user with a repository (label + issue) and an organization.
async fn seed_world(store: &dyn Store) {
    let now = Utc::now();
    store
        .upsert_account(now, &account_record(1, "alice"))
        .await
        .expect("user");
    store.set_credential(1, "tok").await.expect("credential");
    store
        .upsert_account(now, &account_record(2, "bob"))
        .await
        .expect("author");
    store
        .upsert_account(now, &AccountRecord::organization(20, "octo-org"))
        .await
        .expect("org");
    store
        .bulk_upsert_repositories(now, &[repository_record(10, 1, "alice", "mirror")])
        .await
        .expect("repo");
    store
        .set_repository_labels(
            10,
            &[LabelRecord {
                name: "bug".to_string(),
                color: "ff0000".to_string(),
            }],
        )
        .await
        .expect("labels");
    store
        .bulk_upsert_issues(10, now, &[issue_record(100, 1, "broken", 2)])
        .await
        .expect("issue");
    store
        .set_linked_repositories(1, &[(10, true)])
        .await
        .expect("links");
    store
        .set_organization_members(20, &[(1, false)])
        .await
        .expect("membership");
}

#[tokio::test]
async fn version_zero_hello_reconstructs_the_visible_world() {
    let store = Arc::new(test_store().await);
    seed_world(store.as_ref()).await;

    let service = SyncService::new(store.clone(), Arc::new(MockGateway::new()), test_config(3));
    let (mut client, server) = ChannelTransport::pair();
    let session = service.handle_connection(1, server);

    client
        .send(r#"{"msg": "hello"}"#.to_string())
        .await
        .expect("hello");

    let entries = drain_reconciliation(&mut client).await;
    assert!(entries.iter().all(|e| e.action == SyncAction::Set));

    // Apply in order like a reference client.
    let mut accounts: BTreeSet<i64> = BTreeSet::new();
    let mut repositories: BTreeMap<i64, usize> = BTreeMap::new();
    let mut issues: BTreeSet<i64> = BTreeSet::new();
    let mut organizations: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for entry in &entries {
        match &entry.record {
            EntryRecord::User(account) => {
                accounts.insert(account.id);
            }
            EntryRecord::Issue(issue) => {
                assert!(accounts.contains(&issue.user), "author arrives first");
                issues.insert(issue.id);
            }
            EntryRecord::Repository(repo) => {
                repositories.insert(repo.id, repo.labels.len());
            }
            EntryRecord::Organization(org) => {
                organizations.insert(org.id, org.members.clone());
            }
        }
    }

    assert_eq!(repositories, BTreeMap::from([(10, 1)]));
    assert_eq!(issues, BTreeSet::from([100]));
    assert_eq!(organizations.get(&20), Some(&vec![1]));
    assert!(accounts.contains(&2), "issue author synced");

    drop(client);
    let result = tokio::time::timeout(WAIT, session)
        .await
        .expect("session ends")
        .expect("no panic");
    assert!(result.is_ok(), "clean shutdown on disconnect");
}

#[tokio::test]
async fn removals_stream_before_any_set_entries() {
    let store = Arc::new(test_store().await);
    seed_world(store.as_ref()).await;
    // Advance repo 10 past the client's version.
    store
        .bulk_upsert_issues(10, Utc::now(), &[issue_record(101, 2, "second", 2)])
        .await
        .expect("newer issue");

    let service = SyncService::new(store.clone(), Arc::new(MockGateway::new()), test_config(100));
    let (mut client, server) = ChannelTransport::pair();
    let _session = service.handle_connection(1, server);

    // The client claims repo 9 at version 2, but has no access to it.
    client
        .send(
            r#"{"msg": "hello", "versions": {"repositories": [{"id": 10, "version": 1}, {"id": 9, "version": 2}]}}"#
                .to_string(),
        )
        .await
        .expect("hello");

    let ServerMessage::Sync(first) = recv_sync(&mut client).await;
    assert!(!first.logs.is_empty());
    assert!(
        first
            .logs
            .iter()
            .all(|entry| entry.action == SyncAction::Delete),
        "the first batch carries only deletions"
    );
    assert!(first
        .logs
        .iter()
        .any(|entry| matches!(&entry.record, EntryRecord::Repository(r) if r.id == 9)));
    // The attached vector already dropped the removed root.
    assert!(!first.versions.repositories.iter().any(|v| v.id == 9));

    // Remaining pages carry only sets, ending with the surviving repo's
    // final version.
    let mut last_versions = first.versions.clone();
    let mut remaining = first.remaining;
    while remaining > 0 {
        let ServerMessage::Sync(page) = recv_sync(&mut client).await;
        assert!(page.logs.iter().all(|e| e.action == SyncAction::Set));
        remaining = page.remaining;
        last_versions = page.versions;
    }
    let repo_version = last_versions
        .repositories
        .iter()
        .find(|v| v.id == 10)
        .expect("surviving repo in final vector");
    assert!(repo_version.version > 1);
    assert!(!last_versions.repositories.iter().any(|v| v.id == 9));
}

#[tokio::test]
async fn unknown_message_kinds_are_ignored() {
    let store = Arc::new(test_store().await);
    seed_world(store.as_ref()).await;

    let service = SyncService::new(store.clone(), Arc::new(MockGateway::new()), test_config(100));
    let (mut client, server) = ChannelTransport::pair();
    let _session = service.handle_connection(1, server);

    client
        .send(r#"{"msg": "telemetry", "payload": {"x": 1}}"#.to_string())
        .await
        .expect("unknown message");
    client
        .send(r#"{"msg": "hello"}"#.to_string())
        .await
        .expect("hello");

    // The session survived the unknown message and still serves the hello.
    let entries = drain_reconciliation(&mut client).await;
    assert!(!entries.is_empty());
}

#[tokio::test]
async fn malformed_message_terminates_only_that_session() {
    let store = Arc::new(test_store().await);
    seed_world(store.as_ref()).await;

    let service = SyncService::new(store.clone(), Arc::new(MockGateway::new()), test_config(100));

    let (mut bad_client, server) = ChannelTransport::pair();
    let bad_session = service.handle_connection(1, server);
    bad_client
        .send("this is not json".to_string())
        .await
        .expect("send garbage");

    let result = tokio::time::timeout(WAIT, bad_session)
        .await
        .expect("session ends")
        .expect("no panic");
    assert!(matches!(result, Err(SessionError::ProtocolViolation(_))));

    // A second session on the same service is unaffected.
    let (mut client, server) = ChannelTransport::pair();
    let _session = service.handle_connection(1, server);
    client
        .send(r#"{"msg": "hello"}"#.to_string())
        .await
        .expect("hello");
    let entries = drain_reconciliation(&mut client).await;
    assert!(!entries.is_empty());
}

#[tokio::test]
async fn live_changes_stream_to_connected_sessions() {
    let store = Arc::new(test_store().await);
    seed_world(store.as_ref()).await;

    let service = SyncService::new(store.clone(), Arc::new(MockGateway::new()), test_config(100));
    let (mut client, server) = ChannelTransport::pair();
    let _session = service.handle_connection(1, server);

    client
        .send(r#"{"msg": "hello"}"#.to_string())
        .await
        .expect("hello");
    drain_reconciliation(&mut client).await;

    // A later cycle merges a new issue and dispatches the change set.
    let changes = store
        .bulk_upsert_issues(
            10,
            Utc::now() + chrono::Duration::seconds(5),
            &[issue_record(102, 3, "fresh", 2)],
        )
        .await
        .expect("merge");
    assert!(!changes.is_empty());
    service.notifier().dispatch(changes);

    let update = drain_reconciliation(&mut client).await;
    assert!(
        update
            .iter()
            .any(|e| matches!(&e.record, EntryRecord::Issue(i) if i.id == 102)),
        "the new issue reaches the connected client"
    );
}
