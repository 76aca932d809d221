//! Cascade pipeline tests: staged onboarding, precondition requeue, and
//! idempotent re-delivery.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{
    account_record, org_json, repo_json, test_store, user_json, wait_until, MockGateway, Scripted,
};
use hubmirror::{CascadePipeline, ChangeNotifier, StageMessage, Store, VersionVector};

const WAIT: Duration = Duration::from_secs(5);

fn script_onboarding(gateway: &MockGateway, at: chrono::DateTime<chrono::Utc>) {
    gateway.script("user/tok", Scripted::fresh_at(user_json(1, "alice"), at));
    gateway.script(
        "user_repos/tok",
        Scripted::fresh_at(
            serde_json::json!([
                repo_json(10, 1, "alice", "mirror"),
                // No push permission: must be filtered out.
                {
                    "id": 11,
                    "name": "readonly",
                    "full_name": "alice/readonly",
                    "private": false,
                    "has_issues": true,
                    "owner": { "id": 1, "login": "alice", "type": "User" },
                    "permissions": { "admin": false, "push": false, "pull": true }
                }
            ]),
            at,
        ),
    );
    gateway.script(
        "user_orgs/tok",
        Scripted::fresh_at(
            serde_json::json!([{ "organization": org_json(20, "octo-org"), "role": "member" }]),
            at,
        ),
    );
    gateway.script(
        "org_members/octo-org/member",
        Scripted::fresh_at(serde_json::json!([user_json(1, "alice")]), at),
    );
    gateway.script(
        "org_members/octo-org/admin",
        Scripted::fresh_at(serde_json::json!([user_json(2, "bob")]), at),
    );
}

#[tokio::test]
async fn onboarding_walks_every_stage() {
    let store = Arc::new(test_store().await);
    let gateway = Arc::new(MockGateway::new());
    script_onboarding(&gateway, Utc::now());

    let pipeline = CascadePipeline::new(
        store.clone(),
        gateway.clone(),
        Arc::new(ChangeNotifier::new()),
    );
    pipeline.onboard("tok");

    let st = store.clone();
    wait_until("cascade completes", WAIT, || {
        let st = st.clone();
        async move {
            st.credential_for(1).await.unwrap_or(None).is_some()
                && st.linked_repositories(1).await.unwrap_or_default() == vec![10]
                && st.organization_members(20).await.unwrap_or_default()
                    == vec![(1, false), (2, true)]
        }
    })
    .await;

    // The unpushable repository never reached the store.
    assert!(store.load_repository(11).await.expect("load").is_none());
    // Stage order held: the org row exists (member stage precondition).
    let org = store
        .load_account(20)
        .await
        .expect("load")
        .expect("org row");
    assert_eq!(org.login, "octo-org");
}

#[tokio::test]
async fn unmet_precondition_requeues_until_it_holds() {
    let store = Arc::new(test_store().await);
    let gateway = Arc::new(MockGateway::new());

    let pipeline = CascadePipeline::new(
        store.clone(),
        gateway.clone(),
        Arc::new(ChangeNotifier::new()),
    );

    // The organization row does not exist yet: the stage must requeue, not
    // proceed with partial data.
    pipeline.enqueue(StageMessage::SyncOrganizationMembers {
        organization_id: 20,
        via_user: 1,
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.call_count("org_members/octo-org/member"), 0);

    // Establish the precondition; the requeued message then succeeds.
    let now = Utc::now();
    store
        .upsert_account(now, &account_record(1, "alice"))
        .await
        .expect("user");
    store.set_credential(1, "tok").await.expect("token");
    store
        .upsert_account(
            now,
            &serde_json::from_value(org_json(20, "octo-org")).expect("org record"),
        )
        .await
        .expect("org");
    gateway.script(
        "org_members/octo-org/member",
        Scripted::fresh(serde_json::json!([user_json(1, "alice")])),
    );
    gateway.script(
        "org_members/octo-org/admin",
        Scripted::fresh(serde_json::json!([])),
    );

    let st = store.clone();
    wait_until("requeued stage completes", Duration::from_secs(15), || {
        let st = st.clone();
        async move { st.organization_members(20).await.unwrap_or_default() == vec![(1, false)] }
    })
    .await;
}

#[tokio::test]
async fn redelivery_with_the_same_snapshot_changes_nothing() {
    let store = Arc::new(test_store().await);
    let gateway = Arc::new(MockGateway::new());
    let first_ts = Utc::now();
    script_onboarding(&gateway, first_ts);

    let pipeline = CascadePipeline::new(
        store.clone(),
        gateway.clone(),
        Arc::new(ChangeNotifier::new()),
    );
    pipeline.onboard("tok");

    let st = store.clone();
    wait_until("first onboarding completes", WAIT, || {
        let st = st.clone();
        async move { st.linked_repositories(1).await.unwrap_or_default() == vec![10] }
    })
    .await;

    let baseline = store
        .compute_delta(1, &VersionVector::new(), 100)
        .await
        .expect("baseline delta");

    // Same upstream snapshot delivered again, newer response timestamps:
    // handlers must not duplicate rows or double-count changes.
    script_onboarding(&gateway, first_ts + chrono::Duration::seconds(60));
    pipeline.onboard("tok");

    let gw = gateway.clone();
    wait_until("second onboarding ran", WAIT, || {
        let gw = gw.clone();
        async move { gw.call_count("org_members/octo-org/member") >= 2 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        store.linked_repositories(1).await.expect("links"),
        vec![10]
    );
    assert_eq!(
        store.organization_members(20).await.expect("members"),
        vec![(1, false), (2, true)]
    );

    let after = store
        .compute_delta(1, &VersionVector::new(), 100)
        .await
        .expect("delta after redelivery");
    assert_eq!(
        baseline.final_vector, after.final_vector,
        "re-delivered snapshot must not advance any root version"
    );
}
