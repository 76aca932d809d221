//! Store contract tests against the SQLite backend: timestamp-gated merges,
//! membership diffs, version bookkeeping, and delta computation.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use chrono::{Duration, Utc};

use common::{account_record, issue_record, repository_record, test_store};
use hubmirror::entity::cache_metadata::MetadataSlot;
use hubmirror::gateway::{AccountRecord, CacheMetadata, LabelRecord};
use hubmirror::session::messages::{EntryRecord, SyncAction};
use hubmirror::{Store, VersionVector};

#[tokio::test]
async fn older_response_timestamp_is_a_noop() {
    let store = test_store().await;
    let now = Utc::now();

    let changes = store
        .upsert_account(now, &account_record(1, "octocat"))
        .await
        .expect("initial upsert");
    assert!(!changes.is_empty());

    // A replayed older response must not change data or report changes.
    let stale = store
        .upsert_account(now - Duration::seconds(30), &account_record(1, "renamed"))
        .await
        .expect("stale upsert");
    assert!(stale.is_empty());

    let account = store
        .load_account(1)
        .await
        .expect("load")
        .expect("account exists");
    assert_eq!(account.login, "octocat");
}

#[tokio::test]
async fn identical_payload_with_newer_timestamp_reports_no_change() {
    let store = test_store().await;
    let now = Utc::now();

    // Link a user to the repository so deltas can observe its version.
    store
        .upsert_account(now, &account_record(1, "octocat"))
        .await
        .expect("user upsert");
    store.set_credential(1, "tok").await.expect("credential");
    let repo = repository_record(10, 1, "octocat", "mirror");
    let first = store
        .bulk_upsert_repositories(now, &[repo.clone()])
        .await
        .expect("first upsert");
    assert!(first.repositories.contains(&10));
    store
        .set_linked_repositories(1, &[(10, true)])
        .await
        .expect("link");

    let before = store
        .compute_delta(1, &VersionVector::new(), 100)
        .await
        .expect("delta before");

    // Same payload, later timestamp: stamped but unchanged.
    let second = store
        .bulk_upsert_repositories(now + Duration::seconds(60), &[repo])
        .await
        .expect("second upsert");
    assert!(second.is_empty());

    let after = store
        .compute_delta(1, &VersionVector::new(), 100)
        .await
        .expect("delta after");
    assert_eq!(
        before.final_vector.repository(10),
        after.final_vector.repository(10),
        "a no-op merge must not advance the repository version"
    );
}

#[tokio::test]
async fn cache_metadata_round_trips_per_slot() {
    let store = test_store().await;

    let empty = store
        .get_cache_metadata(1, MetadataSlot::Profile)
        .await
        .expect("get");
    assert!(empty.is_empty());
    assert!(empty.is_stale(Utc::now()));

    let metadata = CacheMetadata {
        etag: Some("\"abc\"".to_string()),
        expires_at: Some(Utc::now() + Duration::minutes(1)),
    };
    store
        .put_cache_metadata(1, MetadataSlot::Profile, &metadata)
        .await
        .expect("put");
    store
        .put_cache_metadata(1, MetadataSlot::Repositories, &CacheMetadata::default())
        .await
        .expect("put other slot");

    let loaded = store
        .get_cache_metadata(1, MetadataSlot::Profile)
        .await
        .expect("get");
    assert_eq!(loaded.etag, metadata.etag);
    assert_eq!(loaded.expires_at, metadata.expires_at);

    // Upsert replaces in place.
    let replaced = CacheMetadata {
        etag: Some("\"def\"".to_string()),
        expires_at: None,
    };
    store
        .put_cache_metadata(1, MetadataSlot::Profile, &replaced)
        .await
        .expect("replace");
    let loaded = store
        .get_cache_metadata(1, MetadataSlot::Profile)
        .await
        .expect("get");
    assert_eq!(loaded.etag.as_deref(), Some("\"def\""));
}

#[tokio::test]
async fn membership_diff_reports_only_actual_changes() {
    let store = test_store().await;
    let now = Utc::now();
    for (id, login) in [(20, "octo-org"), (1, "alice"), (2, "bob")] {
        let record = if id == 20 {
            AccountRecord::organization(id, login)
        } else {
            account_record(id, login)
        };
        store.upsert_account(now, &record).await.expect("seed");
    }

    let changes = store
        .set_organization_members(20, &[(1, false), (2, true)])
        .await
        .expect("initial membership");
    assert!(changes.organizations.contains(&20));
    assert!(changes.users.contains(&1) && changes.users.contains(&2));

    // Idempotent re-run.
    let repeat = store
        .set_organization_members(20, &[(1, false), (2, true)])
        .await
        .expect("repeat membership");
    assert!(repeat.is_empty());

    // Removing one member affects only that user.
    let removal = store
        .set_organization_members(20, &[(2, true)])
        .await
        .expect("removal");
    assert!(removal.organizations.contains(&20));
    assert!(removal.users.contains(&1));
    assert!(!removal.users.contains(&2));
    assert_eq!(
        store.organization_members(20).await.expect("members"),
        vec![(2, true)]
    );
}

#[tokio::test]
async fn full_delta_reconstructs_visible_world_in_dependency_order() {
    let store = test_store().await;
    let now = Utc::now();

    // A user linked to one repository (with labels and an issue) and one org.
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
        .expect("issues");
    store
        .set_linked_repositories(1, &[(10, true)])
        .await
        .expect("links");
    store
        .set_organization_members(20, &[(1, false)])
        .await
        .expect("membership");

    let delta = store
        .compute_delta(1, &VersionVector::new(), 100)
        .await
        .expect("delta");

    assert!(delta.removed_repositories.is_empty());
    assert!(delta.removed_organizations.is_empty());

    let entries: Vec<_> = delta
        .pages
        .iter()
        .flat_map(|p| p.entries.iter())
        .collect();
    assert_eq!(delta.total_entries, entries.len());
    assert!(entries.iter().all(|e| e.action == SyncAction::Set));

    // Apply like a reference client, insisting every reference is satisfied
    // by the time it is used.
    let mut seen_accounts: Vec<i64> = Vec::new();
    let mut seen_repo = false;
    let mut seen_issue = false;
    let mut seen_org = false;
    for entry in &entries {
        match &entry.record {
            EntryRecord::User(account) => seen_accounts.push(account.id),
            EntryRecord::Organization(org) => {
                if org.id == 20 {
                    seen_org = true;
                    assert_eq!(org.members, vec![1]);
                    assert_eq!(org.login.as_deref(), Some("octo-org"));
                }
            }
            EntryRecord::Issue(issue) => {
                assert!(
                    seen_accounts.contains(&issue.user),
                    "issue author must arrive before the issue"
                );
                assert!(!seen_repo, "issues precede their repository record");
                assert_eq!(issue.repository, 10);
                assert_eq!(issue.labels.len(), 1);
                seen_issue = true;
            }
            EntryRecord::Repository(repo) => {
                assert_eq!(repo.id, 10);
                assert_eq!(repo.full_name.as_deref(), Some("alice/mirror"));
                assert_eq!(repo.owner, Some(1));
                assert_eq!(repo.labels.len(), 1, "repository embeds label summaries");
                seen_repo = true;
            }
        }
    }
    assert!(seen_repo && seen_issue && seen_org);

    // Repository pages precede organization pages.
    let repo_pos = entries
        .iter()
        .position(|e| matches!(&e.record, EntryRecord::Repository(_)))
        .expect("repo entry");
    let org_pos = entries
        .iter()
        .position(|e| matches!(&e.record, EntryRecord::Organization(o) if o.id == 20))
        .expect("org entry");
    assert!(repo_pos < org_pos);

    // The final vector covers both roots.
    assert!(delta.final_vector.repository(10) > 0);
    assert!(delta.final_vector.organization(20) > 0);

    // Replaying the final vector yields nothing.
    let caught_up = store
        .compute_delta(1, &delta.final_vector, 100)
        .await
        .expect("second delta");
    assert!(caught_up.is_empty());
}

#[tokio::test]
async fn lost_access_is_removed_before_any_set_entries() {
    let store = test_store().await;
    let now = Utc::now();

    store
        .upsert_account(now, &account_record(1, "alice"))
        .await
        .expect("user");
    store
        .bulk_upsert_repositories(now, &[repository_record(7, 1, "alice", "kept")])
        .await
        .expect("repo seven");
    store
        .set_linked_repositories(1, &[(7, true)])
        .await
        .expect("links");

    // Advance repo 7 beyond the client's version with an issue merge.
    store
        .bulk_upsert_issues(7, now, &[issue_record(700, 1, "newer", 1)])
        .await
        .expect("issue");

    // Client believes it still sees repo 9 at version 2.
    let mut client = VersionVector::new();
    client.set_repository(7, 0);
    client.set_repository(9, 2);

    let delta = store.compute_delta(1, &client, 100).await.expect("delta");

    assert_eq!(delta.removed_repositories, vec![9]);
    assert_eq!(delta.vector_after_removals.repository(9), 0);
    assert!(
        !delta
            .vector_after_removals
            .repositories
            .contains_key(&9),
        "removed roots leave the vector entirely"
    );

    let entries: Vec<_> = delta.pages.iter().flat_map(|p| p.entries.iter()).collect();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| e.action == SyncAction::Set));

    // Final vector names only the surviving repository.
    assert!(delta.final_vector.repository(7) > 0);
    assert!(!delta.final_vector.repositories.contains_key(&9));
}

#[tokio::test]
async fn pages_respect_budget_and_carry_resumable_vectors() {
    let store = test_store().await;
    let now = Utc::now();

    store
        .upsert_account(now, &account_record(1, "alice"))
        .await
        .expect("user");
    store
        .bulk_upsert_repositories(now, &[repository_record(10, 1, "alice", "mirror")])
        .await
        .expect("repo");
    store
        .set_linked_repositories(1, &[(10, true)])
        .await
        .expect("links");
    let issues: Vec<_> = (0..5)
        .map(|n| issue_record(100 + n, n, &format!("issue {n}"), 1))
        .collect();
    store
        .bulk_upsert_issues(10, now, &issues)
        .await
        .expect("issues");

    let delta = store
        .compute_delta(1, &VersionVector::new(), 2)
        .await
        .expect("delta");

    assert!(delta.pages.len() > 1);
    for page in &delta.pages {
        assert!(page.entries.len() <= 2);
    }

    // Resuming from any page vector must converge: replay the vector of an
    // early page and verify the remaining entries still arrive.
    let mid = delta.pages[0].versions.clone();
    let resumed = store.compute_delta(1, &mid, 2).await.expect("resume");
    let total_after_resume: usize = resumed.total_entries;
    assert!(total_after_resume <= delta.total_entries);

    // Resuming from the final vector is empty.
    let done = store
        .compute_delta(1, &delta.final_vector, 2)
        .await
        .expect("done");
    assert!(done.is_empty());
}

#[tokio::test]
async fn account_rename_bumps_referencing_roots() {
    let store = test_store().await;
    let now = Utc::now();

    store
        .upsert_account(now, &account_record(1, "alice"))
        .await
        .expect("user");
    store
        .bulk_upsert_repositories(now, &[repository_record(10, 1, "alice", "mirror")])
        .await
        .expect("repo");
    store
        .set_linked_repositories(1, &[(10, true)])
        .await
        .expect("links");
    store
        .bulk_upsert_issues(10, now, &[issue_record(100, 1, "a", 2)])
        .await
        .expect("issue by bob");
    store
        .upsert_account(now, &account_record(2, "bob"))
        .await
        .expect("author row");

    let baseline = store
        .compute_delta(1, &VersionVector::new(), 100)
        .await
        .expect("baseline");
    let before = baseline.final_vector.repository(10);

    // Renaming the author must re-surface the repository's account entry.
    let changes = store
        .upsert_account(now + Duration::seconds(5), &account_record(2, "robert"))
        .await
        .expect("rename");
    assert!(changes.users.contains(&2));
    assert!(changes.repositories.contains(&10));

    let delta = store
        .compute_delta(1, &baseline.final_vector, 100)
        .await
        .expect("incremental");
    assert!(delta.final_vector.repository(10) > before);
    let logins: Vec<_> = delta
        .pages
        .iter()
        .flat_map(|p| p.entries.iter())
        .filter_map(|e| match &e.record {
            EntryRecord::User(a) => a.login.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(logins, vec!["robert".to_string()]);
}
