mod support;

use chrono::{Duration as ChronoDuration, Utc};
use journal_cloud::{
    CloudError, ConflictWinner, RemoteJournal, RemoteSettings, SyncConfig, SyncOutcome,
    SyncReport,
};
use journal_storage::JournalStore;
use journal_types::{EntryPayload, NewEntry, SettingsPatch, SyncStatus};
use pretty_assertions::assert_eq;
use std::time::Duration;
use support::*;

async fn completed(harness: &Harness) -> SyncReport {
    match harness.engine.sync().await.unwrap() {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}

fn statuses(store: &JournalStore) -> Vec<Option<SyncStatus>> {
    store
        .list_entries()
        .unwrap()
        .into_iter()
        .map(|e| e.sync_status)
        .collect()
}

// --- Guards ---

#[tokio::test]
async fn signed_out_cycle_is_skipped() {
    let h = harness();
    h.auth.sign_out();
    local_entry(&h.store, "offline");

    assert_eq!(h.engine.sync().await.unwrap(), SyncOutcome::NotAuthenticated);
    assert_eq!(h.remote.list_calls(), 0);
    assert!(h.engine.state().snapshot().last_sync_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn overlapping_cycles_are_deduplicated() {
    let h = harness();
    h.remote.set_latency(Some(Duration::from_millis(50)));

    let (a, b) = tokio::join!(h.engine.sync(), h.engine.sync());
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Completed(_)))
            .count(),
        1
    );
    assert!(outcomes.contains(&SyncOutcome::AlreadyRunning));
    assert_eq!(h.remote.list_calls(), 1);
    assert!(!h.engine.state().is_syncing());
}

// --- Push ---

#[tokio::test]
async fn push_creates_remote_rows() {
    let h = harness();
    let first = local_entry(&h.store, "first");
    local_entry(&h.store, "second");

    let report = completed(&h).await;
    assert_eq!(report.pushed_created, 2);
    assert!(report.push_failures.is_empty());

    let stored = h.store.get_entry(first.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, Some(SyncStatus::Synced));
    let remote_id = stored.remote_id.clone().unwrap();
    let row = h.remote.journal(&remote_id).unwrap();
    assert_eq!(row.raw_blob.as_deref(), first.raw_blob());
    assert_eq!(row.user_id, USER);
    assert_eq!(h.remote.journals(USER).len(), 2);

    // Nothing changed on either side.
    let again = completed(&h).await;
    assert_eq!(again, SyncReport::default());
    assert_eq!(h.engine.state().snapshot().pending_count, 0);
}

#[tokio::test]
async fn local_edit_is_pushed_as_update() {
    let h = harness();
    let entry = local_entry(&h.store, "draft");
    completed(&h).await;

    h.store
        .update_entry_blob(entry.id, &EntryPayload::Plain(blob("final")))
        .unwrap();
    let report = completed(&h).await;
    assert_eq!(report.pushed_updated, 1);
    assert_eq!(report.conflicts, 0);

    let stored = h.store.get_entry(entry.id).unwrap().unwrap();
    let row = h.remote.journal(stored.remote_id.as_deref().unwrap()).unwrap();
    assert_eq!(row.raw_blob, Some(blob("final")));
    assert_eq!(row.version, 2);
}

#[tokio::test(start_paused = true)]
async fn edit_during_push_reaches_remote_next_cycle() {
    let h = harness();
    let entry = local_entry(&h.store, "first draft");
    h.remote.set_latency(Some(Duration::from_millis(100)));

    // list_journals and get_settings take the first 200ms; the create is
    // still in flight at 250ms.
    let engine = h.engine.clone();
    let cycle = tokio::spawn(async move { engine.sync().await });
    tokio::time::sleep(Duration::from_millis(250)).await;
    h.store
        .update_entry_blob(entry.id, &EntryPayload::Plain(blob("second draft")))
        .unwrap();

    let SyncOutcome::Completed(report) = cycle.await.unwrap().unwrap() else {
        panic!("expected a completed cycle");
    };
    assert_eq!(report.pushed_created, 1);

    let stored = h.store.get_entry(entry.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, Some(SyncStatus::Pending));
    assert_eq!(content_of(&stored), "second draft");
    let remote_id = stored.remote_id.clone().unwrap();
    assert_eq!(h.remote.journal(&remote_id).unwrap().raw_blob, Some(blob("first draft")));
    assert_eq!(h.engine.state().snapshot().pending_count, 1);

    h.remote.set_latency(None);
    let report = completed(&h).await;
    assert_eq!(report.pushed_updated, 1);
    assert_eq!(report.conflicts, 0);
    assert_eq!(h.remote.journal(&remote_id).unwrap().raw_blob, Some(blob("second draft")));
    assert_eq!(h.remote.journals(USER).len(), 1);
    assert_eq!(statuses(&h.store), vec![Some(SyncStatus::Synced)]);

    assert_eq!(completed(&h).await, SyncReport::default());
}

#[tokio::test]
async fn encrypted_entries_leave_as_ciphertext() {
    let h = harness();
    let envelope = r#"{"cipher":"c2VjcmV0","iv":"AAAAAAAAAAAAAAAA"}"#;
    h.store
        .insert_entry(
            NewEntry::new(EntryPayload::Encrypted(envelope.into()))
                .owned_by(Some(USER.to_string())),
        )
        .unwrap();

    completed(&h).await;
    let rows = h.remote.journals(USER);
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_encrypted);
    assert_eq!(rows[0].raw_blob, None);
    assert_eq!(rows[0].encrypted_blob.as_deref(), Some(envelope));
}

#[tokio::test]
async fn one_failing_push_is_isolated() {
    let h = harness_with(SyncConfig {
        push_batch_size: 4,
        ..SyncConfig::default()
    });
    for i in 0..10 {
        local_entry(&h.store, &format!("entry-{i}"));
    }
    h.remote
        .fail_writes_when(|w| w.raw_blob.as_deref().is_some_and(|b| b.contains("entry-7")));

    let report = completed(&h).await;
    assert_eq!(report.pushed_created, 9);
    assert_eq!(report.push_failures.len(), 1);

    let stats = statuses(&h.store);
    assert_eq!(stats.iter().filter(|s| **s == Some(SyncStatus::Synced)).count(), 9);
    assert_eq!(stats.iter().filter(|s| **s == Some(SyncStatus::Error)).count(), 1);
    let failed = h.store.get_entry(report.push_failures[0]).unwrap().unwrap();
    assert_eq!(content_of(&failed), "entry-7");
    assert_eq!(h.engine.state().snapshot().sync_error, None);

    // Failed entries are retried on the next cycle.
    h.remote.clear_failures();
    let retry = completed(&h).await;
    assert_eq!(retry.pushed_created, 1);
    assert!(statuses(&h.store)
        .iter()
        .all(|s| *s == Some(SyncStatus::Synced)));
}

#[tokio::test]
async fn unowned_entries_wait_for_adoption() {
    let h = harness();
    h.store
        .insert_entry(NewEntry::new(EntryPayload::Plain(blob("before sign-in"))))
        .unwrap();

    assert_eq!(completed(&h).await.pushed_created, 0);
    assert_eq!(h.engine.adopt_unowned_entries().unwrap(), 1);
    assert_eq!(completed(&h).await.pushed_created, 1);
    assert_eq!(h.store.count_unowned().unwrap(), 0);

    h.auth.sign_out();
    assert!(matches!(
        h.engine.adopt_unowned_entries(),
        Err(CloudError::AuthRequired)
    ));
}

// --- Pull ---

#[tokio::test]
async fn pull_inserts_new_remote_rows() {
    let h = harness();
    h.remote.put_journal(remote_row("r-1", "from phone", Utc::now()));

    let report = completed(&h).await;
    assert_eq!(report.pulled_inserted, 1);
    assert_eq!(report.pushed_created + report.pushed_updated, 0);

    let local = h.store.find_by_remote_id("r-1").unwrap().unwrap();
    assert_eq!(content_of(&local), "from phone");
    assert_eq!(local.sync_status, Some(SyncStatus::Synced));
    assert_eq!(local.user_id.as_deref(), Some(USER));
    assert!(local.synced_at.is_some());

    // A second pull sees no change.
    assert_eq!(completed(&h).await.pulled_updated, 0);
}

#[tokio::test]
async fn inconsistent_remote_rows_are_skipped() {
    let h = harness();
    let now = Utc::now();
    h.remote.put_journal(RemoteJournal {
        is_encrypted: true,
        ..remote_row("flag-mismatch", "x", now)
    });
    h.remote.put_journal(RemoteJournal {
        raw_blob: Some("not json".into()),
        ..remote_row("garbage", "x", now)
    });
    h.remote.put_journal(remote_row("fine", "ok", now));

    let report = completed(&h).await;
    assert_eq!(report.skipped_invalid, 2);
    assert_eq!(report.pulled_inserted, 1);
    assert_eq!(h.store.count_entries().unwrap(), 1);
}

#[tokio::test]
async fn remote_edit_is_applied() {
    let h = harness();
    let entry = local_entry(&h.store, "mine");
    completed(&h).await;
    let remote_id = h.store.get_entry(entry.id).unwrap().unwrap().remote_id.unwrap();

    let later = Utc::now() + ChronoDuration::minutes(5);
    h.remote.put_journal(remote_row(&remote_id, "edited elsewhere", later));

    let report = completed(&h).await;
    assert_eq!(report.pulled_updated, 1);
    assert_eq!(report.conflicts, 0);
    let local = h.store.get_entry(entry.id).unwrap().unwrap();
    assert_eq!(content_of(&local), "edited elsewhere");
    assert_eq!(local.sync_status, Some(SyncStatus::Synced));
}

#[tokio::test]
async fn conflict_newer_remote_wins() {
    let h = harness();
    let entry = local_entry(&h.store, "base");
    completed(&h).await;
    let remote_id = h.store.get_entry(entry.id).unwrap().unwrap().remote_id.unwrap();

    h.store
        .update_entry_blob(entry.id, &EntryPayload::Plain(blob("local edit")))
        .unwrap();
    let later = Utc::now() + ChronoDuration::hours(1);
    h.remote.put_journal(remote_row(&remote_id, "remote edit", later));

    let report = completed(&h).await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.pushed_updated, 0);

    let local = h.store.get_entry(entry.id).unwrap().unwrap();
    assert_eq!(content_of(&local), "remote edit");

    let conflicts = h.engine.state().conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].local_id, entry.id);
    assert_eq!(conflicts[0].remote_id, remote_id);
    assert_eq!(conflicts[0].winner, ConflictWinner::Remote);

    h.engine.state().clear_conflicts();
    assert!(h.engine.state().conflicts().is_empty());
}

#[tokio::test]
async fn conflict_newer_local_wins_and_is_pushed() {
    let h = harness();
    let entry = local_entry(&h.store, "base");
    completed(&h).await;
    let synced = h.store.get_entry(entry.id).unwrap().unwrap();
    let remote_id = synced.remote_id.clone().unwrap();
    let synced_at = synced.synced_at.unwrap();

    h.remote.put_journal(remote_row(
        &remote_id,
        "remote edit",
        synced_at + ChronoDuration::milliseconds(1),
    ));
    std::thread::sleep(Duration::from_millis(20));
    h.store
        .update_entry_blob(entry.id, &EntryPayload::Plain(blob("local edit")))
        .unwrap();

    let report = completed(&h).await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.pushed_updated, 1);
    assert_eq!(h.engine.state().conflicts()[0].winner, ConflictWinner::Local);

    let local = h.store.get_entry(entry.id).unwrap().unwrap();
    assert_eq!(content_of(&local), "local edit");
    assert_eq!(local.sync_status, Some(SyncStatus::Synced));
    assert_eq!(h.remote.journal(&remote_id).unwrap().raw_blob, Some(blob("local edit")));
}

// --- Failure ---

#[tokio::test]
async fn failed_cycle_is_recorded_and_backs_off() {
    let h = harness();
    local_entry(&h.store, "queued");
    h.remote.set_offline(true);

    let err = h.engine.sync().await.unwrap_err();
    assert!(matches!(err, CloudError::Remote(_)));
    let snapshot = h.engine.state().snapshot();
    assert!(!snapshot.is_syncing);
    assert_eq!(snapshot.sync_error.as_deref(), Some(err.to_string().as_str()));
    assert_eq!(snapshot.pending_count, 1);
    assert_eq!(h.engine.periodic_delay(), Duration::from_secs(60));

    h.engine.sync().await.unwrap_err();
    assert_eq!(h.engine.periodic_delay(), Duration::from_secs(120));
    assert_eq!(statuses(&h.store), vec![Some(SyncStatus::Pending)]);

    h.remote.set_offline(false);
    completed(&h).await;
    let snapshot = h.engine.state().snapshot();
    assert_eq!(snapshot.sync_error, None);
    assert!(snapshot.last_sync_at.is_some());
    assert_eq!(snapshot.pending_count, 0);
    assert_eq!(h.engine.periodic_delay(), Duration::from_secs(30));
}

// --- Settings ---

fn remote_settings(updated_at: chrono::DateTime<Utc>) -> RemoteSettings {
    RemoteSettings {
        user_id: USER.into(),
        lock_enabled: true,
        cursor_color: "#000000".into(),
        text_color: "#00ff00".into(),
        cleanup_enabled: true,
        cleanup_prompt: "Keep it short.".into(),
        selected_model: Some("tiny".into()),
        updated_at,
    }
}

#[tokio::test]
async fn default_settings_are_not_pushed() {
    let h = harness();
    let report = completed(&h).await;
    assert!(!report.settings_pushed);
    assert_eq!(h.remote.settings(USER), None);
}

#[tokio::test]
async fn settings_follow_last_write() {
    let h = harness();
    h.store
        .save_settings(&SettingsPatch {
            cursor_color: Some("#ff0000".into()),
            ..SettingsPatch::default()
        })
        .unwrap();

    let report = completed(&h).await;
    assert!(report.settings_pushed);
    assert_eq!(h.remote.settings(USER).unwrap().cursor_color, "#ff0000");
    assert!(!completed(&h).await.settings_pushed);

    // Newer remote row replaces local, except the device-bound lock flag.
    h.remote
        .put_settings(remote_settings(Utc::now() + ChronoDuration::hours(1)));
    let report = completed(&h).await;
    assert!(report.settings_pulled);
    assert!(!report.settings_pushed);
    let local = h.store.load_settings().unwrap();
    assert_eq!(local.text_color, "#00ff00");
    assert_eq!(local.cleanup_prompt, "Keep it short.");
    assert!(!local.lock_enabled);

    // A later local edit goes back out.
    h.store
        .save_settings(&SettingsPatch {
            text_color: Some("#123456".into()),
            ..SettingsPatch::default()
        })
        .unwrap();
    let report = completed(&h).await;
    assert!(!report.settings_pulled);
    assert!(report.settings_pushed);
    assert_eq!(h.remote.settings(USER).unwrap().text_color, "#123456");
}

#[tokio::test]
async fn older_remote_settings_are_ignored() {
    let h = harness();
    h.store
        .save_settings(&SettingsPatch {
            text_color: Some("#abcdef".into()),
            ..SettingsPatch::default()
        })
        .unwrap();
    h.remote
        .put_settings(remote_settings(Utc::now() - ChronoDuration::days(1)));

    let report = completed(&h).await;
    assert!(!report.settings_pulled);
    assert!(report.settings_pushed);
    assert_eq!(h.store.load_settings().unwrap().text_color, "#abcdef");
    assert_eq!(h.remote.settings(USER).unwrap().text_color, "#abcdef");
}

#[tokio::test]
async fn other_users_rows_are_invisible() {
    let h = harness();
    h.remote.put_journal(RemoteJournal {
        user_id: "someone-else".into(),
        ..remote_row("theirs", "private", Utc::now())
    });
    let report = completed(&h).await;
    assert_eq!(report.pulled_inserted, 0);
    assert_eq!(h.store.count_entries().unwrap(), 0);
}
