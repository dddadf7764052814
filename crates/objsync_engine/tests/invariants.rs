//! Engine invariants checked against a real server.

use objsync_engine::{
    ChecksumStore, CollisionPolicy, LocalStore, ReceiveConfig, ReceiveOutcome, SaveOptions,
    SyncObject,
};
use objsync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

#[tokio::test]
async fn failed_save_leaves_checksum_untouched() {
    init_tracing();
    let server = server();
    let phone: Device<Note> = Device::new(server.clone());
    let note = Note::new("Offline");

    phone.transport().fail_next("connection reset");
    let err = phone.edit(&note).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(phone.checksums.get(note.id).unwrap(), None);
    assert!(server.object(note.id).is_none());
    assert_eq!(phone.client.last_error().as_deref(), Some("connection reset"));

    let saved = phone.sync.save(&note).await.unwrap();
    assert_eq!(phone.checksums.get(note.id).unwrap(), Some(saved.checksum()));
}

#[tokio::test]
async fn failed_batch_leaves_every_checksum_untouched() {
    init_tracing();
    let server = server();
    let phone: Device<Note> = Device::new(server.clone());
    let notes: Vec<Note> = (0..3).map(|i| Note::new(format!("Batch {i}"))).collect();

    phone.transport().fail_next("gateway timeout");
    let err = phone.sync.save_all(&notes).await.unwrap_err();

    assert!(err.is_retryable());
    for note in &notes {
        assert_eq!(phone.checksums.get(note.id).unwrap(), None);
    }
    assert_eq!(server.object_count(), 0);
}

#[tokio::test]
async fn unchanged_resend_is_skipped_unless_forced() {
    init_tracing();
    let server = server();
    let phone: Device<Note> = Device::new(server.clone());
    let note = Note::new("Stable").with_body("same");

    let first = phone.edit(&note).await.unwrap();
    let second = phone.sync.save(&note).await.unwrap();
    assert_eq!(first.checksum(), second.checksum());
    assert_eq!(phone.transport().calls_of("save"), vec![1]);
    assert_eq!(phone.sync.stats().unchanged, 1);

    let forced = phone
        .sync
        .save_with(&note, &SaveOptions::forced())
        .await
        .unwrap();
    assert_eq!(forced.checksum(), first.checksum());
    assert_eq!(phone.transport().calls_of("save"), vec![1, 1]);
    assert_eq!(server.object(note.id).unwrap().checksum(), first.checksum());
}

#[tokio::test]
async fn replace_policy_converges_across_devices() {
    init_tracing();
    let server = server();
    let phone: Device<Note> = Device::new(server.clone());
    let laptop: Device<Note> = Device::new(server.clone());

    let note = Note::new("Shared").with_body("v1");
    phone.edit(&note).await.unwrap();
    laptop.pull().await.unwrap();
    laptop.edit(&note.edited("laptop")).await.unwrap();
    phone.edit(&note.edited("phone")).await.unwrap();

    let report = laptop.pull().await.unwrap().report;
    assert_eq!(report.outcome_for(note.id), Some(&ReceiveOutcome::Updated));
    let pull = phone.pull().await.unwrap();
    assert_eq!(pull.fetched, 0);

    let on_phone = phone.local.load(note.id).unwrap().unwrap();
    let on_laptop = laptop.local.load(note.id).unwrap().unwrap();
    let remote: Note = server.object(note.id).unwrap().decode().unwrap();
    assert_eq!(on_phone, remote);
    assert_eq!(on_laptop, remote);
    assert_eq!(remote.body, "phone");
}

#[tokio::test]
async fn receiving_known_content_writes_nothing() {
    init_tracing();
    let server = server();
    let writer: Device<Note> = Device::new(server.clone());
    let reader: Device<Note> = Device::new(server.clone());
    let notes: Vec<Note> = (0..3).map(|i| Note::new(format!("Known {i}"))).collect();
    writer.sync.save_all(&notes).await.unwrap();
    reader.pull().await.unwrap();

    let writes = reader.local.write_count();
    let calls = reader.transport().calls().len();
    let envelopes = notes
        .iter()
        .map(|note| server.object(note.id).unwrap())
        .collect();
    let report = reader.receiver.receive(envelopes).await.unwrap();

    assert!(report
        .outcomes
        .iter()
        .all(|(_, outcome)| *outcome == ReceiveOutcome::Unchanged));
    assert_eq!(reader.local.write_count(), writes);
    assert_eq!(reader.transport().calls().len(), calls);

    let pull = reader.pull().await.unwrap();
    assert_eq!(pull.listed, 0);
}

fn colliding_notes() -> impl Strategy<Value = Vec<Note>> {
    let title = prop_oneof![Just("Doc"), Just("Plan"), Just("")];
    prop::collection::vec((title, "[a-z]{0,3}", 0i64..5), 2..8).prop_map(|specs| {
        let base = chrono::Utc::now();
        specs
            .into_iter()
            .map(|(title, body, offset)| {
                let mut note = Note::new(title).with_body(body);
                note.created_at = base + chrono::Duration::seconds(offset);
                note.updated_at = note.created_at;
                note
            })
            .collect()
    })
}

/// Receives `notes` on a fresh device and checks that nothing was lost and
/// no two live notes share a key.
fn check_collision_safety(notes: Vec<Note>, policy: CollisionPolicy) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let server = server();
        let writer: Device<Note> = Device::new(server.clone());
        let reader: Device<Note> = Device::build(
            server.clone(),
            DeviceOptions::default()
                .with_receive(ReceiveConfig::new().with_collision_policy(policy)),
            |ctx| ctx,
        );
        writer.sync.save_all(&notes).await.unwrap();

        let report = reader.pull().await.unwrap().report;
        prop_assert!(report.is_clean());
        prop_assert_eq!(reader.local.ids().unwrap().len(), notes.len());

        let live = reader.local.live();
        let keys: Vec<String> = live.iter().filter_map(Note::uniqueness_key).collect();
        let distinct: HashSet<&String> = keys.iter().collect();
        prop_assert_eq!(distinct.len(), keys.len());

        let non_empty = notes.iter().filter(|note| !note.is_empty()).count();
        let disambiguated = report
            .outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ReceiveOutcome::Disambiguated { .. }))
            .count();
        let tombstoned = report
            .outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ReceiveOutcome::CollisionTombstoned { .. }))
            .count();
        prop_assert_eq!(live.len() + tombstoned, non_empty);
        if policy == CollisionPolicy::Disambiguate {
            prop_assert_eq!(tombstoned, 0);
            prop_assert_eq!(live.len(), non_empty);
            prop_assert!(disambiguated <= non_empty);
        }

        for note in &notes {
            let remote = server.object(note.id).unwrap();
            let local_deleted = reader.local.deleted_at(note.id).unwrap().is_some();
            prop_assert_eq!(remote.is_tombstone(), local_deleted);
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn collisions_never_lose_records(notes in colliding_notes()) {
        check_collision_safety(notes, CollisionPolicy::TombstoneLater)?;
    }

    #[test]
    fn disambiguation_keeps_every_record(notes in colliding_notes()) {
        check_collision_safety(notes, CollisionPolicy::Disambiguate)?;
    }
}
