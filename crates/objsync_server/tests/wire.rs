//! End-to-end tests of the encoded request path.

use bytes::Bytes;
use objsync_codec::to_canonical_bytes;
use objsync_protocol::wire::{BatchSaveRequest, Request, Response};
use objsync_protocol::{Envelope, EnvelopeOutcome, Timestamps};
use objsync_server::{ServerConfig, SyncServer};
use std::collections::BTreeMap;
use uuid::Uuid;

fn note(id: Uuid, title: &str) -> Envelope {
    let mut fields = BTreeMap::new();
    fields.insert("title", title);
    let payload = to_canonical_bytes(&fields).unwrap();
    Envelope::seal(id, "note", Bytes::from(payload), Timestamps::now())
}

fn call(server: &SyncServer, request: Request) -> Response {
    let reply = server.handle_bytes(&request.encode().unwrap());
    Response::decode(&reply).unwrap()
}

fn batch(server: &SyncServer, envelopes: &[Envelope]) -> Vec<EnvelopeOutcome> {
    match call(server, Request::SaveBatch(BatchSaveRequest::from_envelopes(envelopes))) {
        Response::SavedBatch(response) => response.into_outcomes().unwrap(),
        other => panic!("unexpected response {other:?}"),
    }
}

#[test]
fn batch_with_one_stale_entry() {
    let server = SyncServer::default();
    let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let first: Vec<Envelope> = ids.iter().map(|id| note(*id, "v1")).collect();
    assert!(batch(&server, &first).iter().all(EnvelopeOutcome::is_accepted));

    // Another device advances the third object.
    let advanced = note(ids[2], "other device").with_previous_checksum(Some(first[2].checksum()));
    assert!(batch(&server, &[advanced.clone()])[0].is_accepted());

    let second: Vec<Envelope> = ids
        .iter()
        .zip(&first)
        .map(|(id, prev)| note(*id, "v2").with_previous_checksum(Some(prev.checksum())))
        .collect();
    let outcomes = batch(&server, &second);

    let conflicts: Vec<_> = outcomes.iter().filter(|o| !o.is_accepted()).collect();
    assert_eq!(conflicts.len(), 1);
    let EnvelopeOutcome::Conflict { id, remote } = conflicts[0] else {
        unreachable!();
    };
    assert_eq!(*id, ids[2]);
    assert_eq!(remote.as_ref().unwrap().checksum(), advanced.checksum());
}

#[test]
fn conflicts_without_embedding() {
    let server = SyncServer::new(ServerConfig::default().without_embedded_remote());
    let id = Uuid::new_v4();
    batch(&server, &[note(id, "v1")]);

    let outcomes = batch(&server, &[note(id, "v2")]);
    assert_eq!(outcomes[0], EnvelopeOutcome::Conflict { id, remote: None });
}

#[test]
fn checksum_listing_follows_cursor() {
    let server = SyncServer::default();
    batch(&server, &[note(Uuid::new_v4(), "a"), note(Uuid::new_v4(), "b")]);

    let Response::Checksums(all) = call(
        &server,
        Request::FetchChecksums {
            type_tag: "note".into(),
            since: None,
        },
    ) else {
        panic!("expected checksums");
    };
    assert_eq!(all.len(), 2);

    let late = note(Uuid::new_v4(), "c");
    batch(&server, &[late.clone()]);
    let cursor = all.iter().map(|e| e.received_at).max();

    let Response::Checksums(delta) = call(
        &server,
        Request::FetchChecksums {
            type_tag: "note".into(),
            since: cursor,
        },
    ) else {
        panic!("expected checksums");
    };
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].id, late.id());
    assert_eq!(delta[0].checksum, late.checksum());
}

#[test]
fn delete_all_by_type() {
    let server = SyncServer::default();
    batch(&server, &[note(Uuid::new_v4(), "a")]);
    let other = Envelope::seal(Uuid::new_v4(), "link", Bytes::from_static(b"\xa0"), Timestamps::now());
    batch(&server, &[other]);

    let response = call(
        &server,
        Request::DeleteAll {
            type_tag: Some("note".into()),
        },
    );
    assert_eq!(response, Response::Done);
    assert_eq!(server.object_count(), 1);
}
