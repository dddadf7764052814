//! Requests and responses survive a CBOR hop.

use chrono::{TimeZone, Utc};
use objsync_codec::to_canonical_bytes;
use objsync_protocol::wire::{BatchSaveRequest, ChecksumEntry, Request, Response};
use objsync_protocol::{Checksum, Envelope, Timestamps, UploadSlot};
use proptest::prelude::*;
use uuid::Uuid;

fn envelope(title: &str, deleted: bool) -> Envelope {
    let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    let timestamps = Timestamps {
        created_at: created,
        updated_at: created,
        deleted_at: deleted.then_some(created),
    };
    let bytes = to_canonical_bytes(&title.to_string()).unwrap();
    Envelope::seal(Uuid::new_v4(), "note", bytes, timestamps)
        .with_previous_checksum(Some(Checksum::of(b"older")))
}

#[test]
fn batch_request_keeps_envelopes() {
    let envelopes = vec![envelope("Doc 1", false), envelope("Doc 2", true)];
    let request = Request::SaveBatch(BatchSaveRequest::from_envelopes(&envelopes));

    let Request::SaveBatch(decoded) = Request::decode(&request.encode().unwrap()).unwrap() else {
        panic!("wrong request kind");
    };
    let rebuilt: Vec<Envelope> = decoded
        .records
        .into_iter()
        .map(|r| Envelope::try_from(r).unwrap())
        .collect();
    assert_eq!(rebuilt, envelopes);
}

#[test]
fn blob_upload_request() {
    let request = Request::PutBlob {
        url: "mem://upload/1".into(),
        headers: [("x-signature".to_string(), "abc".to_string())].into(),
        data: vec![0u8; 64],
    };
    assert_eq!(Request::decode(&request.encode().unwrap()).unwrap(), request);
}

#[test]
fn responses() {
    let slot = UploadSlot::new(Uuid::new_v4(), "mem://upload/1", "blob-1").with_header("k", "v");
    let listing = vec![ChecksumEntry {
        id: Uuid::new_v4(),
        checksum: Checksum::of(b"payload"),
        received_at: Utc::now(),
    }];
    for response in [
        Response::Upload(slot),
        Response::Checksums(listing),
        Response::Done,
        Response::error("store unavailable", true),
    ] {
        assert_eq!(Response::decode(&response.encode().unwrap()).unwrap(), response);
    }
}

proptest! {
    #[test]
    fn envelope_checksum_survives_transport(title in "[a-zA-Z0-9 ]{0,40}") {
        let original = envelope(&title, false);
        let request = Request::Save((&original).into());
        let Request::Save(record) = Request::decode(&request.encode().unwrap()).unwrap() else {
            panic!("wrong request kind");
        };
        let rebuilt = Envelope::try_from(record).unwrap();
        prop_assert_eq!(rebuilt.checksum(), original.checksum());
        prop_assert_eq!(rebuilt.decode::<String>().unwrap(), title);
    }
}
