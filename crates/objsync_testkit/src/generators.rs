//! Property-based test generators using proptest.

use crate::fixtures::{Link, Note};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Strategy for object IDs.
pub fn id_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Strategy for timestamps within a few years of 2024.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..100_000_000).prop_map(|seconds| {
        Utc.timestamp_opt(1_640_995_200 + seconds, 0)
            .single()
            .expect("timestamp in range")
    })
}

/// Strategy for note titles, including empty ones and unicode.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        1 => Just(String::new()),
        6 => "[A-Za-z0-9 ]{1,24}",
        1 => "\\PC{1,12}",
    ]
}

/// Strategy for notes, some of them journal notes or tombstones.
pub fn note_strategy() -> impl Strategy<Value = Note> {
    (
        id_strategy(),
        title_strategy(),
        prop::option::weighted(0.2, (0u32..365).prop_map(day_of_2024)),
        "[a-z ]{0,64}",
        prop::collection::btree_set(id_strategy(), 0..4),
        timestamp_strategy(),
        0i64..1_000_000,
        prop::option::weighted(0.1, 0i64..1_000_000),
    )
        .prop_map(
            |(id, title, journal_date, body, children, created_at, age, deleted)| Note {
                id,
                title,
                journal_date,
                body,
                children,
                created_at,
                updated_at: created_at + Duration::seconds(age),
                deleted_at: deleted.map(|d| created_at + Duration::seconds(age + d)),
            },
        )
}

/// Strategy for links.
pub fn link_strategy() -> impl Strategy<Value = Link> {
    (
        id_strategy(),
        "https://[a-z]{1,12}\\.example/[a-z]{0,8}",
        "[A-Za-z ]{0,24}",
        any::<u32>(),
        timestamp_strategy(),
    )
        .prop_map(|(id, url, title, frecency, at)| Link {
            id,
            url,
            title,
            frecency,
            created_at: at,
            updated_at: at,
            deleted_at: None,
        })
}

/// Strategy for a batch of distinct notes.
pub fn note_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Note>> {
    prop::collection::vec(note_strategy(), 1..=max.max(1)).prop_map(|mut notes| {
        let mut seen = BTreeSet::new();
        notes.retain(|note| seen.insert(note.id));
        notes
    })
}

fn day_of_2024(offset: u32) -> NaiveDate {
    NaiveDate::from_yo_opt(2024, offset + 1).expect("day of 2024")
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_engine::{checksum_of, seal, unseal, Identifiable};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn notes_have_ordered_timestamps(note in note_strategy()) {
            prop_assert!(note.updated_at >= note.created_at);
            if let Some(deleted_at) = note.deleted_at {
                prop_assert!(deleted_at >= note.updated_at);
            }
        }

        #[test]
        fn unsealed_note_keeps_checksum(note in note_strategy()) {
            let envelope = seal(&note).unwrap();
            let decoded: Note = unseal(&envelope).unwrap();
            prop_assert_eq!(&decoded, &note);
            prop_assert_eq!(checksum_of(&decoded).unwrap(), envelope.checksum());
        }

        #[test]
        fn batches_have_unique_ids(notes in note_batch_strategy(8)) {
            let ids: BTreeSet<_> = notes.iter().map(Identifiable::id).collect();
            prop_assert_eq!(ids.len(), notes.len());
        }
    }
}
