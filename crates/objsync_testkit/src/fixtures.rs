//! Sample domain types.
//!
//! [`Note`] exercises identity collisions (titles and journal dates) and
//! field-level merging; [`Link`] has no uniqueness key and comes with a
//! field-level resolver.

use chrono::{DateTime, NaiveDate, Utc};
use objsync_engine::{ConflictResolver, Identifiable, Mergeable, SyncObject};
use objsync_protocol::Timestamps;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A note, optionally a journal entry for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Stable ID.
    pub id: Uuid,
    /// Title; unique among live notes.
    pub title: String,
    /// Day of a journal note; unique among live journal notes.
    pub journal_date: Option<NaiveDate>,
    /// Body text.
    pub body: String,
    /// Child note IDs.
    pub children: BTreeSet<Uuid>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Tombstone time.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Note {
    /// Creates a titled note.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            journal_date: None,
            body: String::new(),
            children: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Creates an untitled journal note for `date`.
    pub fn journal(date: NaiveDate) -> Self {
        Self {
            journal_date: Some(date),
            ..Self::new("")
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns an edited copy with `updated_at` moved forward.
    pub fn edited(&self, body: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.body = body.into();
        next.updated_at = self.updated_at.max(Utc::now()) + chrono::Duration::milliseconds(1);
        next
    }
}

impl Identifiable for Note {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl SyncObject for Note {
    const TYPE_TAG: &'static str = "note";

    fn timestamps(&self) -> Timestamps {
        Timestamps {
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }

    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>) {
        self.deleted_at = deleted_at;
    }

    fn is_empty(&self) -> bool {
        self.journal_date.is_none()
            && self.title.trim().is_empty()
            && self.body.trim().is_empty()
            && self.children.is_empty()
    }

    fn uniqueness_key(&self) -> Option<String> {
        match self.journal_date {
            Some(date) => Some(format!("journal:{date}")),
            None if self.title.is_empty() => None,
            None => Some(self.title.clone()),
        }
    }

    fn with_uniqueness_key(&self, key: &str) -> Option<Self> {
        if self.journal_date.is_some() {
            return None;
        }
        Some(Self {
            title: key.to_string(),
            ..self.clone()
        })
    }
}

impl Mergeable for Note {
    /// Newer text wins; children are unioned; a deletion on either side is
    /// kept.
    fn merge(&self, remote: &Self) -> Self {
        let newer = if remote.updated_at > self.updated_at {
            remote
        } else {
            self
        };
        let mut merged = newer.clone();
        merged.children = self.children.union(&remote.children).copied().collect();
        merged.updated_at = self.updated_at.max(remote.updated_at);
        merged.deleted_at = match (self.deleted_at, remote.deleted_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        merged
    }
}

/// A bookmarked link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Stable ID.
    pub id: Uuid,
    /// Target URL.
    pub url: String,
    /// Display title.
    pub title: String,
    /// Visit score; only ever grows locally.
    pub frecency: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Tombstone time.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Link {
    /// Creates a link.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            title: title.into(),
            frecency: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl Identifiable for Link {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl SyncObject for Link {
    const TYPE_TAG: &'static str = "link";

    fn timestamps(&self) -> Timestamps {
        Timestamps {
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }

    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>) {
        self.deleted_at = deleted_at;
    }

    fn is_empty(&self) -> bool {
        self.url.is_empty()
    }
}

/// Remote title wins; the greater frecency is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkResolver;

impl ConflictResolver<Link> for LinkResolver {
    fn merge(&self, local: &Link, remote: &Link) -> Link {
        Link {
            title: remote.title.clone(),
            url: remote.url.clone(),
            frecency: local.frecency.max(remote.frecency),
            updated_at: local.updated_at.max(remote.updated_at),
            deleted_at: remote.deleted_at.or(local.deleted_at),
            ..local.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn journal_notes_collide_by_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let a = Note::journal(date);
        let b = Note::journal(date);
        assert_eq!(a.uniqueness_key(), b.uniqueness_key());
        assert!(a.with_uniqueness_key("x").is_none());
        assert!(!a.is_empty());
    }

    #[test]
    fn untitled_note_is_empty() {
        assert!(Note::new("  ").is_empty());
        assert!(!Note::new("").with_body("text").is_empty());
        assert_eq!(Note::new("").uniqueness_key(), None);
    }

    #[test]
    fn note_merge_unions_children() {
        let base = Note::new("Doc");
        let mut local = base.clone();
        local.children.insert(Uuid::new_v4());
        let mut remote = base.edited("remote body");
        remote.children.insert(Uuid::new_v4());

        let merged = local.merge(&remote);
        assert_eq!(merged.children.len(), 2);
        assert_eq!(merged.body, "remote body");
        assert_eq!(merged, remote.merge(&local));
    }

    #[test]
    fn link_resolver_keeps_greater_frecency() {
        let mut local = Link::new("https://example.com", "Local");
        local.frecency = 40;
        let mut remote = local.clone();
        remote.title = "Remote".into();
        remote.frecency = 10;
        remote.updated_at = local.updated_at + Duration::seconds(1);

        let merged = LinkResolver.merge(&local, &remote);
        assert_eq!(merged.title, "Remote");
        assert_eq!(merged.frecency, 40);
        assert_eq!(merged.updated_at, remote.updated_at);
    }
}
