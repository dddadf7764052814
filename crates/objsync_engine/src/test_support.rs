//! A small record type for unit tests.

use crate::object::{Identifiable, SyncObject};
use chrono::{DateTime, Utc};
use objsync_protocol::Timestamps;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Doc {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Doc {
    pub fn new(title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            body: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl Identifiable for Doc {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl SyncObject for Doc {
    const TYPE_TAG: &'static str = "doc";

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
        self.title.is_empty() && self.body.is_empty()
    }

    fn uniqueness_key(&self) -> Option<String> {
        Some(self.title.clone())
    }

    fn with_uniqueness_key(&self, key: &str) -> Option<Self> {
        Some(Self {
            title: key.to_string(),
            ..self.clone()
        })
    }
}
