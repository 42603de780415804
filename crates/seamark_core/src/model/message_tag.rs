//! Message tag model.
//!
//! Tags group messages for private, domain-wide or public use. Temporary tags
//! carry an expiry and are meant to be short lived.

use crate::model::record::{deserialize_trimmed, RecordMeta, SyncableRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifetime of temporary tags, in milliseconds.
pub const TEMP_TAG_EXPIRY_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTagType {
    Private,
    Domain,
    Public,
    Temp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTag {
    #[serde(deserialize_with = "deserialize_trimmed")]
    pub tag_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub tag_type: MessageTagType,
    /// Epoch ms after which the tag may be purged.
    #[serde(default)]
    pub expiry_date: Option<i64>,
    #[serde(default)]
    pub message_uids: BTreeSet<String>,
    #[serde(skip)]
    pub meta: RecordMeta,
}

impl MessageTag {
    pub fn new(tag_id: impl Into<String>, name: impl Into<String>, tag_type: MessageTagType) -> Self {
        Self {
            tag_id: tag_id.into().trim().to_string(),
            name: name.into(),
            tag_type,
            expiry_date: None,
            message_uids: BTreeSet::new(),
            meta: RecordMeta::default(),
        }
    }

    /// Creates a temporary tag expiring `TEMP_TAG_EXPIRY_MS` after `now_ms`.
    pub fn temporary(tag_id: impl Into<String>, now_ms: i64) -> Self {
        let tag_id = tag_id.into();
        let mut tag = Self::new(tag_id.clone(), tag_id, MessageTagType::Temp);
        tag.expiry_date = Some(now_ms + TEMP_TAG_EXPIRY_MS);
        tag
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= now_ms)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MessageTagFields<'a> {
    pub name: &'a str,
    pub tag_type: MessageTagType,
    pub expiry_date: Option<i64>,
    pub message_uids: &'a BTreeSet<String>,
}

impl SyncableRecord for MessageTag {
    type Fields<'a> = MessageTagFields<'a>;

    fn natural_key(&self) -> Option<&str> {
        (!self.tag_id.trim().is_empty()).then_some(self.tag_id.as_str())
    }

    fn significant_fields(&self) -> Self::Fields<'_> {
        MessageTagFields {
            name: &self.name,
            tag_type: self.tag_type,
            expiry_date: self.expiry_date,
            message_uids: &self.message_uids,
        }
    }

    fn absorb(&mut self, candidate: &Self) {
        self.name = candidate.name.clone();
        self.tag_type = candidate.tag_type;
        self.expiry_date = candidate.expiry_date;
        self.message_uids = candidate.message_uids.clone();
    }
}
