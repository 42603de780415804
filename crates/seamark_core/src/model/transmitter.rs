//! NAVTEX transmitter model.
//!
//! A transmitter covers zero or more areas; message promulgation selects the
//! transmitters whose areas fall inside the message areas.

use crate::model::record::{deserialize_trimmed, RecordMeta, SyncableRecord};
use crate::model::tree::NodeKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmitter {
    /// Unique transmitter name, used as natural key.
    #[serde(deserialize_with = "deserialize_trimmed")]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    /// Keys of the covered area nodes.
    #[serde(default)]
    pub areas: BTreeSet<NodeKey>,
    #[serde(skip)]
    pub meta: RecordMeta,
}

impl Transmitter {
    pub fn new(name: impl Into<String>, active: bool) -> Self {
        Self {
            name: name.into().trim().to_string(),
            active,
            areas: BTreeSet::new(),
            meta: RecordMeta::default(),
        }
    }

    pub fn covering(mut self, area: NodeKey) -> Self {
        self.areas.insert(area);
        self
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct TransmitterFields<'a> {
    pub active: bool,
    pub areas: &'a BTreeSet<NodeKey>,
}

impl SyncableRecord for Transmitter {
    type Fields<'a> = TransmitterFields<'a>;

    fn natural_key(&self) -> Option<&str> {
        (!self.name.trim().is_empty()).then_some(self.name.as_str())
    }

    fn significant_fields(&self) -> Self::Fields<'_> {
        TransmitterFields {
            active: self.active,
            areas: &self.areas,
        }
    }

    fn absorb(&mut self, candidate: &Self) {
        self.active = candidate.active;
        self.areas = candidate.areas.clone();
    }
}
