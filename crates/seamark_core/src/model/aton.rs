//! Aid-to-navigation (AtoN) node model.
//!
//! AtoNs arrive in bulk from external registers and are keyed by their AtoN
//! UID. Free-form key/value tags carry everything else.

use crate::model::record::{deserialize_trimmed, float_bits, RecordMeta, SyncableRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag key holding the human readable name of the AtoN.
pub const TAG_NAME: &str = "seamark:name";

/// One AtoN with OSM-style tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtonNode {
    #[serde(deserialize_with = "deserialize_trimmed")]
    pub aton_uid: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(skip)]
    pub meta: RecordMeta,
}

impl AtonNode {
    pub fn new(aton_uid: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            aton_uid: aton_uid.into().trim().to_string(),
            lat,
            lon,
            tags: BTreeMap::new(),
            meta: RecordMeta::default(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.tag(TAG_NAME)
    }
}

/// Coordinates compare bitwise with `-0.0` folded into `0.0`.
#[derive(Debug, PartialEq)]
pub struct AtonFields<'a> {
    pub lat_bits: u64,
    pub lon_bits: u64,
    pub tags: &'a BTreeMap<String, String>,
}

impl SyncableRecord for AtonNode {
    type Fields<'a> = AtonFields<'a>;

    fn natural_key(&self) -> Option<&str> {
        (!self.aton_uid.trim().is_empty()).then_some(self.aton_uid.as_str())
    }

    fn significant_fields(&self) -> Self::Fields<'_> {
        AtonFields {
            lat_bits: float_bits(self.lat),
            lon_bits: float_bits(self.lon),
            tags: &self.tags,
        }
    }

    fn absorb(&mut self, candidate: &Self) {
        self.lat = candidate.lat;
        self.lon = candidate.lon;
        self.tags = candidate.tags.clone();
    }
}
