//! Tree node model shared by area and category hierarchies.
//!
//! # Responsibility
//! - Define `NodeKey`, the opaque identity of a tree node.
//! - Define `TreeNode` with parent/children references addressed by key.
//!
//! # Invariants
//! - `NodeKey` is non-empty and never contains `/`.
//! - `lineage` and `children` are derived; callers never set them directly.
//! - At most one description per language (enforced by the map shape).

use crate::model::record::{float_bits, RecordMeta, SyncableRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static NODE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]*$").expect("valid node key regex"));

const MAX_NODE_KEY_CHARS: usize = 64;

/// Rejected node key input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidNodeKey(pub String);

impl Display for InvalidNodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid node key `{}`: expected 1-{MAX_NODE_KEY_CHARS} chars of [A-Za-z0-9._:-]",
            self.0
        )
    }
}

impl Error for InvalidNodeKey {}

/// Opaque, immutable identity of a tree node.
///
/// Keys are embedded verbatim in lineage paths, so the separator character is
/// excluded by construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeKey(String);

impl NodeKey {
    /// Parses and validates a caller-supplied key.
    pub fn parse(value: &str) -> Result<Self, InvalidNodeKey> {
        let trimmed = value.trim();
        if trimmed.chars().count() > MAX_NODE_KEY_CHARS || !NODE_KEY_RE.is_match(trimmed) {
            return Err(InvalidNodeKey(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Generates a fresh key for nodes inserted without one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeKey {
    type Error = InvalidNodeKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeKey> for String {
    fn from(value: NodeKey) -> Self {
        value.0
    }
}

impl AsRef<str> for NodeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which hierarchy a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// Geographic areas (message areas, transmitter coverage).
    Area,
    /// Message categories.
    Category,
}

impl TreeKind {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Category => "category",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "area" | "areas" => Some(Self::Area),
            "category" | "categories" => Some(Self::Category),
            _ => None,
        }
    }
}

/// Localized description payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDesc {
    pub name: String,
}

impl NodeDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Tree-structured entity (area or category).
///
/// The parent is a non-owning reference resolved by key lookup; the ordered
/// child list is maintained by the owning arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TreeNodeInput")]
pub struct TreeNode {
    /// `None` until the node has been assigned an identity.
    pub key: Option<NodeKey>,
    /// Maritime resource name, when the node has one.
    pub mrn: Option<String>,
    pub parent: Option<NodeKey>,
    pub active: bool,
    /// Set on a parsed node that carried no `active` flag. The owning
    /// service replaces `active` with the parent's flag before comparing.
    #[serde(skip)]
    pub(crate) inherit_active: bool,
    /// Position among siblings; ties are broken by key.
    pub sort_order: f64,
    /// Language code -> description.
    pub descs: BTreeMap<String, NodeDesc>,
    pub(crate) lineage: String,
    #[serde(skip)]
    pub(crate) children: Vec<NodeKey>,
    #[serde(skip)]
    pub meta: RecordMeta,
}

/// Wire shape of a tree node. Lineage is derived and never read from input.
#[derive(Deserialize)]
struct TreeNodeInput {
    #[serde(default)]
    key: Option<NodeKey>,
    #[serde(default)]
    mrn: Option<String>,
    #[serde(default)]
    parent: Option<NodeKey>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    sort_order: f64,
    #[serde(default, deserialize_with = "deserialize_descs")]
    descs: BTreeMap<String, NodeDesc>,
}

impl From<TreeNodeInput> for TreeNode {
    fn from(value: TreeNodeInput) -> Self {
        let mut node = Self::blank(value.key);
        node.mrn = value.mrn;
        node.parent = value.parent;
        node.active = value.active.unwrap_or(true);
        node.inherit_active = value.active.is_none();
        node.sort_order = value.sort_order;
        node.descs = value.descs;
        node
    }
}

impl TreeNode {
    /// Creates an active root node with the given key.
    pub fn new(key: NodeKey) -> Self {
        Self::blank(Some(key))
    }

    /// Creates a node that has not been assigned an identity yet.
    pub fn unkeyed() -> Self {
        Self::blank(None)
    }

    fn blank(key: Option<NodeKey>) -> Self {
        Self {
            key,
            mrn: None,
            parent: None,
            active: true,
            inherit_active: false,
            sort_order: 0.0,
            descs: BTreeMap::new(),
            lineage: String::new(),
            children: Vec::new(),
            meta: RecordMeta::default(),
        }
    }

    pub fn with_parent(mut self, parent: NodeKey) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_desc(mut self, lang: &str, name: impl Into<String>) -> Self {
        self.set_desc(lang, name);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self.inherit_active = false;
        self
    }

    /// Materialized path, e.g. `/root/child/`. Empty until encoded.
    pub fn lineage(&self) -> &str {
        &self.lineage
    }

    /// Child keys ordered by `sort_order`, then key.
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn desc(&self, lang: &str) -> Option<&NodeDesc> {
        self.descs.get(&normalize_lang(lang))
    }

    /// Sets the description for one language, replacing any existing one.
    pub fn set_desc(&mut self, lang: &str, name: impl Into<String>) {
        self.descs.insert(normalize_lang(lang), NodeDesc::new(name));
    }

    pub fn remove_desc(&mut self, lang: &str) -> bool {
        self.descs.remove(&normalize_lang(lang)).is_some()
    }
}

pub(crate) fn normalize_lang(lang: &str) -> String {
    lang.trim().to_ascii_lowercase()
}

fn deserialize_descs<'de, D>(deserializer: D) -> Result<BTreeMap<String, NodeDesc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, NodeDesc>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(lang, desc)| (normalize_lang(&lang), desc))
        .collect())
}

/// Significant fields of a tree node.
///
/// Sort order is compared bitwise so that a NaN never reads as "changed"
/// on every pass. `-0.0` and `0.0` compare equal.
#[derive(Debug, PartialEq)]
pub struct TreeNodeFields<'a> {
    pub mrn: Option<&'a str>,
    pub active: bool,
    pub parent: Option<&'a NodeKey>,
    pub sort_order_bits: u64,
    pub descs: &'a BTreeMap<String, NodeDesc>,
}

impl SyncableRecord for TreeNode {
    type Fields<'a> = TreeNodeFields<'a>;

    fn natural_key(&self) -> Option<&str> {
        self.key.as_ref().map(NodeKey::as_str)
    }

    fn significant_fields(&self) -> Self::Fields<'_> {
        TreeNodeFields {
            mrn: self.mrn.as_deref(),
            active: self.active,
            parent: self.parent.as_ref(),
            sort_order_bits: float_bits(self.sort_order),
            descs: &self.descs,
        }
    }

    fn absorb(&mut self, candidate: &Self) {
        self.mrn = candidate.mrn.clone();
        self.parent = candidate.parent.clone();
        self.active = candidate.active;
        self.sort_order = candidate.sort_order;
        self.descs = candidate.descs.clone();
    }
}

/// Insertion request for a tree node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNode {
    /// Generated when `None`.
    pub key: Option<NodeKey>,
    pub parent: Option<NodeKey>,
    pub mrn: Option<String>,
    /// `None` inherits: active unless the parent is inactive.
    pub active: Option<bool>,
    pub sort_order: f64,
    pub descs: BTreeMap<String, NodeDesc>,
}

impl NewNode {
    pub fn keyed(key: NodeKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn under(mut self, parent: NodeKey) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_desc(mut self, lang: &str, name: impl Into<String>) -> Self {
        self.descs.insert(normalize_lang(lang), NodeDesc::new(name));
        self
    }
}

impl From<TreeNode> for NewNode {
    fn from(value: TreeNode) -> Self {
        Self {
            key: value.key,
            parent: value.parent,
            mrn: value.mrn,
            active: (!value.inherit_active).then_some(value.active),
            sort_order: value.sort_order,
            descs: value.descs,
        }
    }
}
