//! Provenance-carrying configuration tree.
//!
//! A [`ConfigNode`] is an object, a sequence or a scalar. Containers remember
//! their own dotted path and, for every child, the source label of the backend
//! that contributed it. Sequences additionally remember each element's index
//! inside the sequence its source contributed, so appended elements keep
//! reporting where they came from.

mod merge;

use crate::error::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

/// First element of an incoming sequence that asks for concatenation instead
/// of replacement.
pub const APPEND_SENTINEL: &str = "__append";

/// Shared node returned by the `Index` impls on a miss.
static NULL: ConfigNode = ConfigNode::Scalar(Value::Null);

/// A single lookup segment.
///
/// Objects always use the string form, so `Key::Index(0)` and `Key::from("0")`
/// address the same object entry. Sequences accept an index or a string that
/// parses as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Name(String),
    Index(usize),
}

impl Key {
    /// Split a dotted path into keys; segments in canonical integer form
    /// become indices, so `"007"` stays a name.
    pub fn path(dotted: &str) -> Vec<Key> {
        if dotted.is_empty() {
            return Vec::new();
        }
        dotted.split('.').map(Key::parse).collect()
    }

    fn parse(segment: &str) -> Key {
        if !segment.is_empty()
            && segment.bytes().all(|b| b.is_ascii_digit())
            && let Ok(index) = segment.parse::<usize>()
            && index.to_string() == segment
        {
            return Key::Index(index);
        }
        Key::Name(segment.to_string())
    }

    /// Canonical object-key form.
    pub fn as_name(&self) -> String {
        match self {
            Key::Name(name) => name.clone(),
            Key::Index(index) => index.to_string(),
        }
    }

    /// Sequence position, if this key can address one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(name) => name.parse().ok(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => write!(f, "{}", name),
            Key::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::Name(name.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

/// Join a parent path and a segment with `.`, skipping an absent parent.
pub(crate) fn join_path(parent: Option<&str>, segment: &str) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{}.{}", parent, segment),
        _ => segment.to_string(),
    }
}

/// An object entry together with the label of the source that set it.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    node: ConfigNode,
    source: String,
}

impl Entry {
    pub fn node(&self) -> &ConfigNode {
        &self.node
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A sequence element with its source label and its index within that source.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    node: ConfigNode,
    source: String,
    origin: usize,
}

impl Element {
    pub fn node(&self) -> &ConfigNode {
        &self.node
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Index of this element in the sequence its source contributed.
    pub fn origin(&self) -> usize {
        self.origin
    }
}

/// Mapping node. Keys and source labels live in one map, so they cannot drift.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectNode {
    entries: BTreeMap<String, Entry>,
    path: Option<String>,
}

impl ObjectNode {
    pub fn new(path: Option<String>) -> Self {
        Self {
            entries: BTreeMap::new(),
            path,
        }
    }

    fn from_map(map: Map<String, Value>, path: Option<String>, source: &str) -> Self {
        let mut object = Self::new(path);
        for (key, value) in map {
            object.insert(key, value, source);
        }
        object
    }

    /// Wrap `value` beneath `key`, stamping it with `source`.
    pub fn insert(&mut self, key: impl Into<String>, value: Value, source: &str) {
        let key = key.into();
        let child_path = join_path(self.path.as_deref(), &key);
        let node = ConfigNode::wrap(value, Some(child_path), source);
        self.entries.insert(
            key,
            Entry {
                node,
                source: source.to_string(),
            },
        );
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigNode> {
        self.entries.get(key).map(|entry| &entry.node)
    }

    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigNode)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.node))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn child_path(&self, key: &str) -> String {
        join_path(self.path.as_deref(), key)
    }
}

/// Ordered list node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SequenceNode {
    elements: Vec<Element>,
    path: Option<String>,
}

impl SequenceNode {
    pub fn new(path: Option<String>) -> Self {
        Self {
            elements: Vec::new(),
            path,
        }
    }

    fn from_items(items: Vec<Value>, path: Option<String>, source: &str) -> Self {
        let mut sequence = Self::new(path);
        for item in items {
            sequence.push(item, source);
        }
        sequence
    }

    /// Wrap and append `value`; its origin index is its position on arrival.
    pub fn push(&mut self, value: Value, source: &str) {
        let origin = self.elements.len();
        let child_path = join_path(self.path.as_deref(), &origin.to_string());
        let node = ConfigNode::wrap(value, Some(child_path), source);
        self.elements.push(Element {
            node,
            source: source.to_string(),
            origin,
        });
    }

    pub fn truncate(&mut self, len: usize) {
        self.elements.truncate(len);
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn get(&self, index: usize) -> Option<&ConfigNode> {
        self.elements.get(index).map(|element| &element.node)
    }

    pub fn element(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigNode> {
        self.elements.iter().map(|element| &element.node)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// True when the first element is the append sentinel.
    pub fn is_append(&self) -> bool {
        self.elements
            .first()
            .is_some_and(|element| element.node.as_str() == Some(APPEND_SENTINEL))
    }

    fn child_path(&self, key: &Key) -> String {
        join_path(self.path.as_deref(), &key.to_string())
    }
}

/// A configuration value with provenance.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Object(ObjectNode),
    Sequence(SequenceNode),
    Scalar(Value),
}

impl Default for ConfigNode {
    fn default() -> Self {
        ConfigNode::empty()
    }
}

impl ConfigNode {
    /// An empty root object.
    pub fn empty() -> Self {
        ConfigNode::Object(ObjectNode::new(None))
    }

    /// Wrap raw backend output as a root node labelled with `source`.
    pub fn from_value(value: Value, source: &str) -> Self {
        Self::wrap(value, None, source)
    }

    /// Wrap a backend's key map as a root object labelled with `source`.
    pub fn from_map(map: Map<String, Value>, source: &str) -> Self {
        ConfigNode::Object(ObjectNode::from_map(map, None, source))
    }

    fn wrap(value: Value, path: Option<String>, source: &str) -> Self {
        match value {
            Value::Object(map) => ConfigNode::Object(ObjectNode::from_map(map, path, source)),
            Value::Array(items) => ConfigNode::Sequence(SequenceNode::from_items(items, path, source)),
            scalar => ConfigNode::Scalar(scalar),
        }
    }

    /// Structural path of a container; scalars carry none.
    pub fn path(&self) -> Option<&str> {
        match self {
            ConfigNode::Object(object) => object.path(),
            ConfigNode::Sequence(sequence) => sequence.path(),
            ConfigNode::Scalar(_) => None,
        }
    }

    // Soft lookups

    /// Child at `key`, or `None`.
    pub fn get(&self, key: impl Into<Key>) -> Option<&ConfigNode> {
        let key = key.into();
        match self {
            ConfigNode::Object(object) => object.get(&key.as_name()),
            ConfigNode::Sequence(sequence) => key.as_index().and_then(|i| sequence.get(i)),
            ConfigNode::Scalar(_) => None,
        }
    }

    /// Follow `keys` with soft lookups.
    pub fn dig<I, K>(&self, keys: I) -> Option<&ConfigNode>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        keys.into_iter()
            .try_fold(self, |node, key| node.get(key))
    }

    pub(crate) fn get_mut(&mut self, key: &Key) -> Option<&mut ConfigNode> {
        match self {
            ConfigNode::Object(object) => object
                .entries
                .get_mut(&key.as_name())
                .map(|entry| &mut entry.node),
            ConfigNode::Sequence(sequence) => key
                .as_index()
                .and_then(|i| sequence.elements.get_mut(i))
                .map(|element| &mut element.node),
            ConfigNode::Scalar(_) => None,
        }
    }

    pub(crate) fn dig_mut(&mut self, keys: &[Key]) -> Option<&mut ConfigNode> {
        keys.iter().try_fold(self, |node, key| node.get_mut(key))
    }

    // Strict lookups

    /// Child at `key`, or a `KeyNotFound`/`IndexOutOfRange` naming its path.
    pub fn fetch(&self, key: impl Into<Key>) -> ConfigResult<&ConfigNode> {
        self.fetch_at(&key.into(), None)
    }

    /// Child at `key`, or `default` when it is missing.
    pub fn fetch_or<'a>(&'a self, key: impl Into<Key>, default: &'a ConfigNode) -> &'a ConfigNode {
        self.get(key).unwrap_or(default)
    }

    /// Chain of strict lookups. A failure reports the path up to the failing
    /// segment.
    pub fn dig_strict<I, K>(&self, keys: I) -> ConfigResult<&ConfigNode>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let mut node = self;
        let mut reached = self.path().map(str::to_string);
        for key in keys {
            let key = key.into();
            let child = node.fetch_at(&key, reached.as_deref())?;
            reached = Some(node.child_path(&key, reached.as_deref()));
            node = child;
        }
        Ok(node)
    }

    /// Strict lookup that also rejects blank values.
    pub fn require(&self, key: impl Into<Key>) -> ConfigResult<&ConfigNode> {
        let key = key.into();
        let node = self.fetch_at(&key, None)?;
        if node.is_blank() {
            return Err(ConfigError::key_not_found(self.child_path(&key, None)));
        }
        Ok(node)
    }

    /// True when `key` holds a non-blank value.
    pub fn is_present(&self, key: impl Into<Key>) -> bool {
        self.get(key).is_some_and(|node| !node.is_blank())
    }

    fn fetch_at(&self, key: &Key, reached: Option<&str>) -> ConfigResult<&ConfigNode> {
        match self {
            ConfigNode::Object(object) => {
                let name = key.as_name();
                object
                    .get(&name)
                    .ok_or_else(|| ConfigError::key_not_found(object.child_path(&name)))
            }
            ConfigNode::Sequence(sequence) => match key.as_index() {
                Some(index) => sequence
                    .get(index)
                    .ok_or_else(|| ConfigError::index_out_of_range(sequence.child_path(key))),
                None => Err(ConfigError::key_not_found(sequence.child_path(key))),
            },
            ConfigNode::Scalar(_) => Err(ConfigError::key_not_found(join_path(
                reached,
                &key.to_string(),
            ))),
        }
    }

    fn child_path(&self, key: &Key, reached: Option<&str>) -> String {
        match self {
            ConfigNode::Object(object) => object.child_path(&key.as_name()),
            ConfigNode::Sequence(sequence) => sequence.child_path(key),
            ConfigNode::Scalar(_) => join_path(reached, &key.to_string()),
        }
    }

    // Provenance

    /// `"<label> <dotted path>"` for the value reached through `keys`.
    ///
    /// Sequence elements report the index they had in their own source, so an
    /// appended element names its position in the contributing backend.
    pub fn source<I, K>(&self, keys: I) -> ConfigResult<String>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let Some((last, parents)) = keys.split_last() else {
            return Err(ConfigError::key_not_found(self.path().unwrap_or_default()));
        };
        let owner = self.dig_strict(parents)?;
        match owner {
            ConfigNode::Object(object) => {
                let name = last.as_name();
                let entry = object
                    .entry(&name)
                    .ok_or_else(|| ConfigError::key_not_found(object.child_path(&name)))?;
                Ok(format!("{} {}", entry.source, object.child_path(&name)))
            }
            ConfigNode::Sequence(sequence) => {
                let element = last
                    .as_index()
                    .and_then(|index| sequence.element(index))
                    .ok_or_else(|| ConfigError::index_out_of_range(sequence.child_path(last)))?;
                let origin = join_path(sequence.path(), &element.origin.to_string());
                Ok(format!("{} {}", element.source, origin))
            }
            ConfigNode::Scalar(_) => {
                let reached = if parents.is_empty() {
                    None
                } else {
                    Some(
                        parents
                            .iter()
                            .map(Key::to_string)
                            .collect::<Vec<_>>()
                            .join("."),
                    )
                };
                Err(ConfigError::key_not_found(join_path(
                    reached.as_deref(),
                    &last.to_string(),
                )))
            }
        }
    }

    // Shape and scalar accessors

    pub fn as_object(&self) -> Option<&ObjectNode> {
        match self {
            ConfigNode::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceNode> {
        match self {
            ConfigNode::Sequence(sequence) => Some(sequence),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ConfigNode::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_scalar().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_scalar().and_then(Value::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_scalar().and_then(Value::as_bool)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigNode::Scalar(Value::Null))
    }

    /// Null, `false`, a whitespace-only string or an empty container.
    pub fn is_blank(&self) -> bool {
        match self {
            ConfigNode::Object(object) => object.is_empty(),
            ConfigNode::Sequence(sequence) => sequence.is_empty(),
            ConfigNode::Scalar(Value::Null) | ConfigNode::Scalar(Value::Bool(false)) => true,
            ConfigNode::Scalar(Value::String(s)) => s.trim().is_empty(),
            ConfigNode::Scalar(Value::Array(items)) => items.is_empty(),
            ConfigNode::Scalar(Value::Object(map)) => map.is_empty(),
            ConfigNode::Scalar(_) => false,
        }
    }

    /// Number of children; scalars have none.
    pub fn len(&self) -> usize {
        match self {
            ConfigNode::Object(object) => object.len(),
            ConfigNode::Sequence(sequence) => sequence.len(),
            ConfigNode::Scalar(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Conversions

    /// Plain JSON value without provenance.
    pub fn to_value(&self) -> Value {
        match self {
            ConfigNode::Object(object) => Value::Object(
                object
                    .iter()
                    .map(|(key, node)| (key.to_string(), node.to_value()))
                    .collect(),
            ),
            ConfigNode::Sequence(sequence) => {
                Value::Array(sequence.iter().map(ConfigNode::to_value).collect())
            }
            ConfigNode::Scalar(value) => value.clone(),
        }
    }

    /// Deserialize this sub-tree into a typed structure.
    pub fn deserialize<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        Ok(serde_json::from_value(self.to_value())?)
    }

    /// Drop a leading append sentinel from every sequence in the tree.
    ///
    /// Left over when an append sequence had nothing to extend. Remaining
    /// elements keep their origin indices.
    pub fn strip_append_sentinels(&mut self) {
        match self {
            ConfigNode::Object(object) => {
                for entry in object.entries.values_mut() {
                    entry.node.strip_append_sentinels();
                }
            }
            ConfigNode::Sequence(sequence) => {
                if sequence.is_append() {
                    sequence.elements.remove(0);
                }
                for element in &mut sequence.elements {
                    element.node.strip_append_sentinels();
                }
            }
            ConfigNode::Scalar(_) => {}
        }
    }
}

impl From<Value> for ConfigNode {
    /// Wrap with an empty source label.
    fn from(value: Value) -> Self {
        ConfigNode::from_value(value, "")
    }
}

impl Index<&str> for ConfigNode {
    type Output = ConfigNode;

    fn index(&self, key: &str) -> &ConfigNode {
        self.get(key).unwrap_or(&NULL)
    }
}

impl Index<usize> for ConfigNode {
    type Output = ConfigNode;

    fn index(&self, index: usize) -> &ConfigNode {
        self.get(index).unwrap_or(&NULL)
    }
}

impl fmt::Display for ConfigNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigNode::Scalar(Value::String(s)) => write!(f, "{}", s),
            ConfigNode::Scalar(value) => write!(f, "{}", value),
            container => write!(f, "{}", container.to_value()),
        }
    }
}

impl Serialize for ConfigNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigNode::Object(object) => {
                let mut map = serializer.serialize_map(Some(object.len()))?;
                for (key, node) in object.iter() {
                    map.serialize_entry(key, node)?;
                }
                map.end()
            }
            ConfigNode::Sequence(sequence) => {
                let mut seq = serializer.serialize_seq(Some(sequence.len()))?;
                for node in sequence.iter() {
                    seq.serialize_element(node)?;
                }
                seq.end()
            }
            ConfigNode::Scalar(value) => value.serialize(serializer),
        }
    }
}
