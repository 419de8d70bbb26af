//! Deep merge for provenance-carrying trees.
//!
//! Objects merge key by key with the incoming side winning. Sequences are
//! replaced entirely unless the incoming sequence starts with the append
//! sentinel, in which case its remaining elements are concatenated.

use super::{ConfigNode, Entry, ObjectNode, SequenceNode};
use tracing::debug;

impl ConfigNode {
    /// Merge `other` over a copy of `self`, leaving both inputs untouched.
    ///
    /// # Example
    /// ```
    /// use serde_json::json;
    /// use layered_config::ConfigNode;
    ///
    /// let base = ConfigNode::from_value(json!({"server": {"port": 8080, "host": "localhost"}}), "app");
    /// let overlay = ConfigNode::from_value(json!({"server": {"port": 9000}}), "local");
    /// let merged = base.deep_merge(&overlay);
    /// assert_eq!(merged.to_value(), json!({"server": {"port": 9000, "host": "localhost"}}));
    /// assert_eq!(merged.source(["server", "host"]).unwrap(), "app server.host");
    /// assert_eq!(merged.source(["server", "port"]).unwrap(), "local server.port");
    /// ```
    pub fn deep_merge(&self, other: &ConfigNode) -> ConfigNode {
        let mut merged = self.clone();
        merged.deep_merge_in_place(other.clone());
        merged
    }

    /// Merge `other` into `self`.
    pub fn deep_merge_in_place(&mut self, other: ConfigNode) {
        match (self, other) {
            (ConfigNode::Object(base), ConfigNode::Object(overlay)) => base.merge(overlay),
            (ConfigNode::Sequence(base), ConfigNode::Sequence(overlay)) => {
                base.assign(overlay);
            }
            (current, overlay) => {
                log_shape_change(current.path(), current, &overlay);
                *current = overlay;
            }
        }
    }
}

impl ObjectNode {
    /// Merge every entry of `overlay` into this object.
    pub fn merge(&mut self, overlay: ObjectNode) {
        for (key, incoming) in overlay.entries {
            match self.entries.get_mut(&key) {
                Some(existing) => existing.absorb(incoming),
                None => {
                    self.entries.insert(key, incoming);
                }
            }
        }
    }
}

impl SequenceNode {
    /// Append or replace with `overlay`, returning true when it appended.
    ///
    /// The sequence keeps its own path either way.
    pub fn assign(&mut self, overlay: SequenceNode) -> bool {
        if overlay.is_append() {
            self.elements.extend(overlay.elements.into_iter().skip(1));
            true
        } else {
            self.elements = overlay.elements;
            false
        }
    }
}

impl Entry {
    fn absorb(&mut self, incoming: Entry) {
        match (&mut self.node, incoming.node) {
            // Recursion keeps this entry's label; descendants keep theirs.
            (ConfigNode::Object(base), ConfigNode::Object(overlay)) => base.merge(overlay),
            (ConfigNode::Sequence(base), ConfigNode::Sequence(overlay)) => {
                if !base.assign(overlay) {
                    self.source = incoming.source;
                }
            }
            (current, node) => {
                log_shape_change(current.path(), current, &node);
                *current = node;
                self.source = incoming.source;
            }
        }
    }
}

fn shape(node: &ConfigNode) -> &'static str {
    match node {
        ConfigNode::Object(_) => "object",
        ConfigNode::Sequence(_) => "sequence",
        ConfigNode::Scalar(_) => "scalar",
    }
}

/// Replacing a container with a different shape is allowed; leave a trace.
fn log_shape_change(path: Option<&str>, current: &ConfigNode, incoming: &ConfigNode) {
    let (from, to) = (shape(current), shape(incoming));
    if from != to && (from != "scalar" || to != "scalar") {
        debug!(
            path = path.unwrap_or("<root>"),
            from, to, "overriding configuration value with a different shape"
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::node::{ConfigNode, Key};
    use serde_json::json;

    fn node(value: serde_json::Value, source: &str) -> ConfigNode {
        ConfigNode::from_value(value, source)
    }

    #[test]
    fn test_merge_simple_objects() {
        let base = node(json!({"a": 1, "b": 2}), "one");
        let overlay = node(json!({"b": 3, "c": 4}), "two");
        let result = base.deep_merge(&overlay);
        assert_eq!(result.to_value(), json!({"a": 1, "b": 3, "c": 4}));
        assert_eq!(result.source(["a"]).unwrap(), "one a");
        assert_eq!(result.source(["b"]).unwrap(), "two b");
        assert_eq!(result.source(["c"]).unwrap(), "two c");
    }

    #[test]
    fn test_merge_is_non_destructive() {
        let base = node(json!({"a": 1}), "one");
        let overlay = node(json!({"a": 2}), "two");
        let _ = base.deep_merge(&overlay);
        assert_eq!(base.to_value(), json!({"a": 1}));
        assert_eq!(overlay.to_value(), json!({"a": 2}));
    }

    #[test]
    fn test_nested_merge_keeps_unclobbered_provenance() {
        let a = node(json!({"a": 1, "c": {"d": 1, "e": 2}}), "env1");
        let b = node(json!({"a": 1, "c": {"d": 2, "f": 3}, "g": 3}), "env2");
        let merged = a.deep_merge(&b);

        assert_eq!(merged["c"].to_value(), json!({"d": 2, "e": 2, "f": 3}));
        assert_eq!(merged.source(["a"]).unwrap(), "env2 a");
        assert_eq!(merged.source(["g"]).unwrap(), "env2 g");
        assert_eq!(merged.source(["c"]).unwrap(), "env1 c");
        assert_eq!(merged.source(["c", "d"]).unwrap(), "env2 c.d");
        assert_eq!(merged.source(["c", "e"]).unwrap(), "env1 c.e");
        assert_eq!(merged.source(["c", "f"]).unwrap(), "env2 c.f");
    }

    #[test]
    fn test_arrays_replaced_without_sentinel() {
        let base = node(json!({"items": [1, 2, 3]}), "env1");
        let overlay = node(json!({"items": [4, 5]}), "env2");
        let result = base.deep_merge(&overlay);
        assert_eq!(result.to_value(), json!({"items": [4, 5]}));
        assert_eq!(result.source(["items"]).unwrap(), "env2 items");
        assert_eq!(result.source(Key::path("items.0")).unwrap(), "env2 items.0");
        assert_eq!(result.source(Key::path("items.1")).unwrap(), "env2 items.1");
    }

    #[test]
    fn test_append_sentinel_concatenates() {
        let base = node(json!({"k": [1, 2, 3], "j": [{"a": 1}, {"b": 2}]}), "env1");
        let overlay = node(
            json!({"k": ["__append", 4, 5], "j": ["__append", {"x": 1}, {"y": 2}]}),
            "env2",
        );
        let merged = base.deep_merge(&overlay);

        assert_eq!(merged["k"].to_value(), json!([1, 2, 3, 4, 5]));
        assert_eq!(merged.source(["k"]).unwrap(), "env1 k");
        assert_eq!(merged.source(Key::path("k.2")).unwrap(), "env1 k.2");
        assert_eq!(merged.source(Key::path("k.3")).unwrap(), "env2 k.1");
        assert_eq!(merged.source(Key::path("k.4")).unwrap(), "env2 k.2");
        assert_eq!(merged.source(Key::path("j.0.a")).unwrap(), "env1 j.0.a");
        assert_eq!(merged.source(Key::path("j.3.y")).unwrap(), "env2 j.2.y");
    }

    #[test]
    fn test_top_level_sequences() {
        let mut base = node(json!(["a", "b", "c"]), "env1");
        base.deep_merge_in_place(node(json!(["__append", "e", "f"]), "env2"));
        assert_eq!(base.to_value(), json!(["a", "b", "c", "e", "f"]));
        assert_eq!(base.source([3usize]).unwrap(), "env2 1");

        let mut base = node(json!(["a", "b", "c"]), "env1");
        base.deep_merge_in_place(node(json!(["e", "f"]), "env2"));
        assert_eq!(base.source([0usize]).unwrap(), "env2 0");
        assert_eq!(base.source([1usize]).unwrap(), "env2 1");
        assert!(base.source([2usize]).is_err());
    }

    #[test]
    fn test_shape_mismatch_last_writer_wins() {
        let base = node(json!({"value": 42, "list": [1], "obj": {"x": 1}}), "one");
        let overlay = node(
            json!({"value": {"nested": true}, "list": {"x": 1}, "obj": [1, 2]}),
            "two",
        );
        let result = base.deep_merge(&overlay);
        assert_eq!(
            result.to_value(),
            json!({"value": {"nested": true}, "list": {"x": 1}, "obj": [1, 2]})
        );
        assert_eq!(result.source(["obj"]).unwrap(), "two obj");

        let back = result.deep_merge(&node(json!({"value": "flat"}), "three"));
        assert_eq!(back["value"].as_str(), Some("flat"));
        assert_eq!(back.source(["value"]).unwrap(), "three value");
    }

    #[test]
    fn test_null_overrides() {
        let base = node(json!({"a": 1}), "one");
        let overlay = node(json!({"a": null}), "two");
        let result = base.deep_merge(&overlay);
        assert!(result["a"].is_null());
        assert_eq!(result.source(["a"]).unwrap(), "two a");
    }

    #[test]
    fn test_merge_is_associative() {
        let a = node(json!({"k": [1], "c": {"d": 1}, "s": "a"}), "a");
        let b = node(json!({"k": ["__append", 2], "c": {"e": 2}, "s": {"x": 1}}), "b");
        let c = node(json!({"k": ["__append", 3], "c": {"d": 3}, "s": "c"}), "c");

        let left = a.deep_merge(&b).deep_merge(&c);
        let right = a.deep_merge(&b.deep_merge(&c));
        assert_eq!(left, right);
        assert_eq!(left["k"].to_value(), json!([1, 2, 3]));
    }
}
