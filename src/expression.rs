//! Deferred expressions embedded in configuration values.
//!
//! A string value of the form `<%= ... %>` is evaluated after all backends
//! have been merged, so it can refer to values contributed by any of them:
//!
//! ```yaml
//! host: example.com
//! base_url: "<%= AppConfig.host %>"
//! token: "<%= ENV['API_TOKEN'] || AppConfig.defaults.token %>"
//! ```
//!
//! Only whole-string expressions are recognised. The body is a list of
//! alternatives separated by `||`; the first one that yields neither null nor
//! `false` wins. An alternative is a reference (`<alias>.a.b.0`), an
//! environment lookup (`ENV["NAME"]`) or a literal (`"text"`, `'text'`, a
//! number, `true`, `false`, `nil`, `null`).

use crate::error::{ConfigError, ConfigResult};
use crate::node::{ConfigNode, Key};
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, warn};

pub const EXPRESSION_OPEN: &str = "<%=";
pub const EXPRESSION_CLOSE: &str = "%>";

static ENV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^ENV\[\s*(?:"([^"]*)"|'([^']*)')\s*\]$"#).expect("valid env regex")
});
static STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(?:"([^"]*)"|'([^']*)')$"#).expect("valid string regex"));
static INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+$").expect("valid integer regex"));
static FLOAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+\.[0-9]+$").expect("valid float regex"));
static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)((?:\.[A-Za-z0-9_-]+)*)$").expect("valid reference regex")
});

/// True when `value` is a whole-string deferred expression.
pub fn is_expression(value: &str) -> bool {
    value.len() >= EXPRESSION_OPEN.len() + EXPRESSION_CLOSE.len()
        && value.starts_with(EXPRESSION_OPEN)
        && value.ends_with(EXPRESSION_CLOSE)
}

/// Evaluate every deferred expression in `tree`, replacing each with its
/// rendered string. References use `alias` as the name of the tree root.
///
/// Nothing is written back unless every expression evaluates.
pub fn resolve_all(tree: &mut ConfigNode, alias: &str) -> ConfigResult<()> {
    let mut locations = Vec::new();
    collect(tree, &mut Vec::new(), &mut locations);
    if locations.is_empty() {
        return Ok(());
    }
    debug!("Resolving {} deferred expression(s)", locations.len());

    let mut evaluator = Evaluator::new(tree, alias);
    let rendered = locations
        .into_iter()
        .map(|keys| {
            let value = evaluator.resolve(&keys)?;
            Ok((keys, value))
        })
        .collect::<ConfigResult<Vec<_>>>()?;

    for (keys, value) in rendered {
        if let Some(slot) = tree.dig_mut(&keys) {
            *slot = ConfigNode::Scalar(Value::String(value));
        }
    }
    Ok(())
}

/// Key chains of every expression scalar, depth first.
fn collect(node: &ConfigNode, prefix: &mut Vec<Key>, out: &mut Vec<Vec<Key>>) {
    match node {
        ConfigNode::Object(object) => {
            for (key, child) in object.iter() {
                prefix.push(Key::Name(key.to_string()));
                collect(child, prefix, out);
                prefix.pop();
            }
        }
        ConfigNode::Sequence(sequence) => {
            for (index, child) in sequence.iter().enumerate() {
                prefix.push(Key::Index(index));
                collect(child, prefix, out);
                prefix.pop();
            }
        }
        ConfigNode::Scalar(Value::String(s)) if is_expression(s) => out.push(prefix.clone()),
        ConfigNode::Scalar(_) => {}
    }
}

fn dotted(keys: &[Key]) -> String {
    keys.iter().map(Key::as_name).collect::<Vec<_>>().join(".")
}

/// Follow `keys` through `tree`, rewriting each one into the form its parent
/// uses: names for object entries, indices for sequence elements.
fn structural<'t>(tree: &'t ConfigNode, keys: &[Key]) -> Option<(&'t ConfigNode, Vec<Key>)> {
    let mut node = tree;
    let mut chain = Vec::with_capacity(keys.len());
    for key in keys {
        let step = match node {
            ConfigNode::Object(_) => Key::Name(key.as_name()),
            ConfigNode::Sequence(_) => Key::Index(key.as_index()?),
            ConfigNode::Scalar(_) => return None,
        };
        node = node.get(&step)?;
        chain.push(step);
    }
    Some((node, chain))
}

/// One alternative of an expression body.
#[derive(Debug, Clone, PartialEq)]
enum Term {
    Reference(Vec<Key>),
    Env(String),
    Literal(Value),
}

struct Evaluator<'a> {
    tree: &'a ConfigNode,
    alias: &'a str,
    resolved: HashMap<Vec<Key>, String>,
    in_progress: HashSet<Vec<Key>>,
}

impl<'a> Evaluator<'a> {
    fn new(tree: &'a ConfigNode, alias: &'a str) -> Self {
        Self {
            tree,
            alias,
            resolved: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Rendered value of the expression stored at `keys`.
    ///
    /// `keys` must be structural (see [`structural`]) so that one location
    /// always maps to one memo entry.
    fn resolve(&mut self, keys: &[Key]) -> ConfigResult<String> {
        if let Some(done) = self.resolved.get(keys) {
            return Ok(done.clone());
        }

        let path = dotted(keys);
        let expression = match self.tree.dig(keys).and_then(ConfigNode::as_str) {
            Some(s) => s.to_string(),
            None => return Ok(String::new()),
        };
        if !self.in_progress.insert(keys.to_vec()) {
            return Err(ConfigError::Expression {
                path,
                expression,
                message: "reference cycle".to_string(),
            });
        }

        let result = self.evaluate(&path, &expression);
        self.in_progress.remove(keys);
        let rendered = render(&result?);
        self.resolved.insert(keys.to_vec(), rendered.clone());
        Ok(rendered)
    }

    fn evaluate(&mut self, path: &str, expression: &str) -> ConfigResult<Value> {
        let body = expression[EXPRESSION_OPEN.len()..expression.len() - EXPRESSION_CLOSE.len()].trim();
        let fail = |message: String| ConfigError::Expression {
            path: path.to_string(),
            expression: expression.to_string(),
            message,
        };

        let terms = split_alternatives(body)
            .into_iter()
            .map(|alternative| self.parse_term(alternative).map_err(&fail))
            .collect::<ConfigResult<Vec<_>>>()?;

        for term in terms {
            let value = match term {
                Term::Literal(value) => value,
                Term::Env(name) => std::env::var(&name).map(Value::String).unwrap_or(Value::Null),
                Term::Reference(keys) => self.reference(path, &keys)?,
            };
            if !matches!(value, Value::Null | Value::Bool(false)) {
                return Ok(value);
            }
        }
        Ok(Value::Null)
    }

    fn parse_term(&self, alternative: &str) -> Result<Term, String> {
        let term = alternative.trim();
        if term.is_empty() {
            return Err("empty alternative".to_string());
        }
        if let Some(caps) = ENV_RE.captures(term) {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            return Ok(Term::Env(name.to_string()));
        }
        if let Some(caps) = STRING_RE.captures(term) {
            let text = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            return Ok(Term::Literal(Value::String(text.to_string())));
        }
        if INTEGER_RE.is_match(term) {
            if let Ok(n) = term.parse::<i64>() {
                return Ok(Term::Literal(Value::from(n)));
            }
        }
        if FLOAT_RE.is_match(term) {
            if let Ok(n) = term.parse::<f64>() {
                return Ok(Term::Literal(Value::from(n)));
            }
        }
        match term {
            "true" => return Ok(Term::Literal(Value::Bool(true))),
            "false" => return Ok(Term::Literal(Value::Bool(false))),
            "nil" | "null" => return Ok(Term::Literal(Value::Null)),
            _ => {}
        }
        if let Some(caps) = REFERENCE_RE.captures(term)
            && caps.get(1).map(|m| m.as_str()) == Some(self.alias)
        {
            let rest = caps.get(2).map_or("", |m| m.as_str());
            let keys = rest.strip_prefix('.').map(Key::path).unwrap_or_default();
            return Ok(Term::Reference(keys));
        }
        Err(format!("cannot evaluate '{}'", term))
    }

    fn reference(&mut self, from: &str, keys: &[Key]) -> ConfigResult<Value> {
        match structural(self.tree, keys) {
            Some((node, mut chain)) => self.materialize(node, &mut chain),
            None => {
                warn!(
                    "Expression at '{}' refers to missing key '{}.{}'",
                    from,
                    self.alias,
                    dotted(keys)
                );
                Ok(Value::Null)
            }
        }
    }

    /// Plain value of `node`, with nested expressions resolved.
    fn materialize(&mut self, node: &ConfigNode, keys: &mut Vec<Key>) -> ConfigResult<Value> {
        match node {
            ConfigNode::Object(object) => {
                let mut map = Map::new();
                for (key, child) in object.iter() {
                    keys.push(Key::Name(key.to_string()));
                    let value = self.materialize(child, keys);
                    keys.pop();
                    map.insert(key.to_string(), value?);
                }
                Ok(Value::Object(map))
            }
            ConfigNode::Sequence(sequence) => {
                let mut items = Vec::with_capacity(sequence.len());
                for (index, child) in sequence.iter().enumerate() {
                    keys.push(Key::Index(index));
                    let value = self.materialize(child, keys);
                    keys.pop();
                    items.push(value?);
                }
                Ok(Value::Array(items))
            }
            ConfigNode::Scalar(Value::String(s)) if is_expression(s) => {
                self.resolve(keys).map(Value::String)
            }
            ConfigNode::Scalar(value) => Ok(value.clone()),
        }
    }
}

/// Split on `||` outside quoted literals.
fn split_alternatives(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '|') if matches!(chars.peek(), Some((_, '|'))) => {
                parts.push(&body[start..i]);
                chars.next();
                start = i + 2;
            }
            (None, _) => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Display form of an evaluated expression.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
