//! State trees and their flattening into topic/value publications.
//!
//! Entities describe their current state as a nested [`StateTree`]. Before it
//! reaches the broker, the tree is flattened so that every scalar leaf becomes
//! one retained message whose topic is the slash-joined path to that leaf.

pub mod mqtt;
pub mod publisher;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone};

pub use publisher::{LogSink, MemorySink, PublishReport, StatePublisher, StateSink};

/// Keys starting with this prefix are internal and never published.
pub const RESERVED_PREFIX: char = '$';

/// Nested state: key to scalar, sequence, or subtree.
pub type StateTree = BTreeMap<String, StateValue>;

/// A single node of a [`StateTree`].
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<StateValue>),
    Tree(StateTree),
}

impl StateValue {
    /// RFC 3339 timestamp leaf.
    pub fn timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        StateValue::Text(at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(v) => write!(f, "{v}"),
            StateValue::Int(v) => write!(f, "{v}"),
            StateValue::Float(v) => write!(f, "{v}"),
            StateValue::Text(v) => f.write_str(v),
            StateValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            StateValue::Tree(tree) => write!(f, "{{{} keys}}", tree.len()),
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Text(v)
    }
}

impl From<StateTree> for StateValue {
    fn from(v: StateTree) -> Self {
        StateValue::Tree(v)
    }
}

impl<T: Into<StateValue>> From<Vec<T>> for StateValue {
    fn from(v: Vec<T>) -> Self {
        StateValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// One retained message produced by flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl Publication {
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }
}

/// Flattens `tree` into retained publications rooted at `root`.
///
/// Subtrees extend the path with their key, sequences with each element's
/// index, and every scalar becomes `root/path = value`. Keys starting with
/// [`RESERVED_PREFIX`] are skipped together with everything below them.
///
/// # Examples
///
/// ```
/// use prosumer_sim::telemetry::{StateTree, StateValue, flatten};
///
/// let mut inner = StateTree::new();
/// inner.insert("b".into(), StateValue::Int(1));
/// let mut tree = StateTree::new();
/// tree.insert("a".into(), StateValue::Tree(inner));
/// tree.insert("c".into(), vec![10_i64, 20].into());
///
/// let topics: Vec<String> = flatten("x", &tree)
///     .into_iter()
///     .map(|p| format!("{}={}", p.topic, p.payload))
///     .collect();
/// assert_eq!(topics, ["x/a/b=1", "x/c/0=10", "x/c/1=20"]);
/// ```
pub fn flatten(root: &str, tree: &StateTree) -> Vec<Publication> {
    let mut out = Vec::new();
    flatten_tree(root, tree, None, &mut out);
    out
}

fn join(parent: Option<&str>, key: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}/{key}"),
        None => key.to_string(),
    }
}

fn flatten_tree(root: &str, tree: &StateTree, parent: Option<&str>, out: &mut Vec<Publication>) {
    for (key, value) in tree {
        if key.starts_with(RESERVED_PREFIX) {
            continue;
        }
        flatten_value(root, value, join(parent, key), out);
    }
}

fn flatten_value(root: &str, value: &StateValue, path: String, out: &mut Vec<Publication>) {
    match value {
        StateValue::Tree(subtree) => flatten_tree(root, subtree, Some(&path), out),
        StateValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_value(root, item, join(Some(&path), &index.to_string()), out);
            }
        }
        scalar => {
            let topic = if root.is_empty() {
                path
            } else {
                format!("{root}/{path}")
            };
            out.push(Publication::retained(topic, scalar.to_string()));
        }
    }
}
