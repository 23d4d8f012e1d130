use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PathError;

/// A parsed dotted reference into the execution context.
///
/// `$` addresses the whole context; `$.a.b` addresses the `b` field of the
/// `a` object. Segments are plain identifiers, there is no bracket or index
/// syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
  segments: Vec<String>,
}

impl Path {
  /// The root path `$`.
  pub fn root() -> Self {
    Self { segments: vec![] }
  }

  /// Parse a path of the form `$` or `$.a.b`.
  pub fn parse(raw: &str) -> Result<Self, PathError> {
    if raw.is_empty() {
      return Err(PathError::Empty);
    }
    if raw == "$" {
      return Ok(Self::root());
    }
    let rest = raw
      .strip_prefix("$.")
      .ok_or_else(|| PathError::MissingRoot(raw.to_string()))?;

    let mut segments = Vec::new();
    for segment in rest.split('.') {
      if segment.is_empty() {
        return Err(PathError::EmptySegment(raw.to_string()));
      }
      segments.push(segment.to_string());
    }
    Ok(Self { segments })
  }

  /// Whether this path addresses the whole context.
  pub fn is_root(&self) -> bool {
    self.segments.is_empty()
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  /// Look up the value this path addresses, if present.
  pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
    let mut current = value;
    for segment in &self.segments {
      current = current.as_object()?.get(segment)?;
    }
    Some(current)
  }
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "$")?;
    for segment in &self.segments {
      write!(f, ".{}", segment)?;
    }
    Ok(())
  }
}

impl FromStr for Path {
  type Err = PathError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<String> for Path {
  type Error = PathError;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    Self::parse(&s)
  }
}

impl From<Path> for String {
  fn from(path: Path) -> Self {
    path.to_string()
  }
}

/// Merge `update` into `value` at `path`, returning the new value.
///
/// At the root path the update replaces the value entirely. At a sub-path,
/// missing or non-object intermediates are replaced by fresh objects and the
/// update is written at the leaf, replacing whatever was there.
pub fn merge(value: Value, path: &Path, update: Value) -> Value {
  if path.is_root() {
    return update;
  }

  let mut root = match value {
    Value::Object(map) => Value::Object(map),
    _ => Value::Object(serde_json::Map::new()),
  };

  let mut current = &mut root;
  let (leaf, intermediate) = path.segments().split_last().expect("non-root path");
  for segment in intermediate {
    let map = current.as_object_mut().expect("object intermediate");
    let entry = map
      .entry(segment.clone())
      .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if !entry.is_object() {
      *entry = Value::Object(serde_json::Map::new());
    }
    current = map.get_mut(segment).expect("just inserted");
  }
  current
    .as_object_mut()
    .expect("object intermediate")
    .insert(leaf.clone(), update);

  root
}
