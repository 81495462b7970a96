//! Input values with deferred output references.
//!
//! Resource inputs are trees of literals in which any string may reference
//! another resource's output with the `${resource.attribute}` syntax. A
//! reference is captured at declaration time and stays unresolved until the
//! executor has the source resource's outputs in hand. A string that mixes
//! literal text with references becomes an interpolation and resolves to a
//! concatenated string; a string that is exactly one reference keeps the
//! referenced output's type.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A reference to another resource's output attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// Logical name of the referenced resource.
    pub resource: String,
    /// Attribute path within that resource's outputs (dot-separated).
    pub attribute: String,
}

/// One segment of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    /// Literal text.
    Literal(String),
    /// A deferred output reference.
    Ref(OutputRef),
}

/// An input value: a literal, a deferred reference, or a composite of both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A plain scalar (null, bool, number, or string without references).
    Literal(serde_json::Value),
    /// A whole-string reference; resolves to the referenced output's value.
    Ref(OutputRef),
    /// A string mixing literal text and references; resolves to a string.
    Interpolation(Vec<Segment>),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A string-keyed map of values (ordered for deterministic encoding).
    Map(BTreeMap<String, Value>),
}

impl OutputRef {
    /// Creates a new output reference.
    #[must_use]
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// Renders the reference back to its `${resource.attribute}` form.
    #[must_use]
    pub fn expression(&self) -> String {
        format!("${{{}.{}}}", self.resource, self.attribute)
    }
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

impl Value {
    /// Parses a JSON value into a [`Value`], detecting embedded references.
    ///
    /// # Errors
    ///
    /// Returns the malformed expression if a string contains an unterminated
    /// or empty `${...}` reference.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, String> {
        match json {
            serde_json::Value::String(s) => Self::from_string(s),
            serde_json::Value::Array(items) => {
                let values = items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::List(values))
            }
            serde_json::Value::Object(fields) => {
                let mut map = BTreeMap::new();
                for (key, value) in fields {
                    map.insert(key.clone(), Self::from_json(value)?);
                }
                Ok(Self::Map(map))
            }
            scalar => Ok(Self::Literal(scalar.clone())),
        }
    }

    /// Parses a string, splitting out any `${resource.attribute}` references.
    fn from_string(s: &str) -> Result<Self, String> {
        if !s.contains("${") {
            return Ok(Self::Literal(serde_json::Value::String(s.to_string())));
        }

        let mut segments = Vec::new();
        let mut rest = s;
        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(s.to_string());
            };
            segments.push(Segment::Ref(Self::parse_ref(&after[..end], s)?));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        // A lone reference keeps the referenced output's type.
        if let [Segment::Ref(r)] = segments.as_slice() {
            return Ok(Self::Ref(r.clone()));
        }
        Ok(Self::Interpolation(segments))
    }

    /// Parses the `resource.attribute` body of a reference expression.
    fn parse_ref(body: &str, original: &str) -> Result<OutputRef, String> {
        let Some((resource, attribute)) = body.split_once('.') else {
            return Err(original.to_string());
        };
        if resource.is_empty()
            || attribute.is_empty()
            || !resource
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(original.to_string());
        }
        Ok(OutputRef::new(resource, attribute))
    }

    /// Collects every output reference embedded in this value.
    #[must_use]
    pub fn references(&self) -> Vec<OutputRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<OutputRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(r) => refs.push(r.clone()),
            Self::Interpolation(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        refs.push(r.clone());
                    }
                }
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Self::Map(fields) => {
                for value in fields.values() {
                    value.collect_references(refs);
                }
            }
        }
    }

    /// Renders the value in its canonical unresolved JSON form.
    ///
    /// References are encoded back to `${resource.attribute}` strings; map
    /// keys come out sorted. This encoding is what gets hashed and compared
    /// between runs.
    #[must_use]
    pub fn canonical_json(&self) -> serde_json::Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Ref(r) => serde_json::Value::String(r.expression()),
            Self::Interpolation(segments) => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(s) => rendered.push_str(s),
                        Segment::Ref(r) => rendered.push_str(&r.expression()),
                    }
                }
                serde_json::Value::String(rendered)
            }
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::canonical_json).collect())
            }
            Self::Map(fields) => {
                let mut object = serde_json::Map::new();
                for (key, value) in fields {
                    object.insert(key.clone(), value.canonical_json());
                }
                serde_json::Value::Object(object)
            }
        }
    }

    /// Resolves all embedded references against produced outputs.
    ///
    /// # Errors
    ///
    /// Returns the first reference whose source has not produced the
    /// requested attribute yet.
    pub fn resolve(
        &self,
        outputs: &HashMap<String, serde_json::Map<String, serde_json::Value>>,
    ) -> Result<serde_json::Value, OutputRef> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Ref(r) => lookup(outputs, r).ok_or_else(|| r.clone()),
            Self::Interpolation(segments) => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(s) => rendered.push_str(s),
                        Segment::Ref(r) => {
                            let value = lookup(outputs, r).ok_or_else(|| r.clone())?;
                            match value {
                                serde_json::Value::String(s) => rendered.push_str(&s),
                                other => rendered.push_str(&other.to_string()),
                            }
                        }
                    }
                }
                Ok(serde_json::Value::String(rendered))
            }
            Self::List(items) => {
                let resolved = items
                    .iter()
                    .map(|item| item.resolve(outputs))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(serde_json::Value::Array(resolved))
            }
            Self::Map(fields) => {
                let mut object = serde_json::Map::new();
                for (key, value) in fields {
                    object.insert(key.clone(), value.resolve(outputs)?);
                }
                Ok(serde_json::Value::Object(object))
            }
        }
    }
}

/// Looks up an attribute path in a resource's produced outputs.
fn lookup(
    outputs: &HashMap<String, serde_json::Map<String, serde_json::Value>>,
    reference: &OutputRef,
) -> Option<serde_json::Value> {
    let produced = outputs.get(&reference.resource)?;
    let mut parts = reference.attribute.split('.');
    let mut current = produced.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}
