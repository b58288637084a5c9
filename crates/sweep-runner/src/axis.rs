//! Experiment axes and the combinations they span.
//!
//! Groups are combined by nested iteration, first group outermost. A free
//! axis contributes each of its values; a paired group contributes one
//! position at a time, binding every axis of the group at that position.

use crate::error::ExpandError;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Inserted into the template as-is.
    #[default]
    Raw,
    /// Inserted as a JSON string literal, quotes included.
    Json,
}

impl Encoding {
    fn apply(self, text: &str) -> String {
        match self {
            Encoding::Raw => text.to_string(),
            Encoding::Json => Value::String(text.to_string()).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(deserialize_with = "scalar_strings")]
    pub values: Vec<String>,
}

impl Axis {
    pub fn new<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Axis {
            name: name.to_string(),
            encoding: Encoding::Raw,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisGroup {
    Paired { paired: Vec<Axis> },
    Free(Axis),
}

impl AxisGroup {
    pub fn axes(&self) -> &[Axis] {
        match self {
            AxisGroup::Paired { paired } => paired,
            AxisGroup::Free(axis) => std::slice::from_ref(axis),
        }
    }

    /// Number of values this group iterates over.
    pub fn positions(&self) -> usize {
        self.axes().first().map(|a| a.values.len()).unwrap_or(0)
    }
}

/// One combination: every field bound to its (reference-resolved) value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    fields: BTreeMap<String, BoundValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BoundValue {
    text: String,
    encoding: Encoding,
}

impl Binding {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|v| v.text.as_str())
    }

    /// Text as it goes into the template.
    pub fn encoded(&self, field: &str) -> Option<String> {
        self.fields.get(field).map(|v| v.encoding.apply(&v.text))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.text.as_str()))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
        )
    }

    fn insert(&mut self, field: &str, text: &str, encoding: Encoding) {
        self.fields.insert(
            field.to_string(),
            BoundValue {
                text: text.to_string(),
                encoding,
            },
        );
    }
}

pub(crate) fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("reference pattern"))
}

/// Replaces `${field}` references in `text` with `lookup(field)`. The
/// replacement text is not scanned again.
pub(crate) fn substitute_references<F>(
    text: &str,
    owner: &str,
    lookup: F,
) -> Result<String, ExpandError>
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = reference_pattern();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        let value = lookup(name).ok_or_else(|| ExpandError::UnboundReference {
            field: owner.to_string(),
            reference: name.to_string(),
        })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Field names in binding order, rejecting empty axes, uneven pairings,
/// fields bound twice and plans too large to enumerate.
pub fn validate_groups(groups: &[AxisGroup]) -> Result<Vec<String>, ExpandError> {
    let mut seen = BTreeSet::new();
    let mut fields = Vec::new();
    for group in groups {
        let axes = group.axes();
        if axes.is_empty() {
            return Err(ExpandError::EmptyAxis("<empty paired group>".to_string()));
        }
        for axis in axes {
            if axis.values.is_empty() {
                return Err(ExpandError::EmptyAxis(axis.name.clone()));
            }
            if !seen.insert(axis.name.clone()) {
                return Err(ExpandError::DuplicateField(axis.name.clone()));
            }
            fields.push(axis.name.clone());
        }
        let expected = group.positions();
        if axes.iter().any(|a| a.values.len() != expected) {
            return Err(ExpandError::MismatchedPairing {
                axes: axes
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                lengths: axes
                    .iter()
                    .map(|a| a.values.len().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
    }
    combination_count(groups)?;
    Ok(fields)
}

pub fn combination_count(groups: &[AxisGroup]) -> Result<usize, ExpandError> {
    if groups.is_empty() {
        return Ok(0);
    }
    groups.iter().try_fold(1usize, |total, group| {
        total
            .checked_mul(group.positions())
            .ok_or(ExpandError::TooManyCombinations)
    })
}

/// Every combination in nested-iteration order, references resolved.
pub fn combinations(groups: &[AxisGroup]) -> Result<Vec<Binding>, ExpandError> {
    validate_groups(groups)?;
    let total = combination_count(groups)?;
    let mut out = Vec::with_capacity(total);
    if total == 0 {
        return Ok(out);
    }

    let mut cursor = vec![0usize; groups.len()];
    loop {
        let mut raw = Binding::default();
        for (group, &position) in groups.iter().zip(cursor.iter()) {
            for axis in group.axes() {
                raw.insert(&axis.name, &axis.values[position], axis.encoding);
            }
        }
        out.push(resolve_references(&raw)?);

        // Odometer step: the last group turns fastest.
        let mut idx = groups.len();
        loop {
            if idx == 0 {
                return Ok(out);
            }
            idx -= 1;
            cursor[idx] += 1;
            if cursor[idx] < groups[idx].positions() {
                break;
            }
            cursor[idx] = 0;
        }
    }
}

fn resolve_references(raw: &Binding) -> Result<Binding, ExpandError> {
    let mut resolved = Binding::default();
    for (field, value) in raw.fields.iter() {
        let text = substitute_references(&value.text, field, |name| {
            raw.get(name).map(str::to_string)
        })?;
        resolved.insert(field, &text, value.encoding);
    }
    Ok(resolved)
}

fn scalar_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(de::Error::custom(format!(
                "axis values must be strings, numbers or booleans, got {}",
                other
            ))),
        })
        .collect()
}
