use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Record;

/// Query-string suffix that selects a prefix filter on the stripped field name.
pub const LEGACY_PREFIX_SUFFIX: &str = "Prefix";

const SEARCH_KEYS: [&str; 2] = ["q", "search"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FilterOp {
    /// Strict JSON equality, no coercion.
    Equals(Value),
    /// Text-coerced field starts with the value.
    Prefix(String),
    /// Field equals one of the values. An empty list is a no-op.
    MemberOf(Vec<Value>),
}

impl FilterOp {
    /// Empty operands mean "no filter" and are skipped by [`apply_filters`].
    pub fn is_empty(&self) -> bool {
        match self {
            FilterOp::Equals(Value::Null) => true,
            FilterOp::Equals(Value::String(s)) => s.is_empty(),
            FilterOp::Equals(_) => false,
            FilterOp::Prefix(p) => p.is_empty(),
            FilterOp::MemberOf(values) => values.is_empty(),
        }
    }

    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            FilterOp::Equals(expected) => value == Some(expected),
            FilterOp::Prefix(prefix) => value
                .and_then(coerce_text)
                .unwrap_or_default()
                .starts_with(prefix.as_str()),
            FilterOp::MemberOf(values) => value.is_some_and(|v| values.contains(v)),
        }
    }
}

/// Search string plus keyed filters; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterOp>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.search = search.into();
    }

    pub fn set_filter(&mut self, key: impl Into<String>, op: FilterOp) {
        self.filters.insert(key.into(), op);
    }

    pub fn clear_filter(&mut self, key: &str) {
        self.filters.remove(key);
    }

    /// Drops every filter and the search string.
    pub fn clear_all(&mut self) {
        self.filters.clear();
        self.search.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_empty() && self.filters.values().all(FilterOp::is_empty)
    }

    pub fn apply<'a, R: Record>(&self, records: &'a [R], search_fields: &[&str]) -> Vec<&'a R> {
        apply_filters(records, search_fields, &self.search, &self.filters)
    }

    /// Builds state from decoded query pairs.
    ///
    /// `q`/`search` set the search string, `<field>Prefix` selects a prefix
    /// filter, a key given more than once becomes a member-of filter and
    /// everything else is a string equality.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut state = Self::new();

        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            if SEARCH_KEYS.contains(&key.as_str()) {
                state.search = value;
                continue;
            }
            grouped.entry(key).or_default().push(value);
        }

        for (key, mut values) in grouped {
            if let Some(field) = key.strip_suffix(LEGACY_PREFIX_SUFFIX)
                && !field.is_empty()
            {
                if let Some(prefix) = values.pop() {
                    state.set_filter(field, FilterOp::Prefix(prefix));
                }
                continue;
            }

            let op = if values.len() > 1 {
                FilterOp::MemberOf(values.into_iter().map(Value::String).collect())
            } else {
                match values.pop() {
                    Some(value) => FilterOp::Equals(Value::String(value)),
                    None => continue,
                }
            };
            state.set_filter(key, op);
        }

        state
    }
}

/// Order-preserving filter: search first, then every non-empty filter ANDed.
pub fn apply_filters<'a, R: Record>(
    records: &'a [R],
    search_fields: &[&str],
    search: &str,
    filters: &BTreeMap<String, FilterOp>,
) -> Vec<&'a R> {
    let needle = search.to_lowercase();
    let active = filters
        .iter()
        .filter(|(_, op)| !op.is_empty())
        .collect::<Vec<_>>();

    records
        .iter()
        .filter(|record| needle.is_empty() || matches_search(*record, search_fields, &needle))
        .filter(|record| {
            active
                .iter()
                .all(|(field, op)| op.matches(record.field(field).as_ref()))
        })
        .collect()
}

fn matches_search<R: Record>(record: &R, search_fields: &[&str], needle: &str) -> bool {
    search_fields.iter().any(|field| {
        record
            .field(field)
            .as_ref()
            .filter(|value| !is_blank(value))
            .and_then(coerce_text)
            .is_some_and(|text| text.to_lowercase().contains(needle))
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Text form of a field value. Objects have none.
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| coerce_text(item).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => None,
    }
}
