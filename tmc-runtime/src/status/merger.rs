//! Status Merger (C7, §4.7): recursively merges a set of status payloads,
//! picking a merge strategy per field path.

use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tmc_core::error::Error;
use tmc_core::model::{StatusConflict, StatusUpdate};
use tracing::warn;

/// A single field's merge behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStrategy {
    /// Keep the value from the chronologically latest source.
    Latest,
    /// Join string values with `,`, de-duplicated and sorted.
    Concat,
    /// Numeric sum across all sources carrying the field.
    Sum,
    /// Numeric maximum across all sources carrying the field.
    Max,
    /// Numeric minimum across all sources carrying the field.
    Min,
    /// Collect every source's value into a JSON array.
    Array,
}

/// One source's contribution to a field, passed to a [`CustomMergeFn`].
#[derive(Debug, Clone, Copy)]
pub struct FieldContribution<'a> {
    pub source_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub value: &'a serde_json::Value,
}

/// A caller-registered merge function for an exact field path or a path
/// prefix, consulted before the per-field [`FieldStrategy`] table (§4.7).
pub type CustomMergeFn = Arc<dyn Fn(&[FieldContribution<'_>]) -> serde_json::Value + Send + Sync>;

/// What happens when two sources disagree on a [`FieldStrategy::Latest`]
/// field (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictBehavior {
    /// Resolve silently; the conflict is still recorded in the returned list.
    Ignore,
    /// Resolve, record the conflict, and emit a `tracing::warn!`.
    Log,
    /// Fail the merge outright the first time a conflict is seen.
    Error,
}

impl Default for ConflictBehavior {
    fn default() -> Self {
        ConflictBehavior::Ignore
    }
}

/// Merges status payloads. Top-down recursive: at each JSON object level,
/// every source's sub-object is merged key by key; a field path is only a
/// leaf once at least one source's value there isn't itself an object.
/// Lookup order per field path: exact-path custom merger, then
/// prefix-match custom merger, then the configured [`FieldStrategy`], then
/// the built-in default ([`FieldStrategy::Latest`]).
#[derive(Clone, Default)]
pub struct Merger {
    field_strategies: HashMap<String, FieldStrategy>,
    exact_mergers: HashMap<String, CustomMergeFn>,
    prefix_mergers: Vec<(String, CustomMergeFn)>,
    conflict_behavior: ConflictBehavior,
}

impl Merger {
    /// An empty merger; every field falls back to [`FieldStrategy::Latest`].
    pub fn new() -> Self {
        Merger::default()
    }

    /// Registers a strategy for an exact dot-path (e.g. `"status.replicas"`).
    pub fn with_field_strategy(mut self, path: impl Into<String>, strategy: FieldStrategy) -> Self {
        self.field_strategies.insert(path.into(), strategy);
        self
    }

    /// Registers a custom merger for an exact dot-path, overriding any
    /// configured [`FieldStrategy`] there.
    pub fn with_exact_merger(mut self, path: impl Into<String>, merger: CustomMergeFn) -> Self {
        self.exact_mergers.insert(path.into(), merger);
        self
    }

    /// Registers a custom merger for every path starting with `prefix`.
    /// Checked after exact-path mergers, before [`FieldStrategy`] lookup.
    pub fn with_prefix_merger(mut self, prefix: impl Into<String>, merger: CustomMergeFn) -> Self {
        self.prefix_mergers.push((prefix.into(), merger));
        self
    }

    /// Sets how disagreeing [`FieldStrategy::Latest`] fields are handled.
    pub fn with_conflict_behavior(mut self, behavior: ConflictBehavior) -> Self {
        self.conflict_behavior = behavior;
        self
    }

    /// Merges every field present across `updates`. Returns an empty
    /// conflict list; use [`Merger::merge_detecting_conflicts`] to
    /// additionally surface disagreements.
    pub fn merge(&self, updates: &[StatusUpdate]) -> (serde_json::Value, Vec<StatusConflict>) {
        self.merge_inner(updates, false).expect("merge without conflict detection never returns Err")
    }

    /// Like [`Merger::merge`] but records a [`StatusConflict`] for every
    /// field where sources disagree and the field's strategy is
    /// [`FieldStrategy::Latest`] (the only strategy where disagreement is
    /// lossy — the other strategies are defined precisely to combine
    /// disagreeing values). Fails if [`ConflictBehavior::Error`] is
    /// configured and a conflict is found.
    pub fn merge_detecting_conflicts(
        &self,
        updates: &[StatusUpdate],
    ) -> Result<(serde_json::Value, Vec<StatusConflict>), Error> {
        self.merge_inner(updates, true)
    }

    fn merge_inner(
        &self,
        updates: &[StatusUpdate],
        detect_conflicts: bool,
    ) -> Result<(serde_json::Value, Vec<StatusConflict>), Error> {
        let roots: Vec<(&str, DateTime<Utc>, &serde_json::Value)> =
            updates.iter().map(|u| (u.source_id.as_str(), u.timestamp, &u.payload)).collect();
        let mut conflicts = Vec::new();
        let merged = self.merge_at("", &roots, detect_conflicts, &mut conflicts)?;
        Ok((merged, conflicts))
    }

    fn merge_at(
        &self,
        path: &str,
        contributions: &[(&str, DateTime<Utc>, &serde_json::Value)],
        detect_conflicts: bool,
        conflicts: &mut Vec<StatusConflict>,
    ) -> Result<serde_json::Value, Error> {
        if let Some(custom) = self.custom_merger_for(path) {
            let items: Vec<FieldContribution> =
                contributions.iter().map(|(s, t, v)| FieldContribution { source_id: s, timestamp: *t, value: v }).collect();
            return Ok(custom(&items));
        }

        let all_objects = !contributions.is_empty() && contributions.iter().all(|(_, _, v)| v.is_object());
        if all_objects {
            let mut keys: Vec<&str> = Vec::new();
            for (_, _, v) in contributions {
                for k in v.as_object().expect("checked is_object above").keys() {
                    if !keys.contains(&k.as_str()) {
                        keys.push(k.as_str());
                    }
                }
            }

            let mut merged = serde_json::Map::new();
            for key in keys {
                let child_path = if path.is_empty() { key.to_string() } else { format!("{path}.{key}") };
                let child_contributions: Vec<(&str, DateTime<Utc>, &serde_json::Value)> = contributions
                    .iter()
                    .filter_map(|(s, t, v)| v.as_object().and_then(|o| o.get(key)).map(|cv| (*s, *t, cv)))
                    .collect();
                let child_value = self.merge_at(&child_path, &child_contributions, detect_conflicts, conflicts)?;
                merged.insert(key.to_string(), child_value);
            }
            return Ok(serde_json::Value::Object(merged));
        }

        self.merge_leaf(path, contributions, detect_conflicts, conflicts)
    }

    fn custom_merger_for(&self, path: &str) -> Option<&CustomMergeFn> {
        self.exact_mergers
            .get(path)
            .or_else(|| self.prefix_mergers.iter().find(|(prefix, _)| path.starts_with(prefix.as_str())).map(|(_, f)| f))
    }

    fn merge_leaf(
        &self,
        path: &str,
        contributions: &[(&str, DateTime<Utc>, &serde_json::Value)],
        detect_conflicts: bool,
        conflicts: &mut Vec<StatusConflict>,
    ) -> Result<serde_json::Value, Error> {
        if contributions.is_empty() {
            return Ok(serde_json::Value::Null);
        }

        let strategy = self.field_strategies.get(path).copied().unwrap_or(FieldStrategy::Latest);
        let mut sorted = contributions.to_vec();
        sorted.sort_by_key(|(_, t, _)| *t);

        let value = match strategy {
            FieldStrategy::Latest => sorted.last().expect("non-empty").2.clone(),
            FieldStrategy::Concat => {
                let mut parts: Vec<String> = sorted.iter().filter_map(|(_, _, v)| v.as_str().map(str::to_string)).collect();
                parts.sort();
                parts.dedup();
                serde_json::Value::String(parts.join(","))
            }
            FieldStrategy::Sum => json_number(sorted.iter().filter_map(|(_, _, v)| v.as_f64()).sum()),
            FieldStrategy::Max => json_number(sorted.iter().filter_map(|(_, _, v)| v.as_f64()).fold(f64::MIN, f64::max)),
            FieldStrategy::Min => json_number(sorted.iter().filter_map(|(_, _, v)| v.as_f64()).fold(f64::MAX, f64::min)),
            FieldStrategy::Array => serde_json::Value::Array(sorted.iter().map(|(_, _, v)| (*v).clone()).collect()),
        };

        if detect_conflicts && strategy == FieldStrategy::Latest {
            let mut distinct: Vec<&serde_json::Value> = Vec::new();
            for (_, _, v) in &sorted {
                if !distinct.contains(v) {
                    distinct.push(v);
                }
            }
            if distinct.len() > 1 {
                let conflict = StatusConflict {
                    field_path: path.to_string(),
                    conflicting_sources: sorted.iter().map(|(s, _, _)| s.to_string()).collect(),
                    values: sorted.iter().map(|(s, _, v)| (s.to_string(), (*v).clone())).collect(),
                    resolution: "latest-wins".to_string(),
                };
                match self.conflict_behavior {
                    ConflictBehavior::Ignore => conflicts.push(conflict),
                    ConflictBehavior::Log => {
                        warn!(field_path = %conflict.field_path, "status merge conflict");
                        conflicts.push(conflict);
                    }
                    ConflictBehavior::Error => {
                        return Err(Error::fatal(format!("status merge conflict at field {path:?}")));
                    }
                }
            }
        }

        Ok(value)
    }
}

fn json_number(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
}
