//! Status Aggregator (C7, §4.7): reduces multiple [`StatusUpdate`]s into a
//! single [`AggregatedStatus`] under one of four strategies.

use std::collections::HashMap;
use tmc_core::error::Error;
use tmc_core::model::{AggregatedStatus, AggregationStrategy, StatusConflict, StatusUpdate};

use super::merger::Merger;

/// The fixed set of fields `conflict-detection` scans for disagreement
/// (§4.7): `status.conditions`, `status.phase`, `status.replicas`,
/// `status.readyReplicas`.
const CONFLICT_DETECTION_FIELDS: &[&str] = &["conditions", "phase", "replicas", "readyReplicas"];

/// Aggregates status updates from multiple sources into one view.
pub struct StatusAggregator {
    merger: Merger,
    source_priorities: HashMap<String, i64>,
}

impl Default for StatusAggregator {
    fn default() -> Self {
        StatusAggregator { merger: Merger::default(), source_priorities: HashMap::new() }
    }
}

impl StatusAggregator {
    /// Builds an aggregator with the default field-level merger and no
    /// configured source priorities (every source defaults to `0`).
    pub fn new() -> Self {
        StatusAggregator::default()
    }

    /// Builds an aggregator with a custom [`Merger`], e.g. one carrying
    /// extra registered field strategies.
    pub fn with_merger(merger: Merger) -> Self {
        StatusAggregator { merger, source_priorities: HashMap::new() }
    }

    /// Sets `source`'s priority for [`AggregationStrategy::SourcePriority`].
    /// Higher sorts first; unregistered sources default to `0`.
    pub fn with_source_priority(mut self, source: impl Into<String>, priority: i64) -> Self {
        self.source_priorities.insert(source.into(), priority);
        self
    }

    /// Aggregates `updates` under `strategy`. Errors on empty input (§4.7).
    pub fn aggregate(
        &self,
        updates: &[StatusUpdate],
        strategy: AggregationStrategy,
    ) -> Result<AggregatedStatus, Error> {
        if updates.is_empty() {
            return Err(Error::invalid_input("cannot aggregate an empty set of status updates"));
        }

        let sources: Vec<String> = updates.iter().map(|u| u.source_id.clone()).collect();
        // §8 invariant 5: result timestamp >= every input timestamp.
        let aggregated_at = updates.iter().map(|u| u.timestamp).max().expect("checked non-empty above");

        let (payload, conflicts) = match strategy {
            AggregationStrategy::LatestWins => {
                // Ties broken by source order in the input (§4.7): scan
                // forward, keep the first update seen at the running max.
                let mut best = &updates[0];
                for update in &updates[1..] {
                    if update.timestamp > best.timestamp {
                        best = update;
                    }
                }
                (best.payload.clone(), Vec::new())
            }
            AggregationStrategy::MergeAll => self.merger.merge(updates),
            AggregationStrategy::ConflictDetection => conflict_detection(updates),
            AggregationStrategy::SourcePriority => {
                let mut ordered: Vec<&StatusUpdate> = updates.iter().collect();
                ordered.sort_by(|a, b| {
                    let pa = self.priority_of(&a.source_id);
                    let pb = self.priority_of(&b.source_id);
                    pb.cmp(&pa).then_with(|| b.timestamp.cmp(&a.timestamp))
                });
                (ordered[0].payload.clone(), Vec::new())
            }
        };

        Ok(AggregatedStatus { payload, sources, aggregated_at, strategy, conflicts })
    }

    fn priority_of(&self, source_id: &str) -> i64 {
        self.source_priorities.get(source_id).copied().unwrap_or(0)
    }
}

/// `conflict-detection` (§4.7): choose the first update as base, then scan
/// [`CONFLICT_DETECTION_FIELDS`] under `status` across all updates,
/// recording a [`StatusConflict`] for every field with more than one
/// distinct value. Does not delegate to [`Merger`]: this strategy is a
/// fixed, narrow scan, not a general-purpose merge.
fn conflict_detection(updates: &[StatusUpdate]) -> (serde_json::Value, Vec<StatusConflict>) {
    let base = updates[0].payload.clone();
    let mut conflicts = Vec::new();

    for field in CONFLICT_DETECTION_FIELDS {
        let field_path = format!("status.{field}");
        let mut values: HashMap<String, serde_json::Value> = HashMap::new();
        let mut distinct: Vec<&serde_json::Value> = Vec::new();
        let mut sources = Vec::new();

        for update in updates {
            let Some(value) = update.payload.pointer(&format!("/status/{field}")) else { continue };
            values.insert(update.source_id.clone(), value.clone());
            sources.push(update.source_id.clone());
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }

        if distinct.len() > 1 {
            conflicts.push(StatusConflict {
                field_path,
                conflicting_sources: sources,
                values,
                resolution: "first-update-as-base".to_string(),
            });
        }
    }

    (base, conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    fn update(source: &str, seconds_ago: i64, payload: serde_json::Value) -> StatusUpdate {
        StatusUpdate {
            source_id: source.to_string(),
            timestamp: Utc::now() - ChronoDuration::seconds(seconds_ago),
            resource_version: "1".to_string(),
            payload,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn latest_wins_picks_newest_timestamp() {
        let aggregator = StatusAggregator::new();
        let updates = vec![
            update("a", 10, json!({"phase": "Pending"})),
            update("b", 0, json!({"phase": "Running"})),
        ];
        let result = aggregator.aggregate(&updates, AggregationStrategy::LatestWins).unwrap();
        assert_eq!(result.payload["phase"], "Running");
    }

    #[test]
    fn result_timestamp_is_never_before_any_input() {
        let aggregator = StatusAggregator::new();
        let updates = vec![update("a", 10, json!({})), update("b", 0, json!({})), update("c", 5, json!({}))];
        let result = aggregator.aggregate(&updates, AggregationStrategy::LatestWins).unwrap();
        for u in &updates {
            assert!(result.aggregated_at >= u.timestamp);
        }
    }

    #[test]
    fn source_priority_defaults_to_zero_and_sorts_descending() {
        let aggregator = StatusAggregator::new().with_source_priority("primary", 10);
        let updates = vec![
            update("secondary", 0, json!({"phase": "Running"})),
            update("primary", 10, json!({"phase": "Degraded"})),
        ];
        let result = aggregator.aggregate(&updates, AggregationStrategy::SourcePriority).unwrap();
        assert_eq!(result.payload["phase"], "Degraded");
    }

    #[test]
    fn source_priority_tie_breaks_by_timestamp_descending() {
        let aggregator = StatusAggregator::new();
        let updates = vec![
            update("a", 10, json!({"phase": "Older"})),
            update("b", 0, json!({"phase": "Newer"})),
        ];
        let result = aggregator.aggregate(&updates, AggregationStrategy::SourcePriority).unwrap();
        assert_eq!(result.payload["phase"], "Newer");
    }

    #[test]
    fn conflict_detection_scans_only_the_four_named_fields() {
        let aggregator = StatusAggregator::new();
        let updates = vec![
            update("a", 10, json!({"status": {"phase": "Running", "replicas": 3, "extra": "x"}})),
            update("b", 0, json!({"status": {"phase": "Degraded", "replicas": 3, "extra": "y"}})),
        ];
        let result = aggregator.aggregate(&updates, AggregationStrategy::ConflictDetection).unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].field_path, "status.phase");
        // base is the first update, untouched by the second's "extra" field
        assert_eq!(result.payload["status"]["extra"], "x");
    }

    #[test]
    fn empty_updates_is_an_error() {
        let aggregator = StatusAggregator::new();
        let err = aggregator.aggregate(&[], AggregationStrategy::LatestWins).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
