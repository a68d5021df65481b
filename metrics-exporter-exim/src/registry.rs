use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::warn;

use crate::common::{LabelSet, LabeledValue, MetricKind, ReconcileError};
use crate::formatting::{
    sanitize_metric_name, write_help_line, write_metric_line, write_type_line,
};

type Series = IndexMap<LabelSet, f64>;

struct Family {
    kind: MetricKind,
    // Readers clone the `Arc` and never see a half-applied reconcile.
    series: RwLock<Arc<Series>>,
}

/// A point-in-time copy of one metric.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSnapshot {
    /// Kind the metric was registered with.
    pub kind: MetricKind,
    /// Live label tuples and their values, in first-seen order.
    pub series: Arc<IndexMap<LabelSet, f64>>,
}

impl MetricSnapshot {
    /// Looks up the value of one label tuple.
    pub fn value(&self, labels: &LabelSet) -> Option<f64> {
        self.series.get(labels).copied()
    }

    /// Number of live label tuples.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Returns `true` if the metric has no live label tuples.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// The long-lived store of every metric the exporter exposes.
///
/// Metrics are registered implicitly by their first [`reconcile`](Registry::reconcile) and keep
/// that kind for the lifetime of the registry. Nothing is persisted: a new registry starts empty,
/// so accumulators restart from zero along with the process.
#[derive(Default)]
pub struct Registry {
    families: RwLock<IndexMap<String, Arc<Family>>>,
    descriptions: RwLock<HashMap<String, String>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the help text of a metric, unless it already has one.
    pub fn describe(&self, name: &str, description: &str) {
        let mut descriptions = self.descriptions.write();
        if !descriptions.contains_key(name) {
            descriptions.insert(name.to_owned(), description.to_owned());
        }
    }

    fn family(&self, name: &str, kind: MetricKind) -> Result<Arc<Family>, ReconcileError> {
        let existing = self.families.read().get(name).cloned();
        let family = match existing {
            Some(family) => family,
            None => self
                .families
                .write()
                .entry(name.to_owned())
                .or_insert_with(|| {
                    Arc::new(Family { kind, series: RwLock::new(Arc::new(Series::new())) })
                })
                .clone(),
        };

        if family.kind != kind {
            return Err(ReconcileError::KindMismatch {
                name: name.to_owned(),
                registered: family.kind,
                requested: kind,
            });
        }
        Ok(family)
    }

    /// Merges one observation of a metric into the registry.
    ///
    /// For [`MetricKind::Gauge`] the live tuples become exactly `observed`: tuples missing from it
    /// are evicted and surviving ones are overwritten. The replacement map is built completely
    /// before it is published, so concurrent readers see either the old set or the new one.
    /// Within a single observation, the last value for a repeated tuple wins.
    ///
    /// For [`MetricKind::Accumulator`] every observed value is added to the running value of its
    /// tuple and nothing is ever evicted. Negative values would make the total go backwards and
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::KindMismatch`] if `name` was registered with a different kind;
    /// the metric is left untouched.
    pub fn reconcile<I>(&self, name: &str, kind: MetricKind, observed: I) -> Result<(), ReconcileError>
    where
        I: IntoIterator<Item = LabeledValue>,
    {
        let family = self.family(name, kind)?;

        match kind {
            MetricKind::Gauge => {
                let replacement = observed
                    .into_iter()
                    .map(|LabeledValue { labels, value }| (labels, value))
                    .collect::<Series>();
                *family.series.write() = Arc::new(replacement);
            }
            MetricKind::Accumulator => {
                let mut series = family.series.write();
                let mut updated = Series::clone(&series);
                for LabeledValue { labels, value } in observed {
                    if !(value.is_finite() && value >= 0.0) {
                        warn!(metric = name, ?labels, value, "skipping accumulator decrease");
                        continue;
                    }
                    *updated.entry(labels).or_insert(0.0) += value;
                }
                *series = Arc::new(updated);
            }
        }

        Ok(())
    }

    /// Gets a snapshot of one metric, if it was ever reconciled.
    pub fn get(&self, name: &str) -> Option<MetricSnapshot> {
        let family = self.families.read().get(name).cloned()?;
        let series = family.series.read().clone();
        Some(MetricSnapshot { kind: family.kind, series })
    }

    /// Names of every registered metric, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.families.read().keys().cloned().collect()
    }

    /// Renders every metric in the Prometheus text exposition format.
    ///
    /// Metrics appear in registration order. Accumulators are exposed as counters and get a
    /// `_total` suffix. A metric with no live tuples is left out entirely.
    pub fn render(&self) -> String {
        let families = self
            .families
            .read()
            .iter()
            .map(|(name, family)| (name.clone(), family.kind, family.series.read().clone()))
            .collect::<Vec<_>>();
        let descriptions = self.descriptions.read();

        let mut output = String::new();
        for (name, kind, series) in families {
            if series.is_empty() {
                continue;
            }

            let suffix = match kind {
                MetricKind::Gauge => None,
                MetricKind::Accumulator => Some("total"),
            };
            let sanitized = sanitize_metric_name(&name);

            if let Some(desc) = descriptions.get(name.as_str()) {
                write_help_line(&mut output, &sanitized, suffix, desc);
            }
            write_type_line(&mut output, &sanitized, suffix, kind.as_type_str());
            for (labels, value) in series.iter() {
                write_metric_line(&mut output, &sanitized, suffix, labels, value);
            }
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::common::{LabelSet, LabeledValue, MetricKind, ReconcileError};
    use proptest::prelude::*;

    fn host(name: &str, value: f64) -> LabeledValue {
        LabeledValue::new(LabelSet::new().with("host", name), value)
    }

    fn hosts(registry: &Registry, metric: &str) -> Vec<(String, f64)> {
        let snapshot = registry.get(metric).expect("metric should be registered");
        snapshot
            .series
            .iter()
            .map(|(labels, value)| (labels.get("host").unwrap_or_default().to_owned(), *value))
            .collect()
    }

    #[test]
    fn gauge_replaces_and_evicts() {
        let registry = Registry::new();
        let name = "exim_sending_hosts_message_count";

        registry
            .reconcile(name, MetricKind::Gauge, vec![host("a", 5.0), host("b", 7.0)])
            .unwrap();
        registry
            .reconcile(name, MetricKind::Gauge, vec![host("b", 2.0), host("c", 1.0)])
            .unwrap();

        assert_eq!(hosts(&registry, name), vec![("b".to_owned(), 2.0), ("c".to_owned(), 1.0)]);
    }

    #[test]
    fn gauge_with_empty_observation_evicts_everything() {
        let registry = Registry::new();
        let name = "exim_relayed_messages";

        registry.reconcile(name, MetricKind::Gauge, vec![host("a", 5.0)]).unwrap();
        registry.reconcile(name, MetricKind::Gauge, vec![]).unwrap();

        assert!(registry.get(name).expect("still registered").is_empty());
    }

    #[test]
    fn gauge_keeps_last_duplicate() {
        let registry = Registry::new();
        registry
            .reconcile("g", MetricKind::Gauge, vec![host("a", 1.0), host("a", 4.0)])
            .unwrap();
        assert_eq!(hosts(&registry, "g"), vec![("a".to_owned(), 4.0)]);
    }

    #[test]
    fn accumulator_adds_and_never_evicts() {
        let registry = Registry::new();
        let name = "exim_rejected_ips_message_count";

        registry.reconcile(name, MetricKind::Accumulator, vec![host("a", 3.0)]).unwrap();
        registry.reconcile(name, MetricKind::Accumulator, vec![host("a", 3.0)]).unwrap();
        registry.reconcile(name, MetricKind::Accumulator, vec![host("b", 1.0)]).unwrap();
        registry.reconcile(name, MetricKind::Accumulator, vec![]).unwrap();

        assert_eq!(hosts(&registry, name), vec![("a".to_owned(), 6.0), ("b".to_owned(), 1.0)]);
    }

    #[test]
    fn accumulator_skips_negative_values() {
        let registry = Registry::new();
        registry.reconcile("acc", MetricKind::Accumulator, vec![host("a", 3.0)]).unwrap();
        registry
            .reconcile("acc", MetricKind::Accumulator, vec![host("a", -2.0), host("a", 1.0)])
            .unwrap();
        assert_eq!(hosts(&registry, "acc"), vec![("a".to_owned(), 4.0)]);
    }

    #[test]
    fn kind_mismatch_leaves_metric_untouched() {
        let registry = Registry::new();
        registry.reconcile("m", MetricKind::Gauge, vec![host("a", 1.0)]).unwrap();

        let result = registry.reconcile("m", MetricKind::Accumulator, vec![host("a", 1.0)]);
        assert_eq!(
            result,
            Err(ReconcileError::KindMismatch {
                name: "m".to_owned(),
                registered: MetricKind::Gauge,
                requested: MetricKind::Accumulator,
            })
        );
        assert_eq!(hosts(&registry, "m"), vec![("a".to_owned(), 1.0)]);
    }

    #[test]
    fn snapshots_are_not_affected_by_later_reconciles() {
        let registry = Registry::new();
        registry.reconcile("g", MetricKind::Gauge, vec![host("a", 1.0)]).unwrap();
        let before = registry.get("g").unwrap();
        registry.reconcile("g", MetricKind::Gauge, vec![host("b", 2.0)]).unwrap();

        assert_eq!(before.value(&LabelSet::new().with("host", "a")), Some(1.0));
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn concurrent_readers_only_see_whole_gauge_sets() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let set_a = [("a1", 1.0), ("a2", 2.0), ("a3", 3.0)];
        let set_b = [("b1", 10.0), ("b2", 20.0)];
        let observe = |set: &[(&str, f64)]| set.iter().map(|(h, v)| host(h, *v)).collect::<Vec<_>>();
        let expect = |set: &[(&str, f64)]| {
            set.iter().map(|(h, v)| ((*h).to_owned(), *v)).collect::<Vec<_>>()
        };
        let (expected_a, expected_b) = (expect(&set_a), expect(&set_b));

        let registry = Registry::new();
        registry.reconcile("g", MetricKind::Gauge, observe(&set_a)).unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut reads = 0usize;
                while !done.load(Ordering::Acquire) || reads == 0 {
                    let seen = hosts(&registry, "g");
                    assert!(seen == expected_a || seen == expected_b, "torn snapshot: {seen:?}");
                    reads += 1;
                }
                reads
            });

            for i in 0..2_000 {
                let set: &[(&str, f64)] = if i % 2 == 0 { &set_b } else { &set_a };
                registry.reconcile("g", MetricKind::Gauge, observe(set)).unwrap();
            }
            done.store(true, Ordering::Release);

            assert!(reader.join().expect("reader thread panicked") > 0);
        });
    }

    #[test]
    fn render_in_registration_order() {
        let registry = Registry::new();
        registry.describe("exim_queue_count", "Total number of emails in the Exim queue");
        registry.describe("exim_rejection_reasons", "Mail rejection reasons by message count");

        registry
            .reconcile("exim_queue_count", MetricKind::Gauge, vec![LabeledValue::unlabeled(12.0)])
            .unwrap();
        registry.reconcile("exim_relayed_messages", MetricKind::Gauge, vec![]).unwrap();
        registry
            .reconcile(
                "exim_rejection_reasons",
                MetricKind::Accumulator,
                vec![LabeledValue::new(LabelSet::new().with("reason", "relay not permitted"), 3.0)],
            )
            .unwrap();

        let expected = concat!(
            "# HELP exim_queue_count Total number of emails in the Exim queue\n",
            "# TYPE exim_queue_count gauge\n",
            "exim_queue_count 12\n",
            "\n",
            "# HELP exim_rejection_reasons_total Mail rejection reasons by message count\n",
            "# TYPE exim_rejection_reasons_total counter\n",
            "exim_rejection_reasons_total{reason=\"relay not permitted\"} 3\n",
            "\n",
        );
        assert_eq!(registry.render(), expected);
        assert_eq!(
            registry.names(),
            vec!["exim_queue_count", "exim_relayed_messages", "exim_rejection_reasons"]
        );
    }

    proptest! {
        #[test]
        fn gauge_ends_with_exactly_the_last_observation(
            first in proptest::collection::btree_map("[a-z]{1,4}", 0u32..1000, 0..8),
            second in proptest::collection::btree_map("[a-z]{1,4}", 0u32..1000, 0..8),
        ) {
            let registry = Registry::new();
            let observe = |values: &std::collections::BTreeMap<String, u32>| {
                values.iter().map(|(h, v)| host(h, f64::from(*v))).collect::<Vec<_>>()
            };

            registry.reconcile("g", MetricKind::Gauge, observe(&first)).unwrap();
            registry.reconcile("g", MetricKind::Gauge, observe(&second)).unwrap();

            let expected = second.iter().map(|(h, v)| (h.clone(), f64::from(*v))).collect::<Vec<_>>();
            prop_assert_eq!(hosts(&registry, "g"), expected);
        }
    }
}
