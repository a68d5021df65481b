use std::fmt;

use thiserror::Error as ThisError;

use crate::formatting::{sanitize_label_key, sanitize_label_value};

/// Errors surfaced while turning report and queue data into metrics.
///
/// None of these are fatal to the exporter: the poll driver logs them and carries on with whatever
/// data was usable.
#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum Error {
    /// An external data source could not be read.
    #[error("source `{source_name}` unavailable: {reason}")]
    SourceUnavailable {
        /// Name of the source, typically the program that was run.
        source_name: String,
        /// Details about the failure.
        reason: String,
    },

    /// A report section was present but could not be interpreted.
    #[error("malformed section `{section}`: {reason}")]
    MalformedSection {
        /// Anchor name of the section.
        section: String,
        /// Details about the failure.
        reason: String,
    },

    /// A cell did not match the `<number>[KB|MB|GB]` grammar.
    #[error("malformed quantity `{text}`")]
    MalformedUnit {
        /// The offending cell text.
        text: String,
    },

    /// A cell did not match the relative time range grammar.
    #[error("malformed time range `{text}`")]
    MalformedTimeRange {
        /// The offending cell text.
        text: String,
    },
}

/// Errors returned by [`Registry::reconcile`](crate::Registry::reconcile).
#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum ReconcileError {
    /// The metric already exists with a different kind.
    #[error("metric `{name}` is registered as {registered} but was reconciled as {requested}")]
    KindMismatch {
        /// Metric name.
        name: String,
        /// Kind the metric was first registered with.
        registered: MetricKind,
        /// Kind the caller asked for.
        requested: MetricKind,
    },
}

/// Errors that could occur while building or installing the exporter.
#[derive(Debug, ThisError)]
pub enum BuildError {
    /// The listen address could not be parsed.
    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),

    /// Binding/listening to the given address did not succeed.
    #[error("failed to create HTTP listener: {0}")]
    FailedToCreateHTTPListener(String),

    /// Creating the networking event loop did not succeed.
    #[error("failed to spawn Tokio runtime for endpoint: {0}")]
    FailedToCreateRuntime(String),

    /// The poll interval was zero.
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    /// The command timeout was zero.
    #[error("command timeout must be greater than zero")]
    ZeroCommandTimeout,

    /// A command was configured without a program to run.
    #[error("command for `{0}` has no program")]
    EmptyCommand(&'static str),
}

/// Metric kind.
///
/// Decides how a new observation is merged with what the registry already holds.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MetricKind {
    /// Point-in-time value; every observation replaces the full set of label tuples.
    Gauge,
    /// Monotonic total; observations are added to the running value and tuples are never evicted.
    Accumulator,
}

impl MetricKind {
    /// The Prometheus type this kind is exposed as.
    pub fn as_type_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Accumulator => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => f.write_str("gauge"),
            MetricKind::Accumulator => f.write_str("accumulator"),
        }
    }
}

/// An ordered set of labels identifying one series of a metric.
///
/// Order is the declared label order of the metric, and is part of the identity of the set.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct LabelSet {
    labels: Vec<(String, String)>,
}

impl LabelSet {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label, keeping declaration order.
    #[must_use]
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Returns `true` if the set holds no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Looks up a label value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Iterates over the labels in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Renders each label as `key="value"`, sanitized for the Prometheus exposition format.
    pub fn to_strings(&self) -> impl Iterator<Item = String> + '_ {
        self.labels.iter().map(|(k, v)| {
            format!("{}=\"{}\"", sanitize_label_key(k), sanitize_label_value(v))
        })
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { labels: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// One observed series: a label tuple and its value.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledValue {
    /// Labels identifying the series.
    pub labels: LabelSet,
    /// Observed value.
    pub value: f64,
}

impl LabeledValue {
    /// Creates a new `LabeledValue`.
    pub fn new(labels: LabelSet, value: f64) -> Self {
        Self { labels, value }
    }

    /// Creates a `LabeledValue` with no labels.
    pub fn unlabeled(value: f64) -> Self {
        Self { labels: LabelSet::new(), value }
    }
}
