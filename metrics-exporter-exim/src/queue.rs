//! The live queue: a total from `exim -bpc` and per-sender counts from `exim -bp`.
use indexmap::IndexMap;

use crate::common::{Error, LabelSet, LabeledValue, MetricKind};
use crate::sections::MetricDef;
use crate::units::parse_count;

/// Total number of queued messages.
pub const QUEUE_COUNT: MetricDef = MetricDef {
    name: "exim_queue_count",
    help: "Total number of emails in the Exim queue",
    kind: MetricKind::Gauge,
};

/// Queued messages per sender address.
pub const EMAIL_COUNT: MetricDef = MetricDef {
    name: "exim_email_count",
    help: "Number of emails in the queue per sender",
    kind: MetricKind::Gauge,
};

/// State of the queue at one poll.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueueSnapshot {
    /// Number of queued messages, as counted by Exim.
    pub total_count: u64,
    /// Queued messages per sender address, in first-seen order.
    pub per_sender: IndexMap<String, u64>,
}

impl QueueSnapshot {
    /// Builds a snapshot from a queue listing and a separately obtained total.
    pub fn collect(listing: &str, total_count: u64) -> Self {
        Self { total_count, per_sender: count_senders(listing) }
    }
}

/// Counts queued messages per sender in the output of `exim -bp`.
///
/// Every line whose last whitespace-separated token contains an `@` counts once towards that
/// token, which includes the indented recipient lines. Lines ending in anything else, such as
/// frozen markers, are ignored.
pub fn count_senders(listing: &str) -> IndexMap<String, u64> {
    let mut counts = IndexMap::new();
    for line in listing.lines() {
        if let Some(address) = line.split_whitespace().last().filter(|token| token.contains('@')) {
            *counts.entry(address.to_owned()).or_insert(0) += 1;
        }
    }
    counts
}

/// Parses the output of `exim -bpc`.
///
/// # Errors
///
/// Returns [`Error::MalformedUnit`] if the output is not a single non-negative integer.
pub fn parse_queue_count(output: &str) -> Result<u64, Error> {
    parse_count(output)
}

/// The `exim_queue_count` series for a total.
pub fn count_observation(total_count: u64) -> Vec<LabeledValue> {
    vec![LabeledValue::unlabeled(total_count as f64)]
}

/// The `exim_email_count` series for per-sender counts, labeled with the local host name.
pub fn sender_observation(per_sender: &IndexMap<String, u64>, hostname: &str) -> Vec<LabeledValue> {
    per_sender
        .iter()
        .map(|(email, count)| {
            let labels = LabelSet::new().with("email", email.as_str()).with("hostname", hostname);
            LabeledValue::new(labels, *count as f64)
        })
        .collect()
}
