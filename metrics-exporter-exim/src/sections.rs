//! Extraction rules for each eximstats report section.
//!
//! Every section lays its columns out differently, so each metric gets one declarative
//! [`ExtractionRule`] naming exactly which column holds each label and which holds the value.
//! [`extract`] walks [`RULES`] uniformly; there is no per-section code.
use crate::common::{Error, LabelSet, LabeledValue, MetricKind};
use crate::report::{Report, Row, Table};
use crate::units::{parse_count, parse_size, parse_time_range};

/// Static description of an exported metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MetricDef {
    /// Metric name, without any type suffix.
    pub name: &'static str,
    /// Help text.
    pub help: &'static str,
    /// How observations merge into the registry.
    pub kind: MetricKind,
}

impl MetricDef {
    const fn gauge(name: &'static str, help: &'static str) -> Self {
        Self { name, help, kind: MetricKind::Gauge }
    }

    const fn accumulator(name: &'static str, help: &'static str) -> Self {
        Self { name, help, kind: MetricKind::Accumulator }
    }
}

/// How a value cell is read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Quantity {
    /// A plain message count.
    Count,
    /// A size such as `12MB`, normalized to bytes.
    Size,
}

impl Quantity {
    fn parse(&self, text: &str) -> Result<u64, Error> {
        match self {
            Quantity::Count => parse_count(text),
            Quantity::Size => parse_size(text),
        }
    }
}

/// How a label cell is checked before being used verbatim as the label value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LabelCheck {
    /// Any text.
    Text,
    /// Must be a relative time range such as `Under 1m` or `15m`.
    TimeRange,
}

/// Where one label of a metric comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LabelColumn {
    /// Label name.
    pub name: &'static str,
    /// Zero-based column index.
    pub column: usize,
    /// Validation applied to the cell.
    pub check: LabelCheck,
}

const fn label(name: &'static str, column: usize) -> LabelColumn {
    LabelColumn { name, column, check: LabelCheck::Text }
}

const fn bucket(name: &'static str, column: usize) -> LabelColumn {
    LabelColumn { name, column, check: LabelCheck::TimeRange }
}

/// Maps the rows of one report section onto one metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtractionRule {
    /// Anchor name of the section.
    pub section: &'static str,
    /// Target metric.
    pub metric: MetricDef,
    /// When set, only the row whose first cell equals this is read.
    pub row_key: Option<&'static str>,
    /// Label columns, in declared label order.
    pub labels: &'static [LabelColumn],
    /// Zero-based column index of the value.
    pub value_column: usize,
    /// How the value cell is read.
    pub quantity: Quantity,
}

/// Result of running one rule over one table.
#[derive(Debug, Default, PartialEq)]
pub struct RuleOutput {
    /// Series read from well-formed rows.
    pub values: Vec<LabeledValue>,
    /// One error per row that had to be skipped.
    pub skipped: Vec<Error>,
}

impl ExtractionRule {
    /// Reads every data row of `table`, skipping (and reporting) rows that do not fit the rule.
    pub fn extract(&self, table: &Table) -> RuleOutput {
        let mut output = RuleOutput::default();

        let rows = table.rows().iter().enumerate().filter(|(_, row)| match self.row_key {
            Some(key) => row.first().map(String::as_str) == Some(key),
            None => true,
        });
        for (index, row) in rows {
            match self.extract_row(index, row) {
                Ok(value) => output.values.push(value),
                Err(e) => output.skipped.push(e),
            }
        }

        output
    }

    fn extract_row(&self, index: usize, row: &Row) -> Result<LabeledValue, Error> {
        let cell = |column: usize| {
            row.get(column).ok_or_else(|| Error::MalformedSection {
                section: self.section.to_owned(),
                reason: format!("row {index} has {} cells, column {column} is missing", row.len()),
            })
        };

        let mut labels = LabelSet::new();
        for label in self.labels {
            let text = cell(label.column)?;
            if label.check == LabelCheck::TimeRange {
                parse_time_range(text)?;
            }
            labels = labels.with(label.name, text.as_str());
        }

        let value = self.quantity.parse(cell(self.value_column)?)?;
        Ok(LabeledValue::new(labels, value as f64))
    }
}

const GRAND_TOTAL: &str = "Grandtotal";
const TRANSPORT: &str = "Transport";
const RECEIVED_PER_HOUR: &str = "Messages received";
const DELIVERIES_PER_HOUR: &str = "Deliveries";
const QUEUE_TIME_ALL: &str = "Time spent on the queue all messages";
const QUEUE_TIME_REMOTE: &str = "Time spent on the queue messages with at least one remote delivery";
const RELAYED: &str = "Relayed messages";
const REJECTION_REASONS: &str = "Mail rejection reason count";
const SENDING_HOST_COUNT: &str = "Sending host count";
const SENDING_HOST_VOLUME: &str = "Sending host volume";
const LOCAL_SENDER_COUNT: &str = "Local sender count";
const LOCAL_SENDER_VOLUME: &str = "Local sender volume";
const HOST_DESTINATION_COUNT: &str = "Host destination count";
const HOST_DESTINATION_VOLUME: &str = "Host destination volume";
const LOCAL_DESTINATION_COUNT: &str = "Local destination count";
const LOCAL_DESTINATION_VOLUME: &str = "Local destination volume";
const REJECTED_IP_COUNT: &str = "Rejected ip count";

const fn rule(
    section: &'static str,
    metric: MetricDef,
    labels: &'static [LabelColumn],
    value_column: usize,
    quantity: Quantity,
) -> ExtractionRule {
    ExtractionRule { section, metric, row_key: None, labels, value_column, quantity }
}

const fn total(
    row_key: &'static str,
    metric: MetricDef,
    value_column: usize,
    quantity: Quantity,
) -> ExtractionRule {
    ExtractionRule {
        section: GRAND_TOTAL,
        metric,
        row_key: Some(row_key),
        labels: &[],
        value_column,
        quantity,
    }
}

/// Every metric read from the report, one rule each.
///
/// Top-50 rankings and per-hour tables are gauges: a label missing from this report really is gone.
/// Rejection reasons and rejected IPs are counted since the last log rotation and accumulate.
pub const RULES: &[ExtractionRule] = &[
    total(
        "Received",
        MetricDef::gauge("exim_messages_received", "Total messages received"),
        2,
        Quantity::Count,
    ),
    total(
        "Received",
        MetricDef::gauge("exim_volume_received_bytes", "Total volume received in bytes"),
        1,
        Quantity::Size,
    ),
    total(
        "Delivered",
        MetricDef::gauge("exim_messages_delivered", "Total messages delivered"),
        2,
        Quantity::Count,
    ),
    total(
        "Delivered",
        MetricDef::gauge("exim_volume_delivered_bytes", "Total volume delivered in bytes"),
        1,
        Quantity::Size,
    ),
    total(
        "Rejects",
        MetricDef::gauge("exim_messages_rejected", "Total messages rejected"),
        2,
        Quantity::Count,
    ),
    rule(
        TRANSPORT,
        MetricDef::gauge("exim_transport_volume_bytes", "Volume delivered by transport"),
        &[label("transport", 0)],
        1,
        Quantity::Size,
    ),
    rule(
        TRANSPORT,
        MetricDef::gauge("exim_transport_messages", "Messages delivered by transport"),
        &[label("transport", 0)],
        2,
        Quantity::Count,
    ),
    rule(
        RECEIVED_PER_HOUR,
        MetricDef::gauge("exim_messages_received_per_hour", "Messages received per hour"),
        &[label("hour", 0)],
        1,
        Quantity::Count,
    ),
    rule(
        DELIVERIES_PER_HOUR,
        MetricDef::gauge("exim_deliveries_per_hour", "Deliveries per hour"),
        &[label("hour", 0)],
        1,
        Quantity::Count,
    ),
    rule(
        QUEUE_TIME_ALL,
        MetricDef::gauge(
            "exim_queue_time_all_messages",
            "Time spent on the queue for all messages",
        ),
        &[bucket("time_range", 0)],
        1,
        Quantity::Count,
    ),
    rule(
        QUEUE_TIME_REMOTE,
        MetricDef::gauge(
            "exim_queue_time_remote_messages",
            "Time spent on the queue for messages with at least one remote delivery",
        ),
        &[bucket("time_range", 0)],
        1,
        Quantity::Count,
    ),
    rule(
        RELAYED,
        MetricDef::gauge("exim_relayed_messages", "Relayed messages"),
        &[label("from", 1), label("to", 2)],
        0,
        Quantity::Count,
    ),
    rule(
        REJECTION_REASONS,
        MetricDef::accumulator(
            "exim_rejection_reasons",
            "Mail rejection reasons by message count",
        ),
        &[label("reason", 1)],
        0,
        Quantity::Count,
    ),
    rule(
        SENDING_HOST_COUNT,
        MetricDef::gauge("exim_sending_hosts_message_count", "Sending hosts by message count"),
        &[label("host", 3)],
        0,
        Quantity::Count,
    ),
    rule(
        SENDING_HOST_VOLUME,
        MetricDef::gauge("exim_sending_hosts_volume_bytes", "Sending hosts by volume"),
        &[label("host", 3)],
        1,
        Quantity::Size,
    ),
    rule(
        LOCAL_SENDER_COUNT,
        MetricDef::gauge("exim_local_senders_message_count", "Local senders by message count"),
        &[label("sender", 3)],
        0,
        Quantity::Count,
    ),
    rule(
        LOCAL_SENDER_VOLUME,
        MetricDef::gauge("exim_local_senders_volume_bytes", "Local senders by volume"),
        &[label("sender", 3)],
        1,
        Quantity::Size,
    ),
    rule(
        HOST_DESTINATION_COUNT,
        MetricDef::gauge(
            "exim_host_destinations_message_count",
            "Host destinations by message count",
        ),
        &[label("host", 4)],
        0,
        Quantity::Count,
    ),
    rule(
        HOST_DESTINATION_VOLUME,
        MetricDef::gauge("exim_host_destinations_volume_bytes", "Host destinations by volume"),
        &[label("host", 4)],
        2,
        Quantity::Size,
    ),
    rule(
        LOCAL_DESTINATION_COUNT,
        MetricDef::gauge(
            "exim_local_destinations_message_count",
            "Local destinations by message count",
        ),
        &[label("destination", 4)],
        0,
        Quantity::Count,
    ),
    rule(
        LOCAL_DESTINATION_VOLUME,
        MetricDef::gauge("exim_local_destinations_volume_bytes", "Local destinations by volume"),
        &[label("destination", 4)],
        2,
        Quantity::Size,
    ),
    rule(
        REJECTED_IP_COUNT,
        MetricDef::accumulator("exim_rejected_ips_message_count", "Rejected IPs by message count"),
        &[label("ip", 1)],
        0,
        Quantity::Count,
    ),
];

/// The series one rule read from a present section.
#[derive(Debug, PartialEq)]
pub struct Observation {
    /// Anchor name of the section the series were read from.
    pub section: &'static str,
    /// Target metric.
    pub metric: MetricDef,
    /// Series read from the section; empty if the section listed nothing.
    pub values: Vec<LabeledValue>,
}

/// Everything read out of one report, fully built before anything touches the registry.
#[derive(Debug, Default, PartialEq)]
pub struct Extraction {
    /// One entry per rule whose section was present.
    pub observations: Vec<Observation>,
    /// Rows skipped because a cell did not fit its rule, plus sections whose anchor had no table.
    pub skipped: Vec<Error>,
    /// Sections not present in the report.
    pub absent: Vec<&'static str>,
}

/// Runs every rule in [`RULES`] over `report`.
///
/// A missing section produces no observation at all, which leaves its metrics untouched; a
/// present but empty section produces an observation with no values.
pub fn extract(report: &Report) -> Extraction {
    let mut extraction = Extraction::default();

    for rule in RULES {
        let Some(table) = report.table(rule.section) else {
            if report.is_dangling(rule.section) {
                let error = Error::MalformedSection {
                    section: rule.section.to_owned(),
                    reason: "anchor is not followed by a table".to_owned(),
                };
                if !extraction.skipped.contains(&error) {
                    extraction.skipped.push(error);
                }
            }
            if !extraction.absent.contains(&rule.section) {
                extraction.absent.push(rule.section);
            }
            continue;
        };

        let RuleOutput { values, skipped } = rule.extract(table);
        extraction.observations.push(Observation {
            section: rule.section,
            metric: rule.metric,
            values,
        });
        extraction.skipped.extend(skipped);
    }

    extraction
}
