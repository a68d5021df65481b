//! Turns eximstats reports and Exim queue listings into Prometheus metrics.
//!
//! A [`Poller`] periodically runs `eximstats -html`, `exim -bpc` and `exim -bp`, and feeds their
//! output through an [`EximRecorder`]:
//!
//! - the report is parsed into named tables ([`report`]),
//! - every section is mapped onto its metrics by a declarative rule ([`sections`]),
//! - the results are reconciled into a long-lived [`Registry`].
//!
//! Point-in-time sections (top-50 rankings, per-hour tables, the grand total) are
//! [gauges](MetricKind::Gauge): each report replaces their series outright, so a host that drops
//! out of a ranking disappears from the output. Rejection counts are
//! [accumulators](MetricKind::Accumulator): each report adds to the running totals, which never
//! decrease and are never evicted. A section missing from a report leaves its metrics untouched.
//!
//! [`EximExporterBuilder`] wires the pieces together and serves the registry over HTTP.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(broken_intra_doc_links))]
mod common;
pub use self::common::{BuildError, Error, LabelSet, LabeledValue, MetricKind, ReconcileError};

mod exporter;
pub use self::exporter::builder::EximExporterBuilder;
pub use self::exporter::ExporterFuture;

mod formatting;

mod poller;
pub use self::poller::{PollSummary, Poller};

pub mod queue;

mod recorder;
pub use self::recorder::{EximHandle, EximRecorder, ReportSummary};

mod registry;
pub use self::registry::{MetricSnapshot, Registry};

pub mod report;

pub mod sections;

pub mod source;

pub mod units;
