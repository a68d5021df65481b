use std::sync::Arc;

use tracing::{debug, warn};

use crate::common::LabeledValue;
use crate::queue::{
    count_observation, count_senders, sender_observation, QueueSnapshot, EMAIL_COUNT, QUEUE_COUNT,
};
use crate::registry::{MetricSnapshot, Registry};
use crate::report::Report;
use crate::sections::{extract, Extraction, MetricDef, RULES};

pub(crate) struct Inner {
    pub registry: Registry,
    pub hostname: String,
}

impl Inner {
    fn apply(&self, metric: &MetricDef, values: Vec<LabeledValue>) {
        if let Err(e) = self.registry.reconcile(metric.name, metric.kind, values) {
            warn!(metric = metric.name, error = %e, "failed to reconcile metric");
        }
    }
}

/// What one report contributed to the registry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReportSummary {
    /// Sections that were present and reconciled.
    pub sections: usize,
    /// Series observed across all sections.
    pub series: usize,
    /// Rows and sections skipped because they could not be read.
    pub skipped: usize,
}

/// Feeds eximstats reports and queue state into the registry.
///
/// Every ingest is a pure function of its input plus the current registry contents: nothing is
/// fetched here, and nothing is retained apart from the reconciled metrics.
pub struct EximRecorder {
    inner: Arc<Inner>,
}

impl EximRecorder {
    /// Creates a recorder with an empty registry.
    ///
    /// `hostname` labels the per-sender queue series.
    pub fn new<H: Into<String>>(hostname: H) -> Self {
        let registry = Registry::new();
        for metric in RULES.iter().map(|rule| &rule.metric).chain([&QUEUE_COUNT, &EMAIL_COUNT]) {
            registry.describe(metric.name, metric.help);
        }

        Self { inner: Arc::new(Inner { registry, hostname: hostname.into() }) }
    }

    /// Gets an [`EximHandle`] to this recorder.
    pub fn handle(&self) -> EximHandle {
        EximHandle { inner: self.inner.clone() }
    }

    /// Parses a raw `eximstats -html` report and reconciles every section it contains.
    pub fn ingest_report(&self, raw: &str) -> ReportSummary {
        self.ingest_extraction(extract(&Report::parse(raw)))
    }

    /// Reconciles an already extracted report.
    ///
    /// Sections missing from the report are left exactly as they were.
    pub fn ingest_extraction(&self, extraction: Extraction) -> ReportSummary {
        let Extraction { observations, skipped, absent } = extraction;

        for section in &absent {
            debug!(section, "section absent from report, leaving its metrics untouched");
        }
        for error in &skipped {
            warn!(error = %error, "skipped unreadable report data");
        }

        let mut summary = ReportSummary { skipped: skipped.len(), ..Default::default() };
        let mut sections = Vec::new();
        for observation in observations {
            summary.series += observation.values.len();
            if !sections.contains(&observation.section) {
                sections.push(observation.section);
            }
            self.inner.apply(&observation.metric, observation.values);
        }
        summary.sections = sections.len();

        summary
    }

    /// Replaces the total queue size.
    pub fn ingest_queue_count(&self, total_count: u64) {
        self.inner.apply(&QUEUE_COUNT, count_observation(total_count));
    }

    /// Replaces the per-sender queue counts with those found in an `exim -bp` listing.
    ///
    /// Returns the number of distinct senders.
    pub fn ingest_queue_listing(&self, listing: &str) -> usize {
        let per_sender = count_senders(listing);
        self.inner.apply(&EMAIL_COUNT, sender_observation(&per_sender, &self.inner.hostname));
        per_sender.len()
    }

    /// Replaces both queue slices at once.
    pub fn ingest_queue(&self, snapshot: &QueueSnapshot) {
        self.ingest_queue_count(snapshot.total_count);
        self.inner.apply(
            &EMAIL_COUNT,
            sender_observation(&snapshot.per_sender, &self.inner.hostname),
        );
    }
}

/// Handle for accessing metrics stored via [`EximRecorder`].
///
/// Cheap to clone; every clone sees the same registry.
#[derive(Clone)]
pub struct EximHandle {
    inner: Arc<Inner>,
}

impl EximHandle {
    /// Takes a snapshot of the metrics held by the recorder and generates a payload conforming to
    /// the Prometheus exposition format.
    pub fn render(&self) -> String {
        self.inner.registry.render()
    }

    /// Gets the current state of one metric.
    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        self.inner.registry.get(name)
    }

    /// Host name used for the `hostname` label.
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }
}
