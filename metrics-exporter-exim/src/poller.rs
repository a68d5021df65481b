use std::future::Future;
use std::time::Duration;

use quanta::Clock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::queue::parse_queue_count;
use crate::recorder::{EximHandle, EximRecorder, ReportSummary};
use crate::report::Report;
use crate::sections::extract;
use crate::source::Source;

/// Outcome of one poll cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollSummary {
    /// What the report contributed, if one was fetched.
    pub report: Option<ReportSummary>,
    /// Queue size, if it could be read.
    pub queue_count: Option<u64>,
    /// Distinct senders in the queue, if the listing could be read.
    pub senders: Option<usize>,
    /// Names of the sources whose slice was not updated this cycle.
    pub failed_sources: Vec<String>,
    /// Wall time spent on the cycle.
    pub elapsed: Duration,
}

/// Periodically fetches the report and queue state and feeds them to an [`EximRecorder`].
pub struct Poller {
    recorder: EximRecorder,
    report: Box<dyn Source>,
    queue_count: Box<dyn Source>,
    queue_listing: Box<dyn Source>,
    interval: Duration,
    clock: Clock,
}

impl Poller {
    /// Default time between the start of two cycles.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    /// Creates a poller over the given sources.
    pub fn new<R, C, L>(recorder: EximRecorder, report: R, queue_count: C, queue_listing: L) -> Self
    where
        R: Source + 'static,
        C: Source + 'static,
        L: Source + 'static,
    {
        Self {
            recorder,
            report: Box::new(report),
            queue_count: Box::new(queue_count),
            queue_listing: Box::new(queue_listing),
            interval: Self::DEFAULT_INTERVAL,
            clock: Clock::new(),
        }
    }

    /// Sets the time between the start of two cycles.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the clock used to time cycles.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Time between the start of two cycles.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Gets an [`EximHandle`] to the recorder being fed.
    pub fn handle(&self) -> EximHandle {
        self.recorder.handle()
    }

    /// Runs one cycle.
    ///
    /// Each slice of data is updated only if its source succeeded; a failed source leaves its
    /// metrics at their last known values. Each slice is fully fetched and extracted before it
    /// touches the registry, so dropping this future part way through never leaves a slice half
    /// applied.
    pub async fn poll_once(&self) -> PollSummary {
        let start = self.clock.now();
        let mut summary = PollSummary::default();

        match self.report.fetch().await {
            Ok(raw) if raw.trim().is_empty() => {
                warn!(source = self.report.name(), "report is empty, skipping extraction");
                summary.failed_sources.push(self.report.name().to_owned());
            }
            Ok(raw) => {
                let extraction = extract(&Report::parse(&raw));
                summary.report = Some(self.recorder.ingest_extraction(extraction));
            }
            Err(e) => {
                warn!(source = self.report.name(), error = %e, "failed to fetch report");
                summary.failed_sources.push(self.report.name().to_owned());
            }
        }

        match self.queue_count.fetch().await.and_then(|output| parse_queue_count(&output)) {
            Ok(total_count) => {
                self.recorder.ingest_queue_count(total_count);
                summary.queue_count = Some(total_count);
            }
            Err(e) => {
                warn!(source = self.queue_count.name(), error = %e, "failed to read queue count");
                summary.failed_sources.push(self.queue_count.name().to_owned());
            }
        }

        match self.queue_listing.fetch().await {
            Ok(listing) => summary.senders = Some(self.recorder.ingest_queue_listing(&listing)),
            Err(e) => {
                warn!(source = self.queue_listing.name(), error = %e, "failed to read queue listing");
                summary.failed_sources.push(self.queue_listing.name().to_owned());
            }
        }

        summary.elapsed = self.clock.now().duration_since(start);
        summary
    }

    /// Polls on the configured interval until `shutdown` resolves.
    ///
    /// The first cycle starts immediately. A cycle that overruns the interval delays the next one
    /// rather than triggering a burst. If `shutdown` resolves mid-cycle, the cycle is dropped.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval = ?self.interval, "starting poller");
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                summary = async {
                    interval.tick().await;
                    self.poll_once().await
                } => {
                    debug!(?summary, "poll cycle finished");
                    if let Some(report) = &summary.report {
                        info!(
                            sections = report.sections,
                            series = report.series,
                            skipped = report.skipped,
                            failed = summary.failed_sources.len(),
                            elapsed = ?summary.elapsed,
                            "poll cycle finished"
                        );
                    }
                }
            }
        }
        info!("poller stopped");
    }
}
