use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::common::BuildError;
use crate::poller::Poller;
use crate::recorder::EximRecorder;
use crate::source::CommandSource;

use super::ExporterFuture;

#[derive(Clone, Debug, Eq, PartialEq)]
struct CommandConfig {
    program: String,
    args: Vec<String>,
}

impl CommandConfig {
    fn new<P, I, A>(what: &'static str, program: P, args: I) -> Result<Self, BuildError>
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let program = program.into();
        if program.trim().is_empty() {
            return Err(BuildError::EmptyCommand(what));
        }
        Ok(Self { program, args: args.into_iter().map(Into::into).collect() })
    }

    fn to_source(&self, timeout: Duration) -> CommandSource {
        CommandSource::new(self.program.clone(), self.args.iter().cloned()).with_timeout(timeout)
    }
}

/// Builder for creating and installing the Exim exporter.
pub struct EximExporterBuilder {
    listen_address: SocketAddr,
    poll_interval: Duration,
    report_command: CommandConfig,
    queue_count_command: CommandConfig,
    queue_listing_command: CommandConfig,
    command_timeout: Duration,
    hostname: Option<String>,
}

impl EximExporterBuilder {
    /// Creates a new [`EximExporterBuilder`].
    pub fn new() -> Self {
        let command = |program: &str, args: &[&str]| CommandConfig {
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
        };

        Self {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8000),
            poll_interval: Poller::DEFAULT_INTERVAL,
            report_command: command("eximstats", &["-html", "/var/log/exim4/mainlog"]),
            queue_count_command: command("exim", &["-bpc"]),
            queue_listing_command: command("exim", &["-bp"]),
            command_timeout: CommandSource::DEFAULT_TIMEOUT,
            hostname: None,
        }
    }

    /// Configures the address the HTTP [scrape endpoint] listens on.
    ///
    /// The listener responds to GET requests on any path with the rendered metrics, except for
    /// `/health`, which answers `OK`.
    ///
    /// Defaults to `0.0.0.0:8000`.
    ///
    /// [scrape endpoint]: https://prometheus.io/docs/instrumenting/exposition_formats/#text-based-format
    #[must_use]
    pub fn with_http_listener(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.listen_address = addr.into();
        self
    }

    /// Same as [`with_http_listener`](Self::with_http_listener), parsing `addr` as `ip:port`.
    ///
    /// ## Errors
    ///
    /// If the address cannot be parsed, an error variant will be returned describing the error.
    pub fn with_listen_address<A>(self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let addr = addr
            .as_ref()
            .parse::<SocketAddr>()
            .map_err(|e| BuildError::InvalidListenAddress(format!("{}: {e}", addr.as_ref())))?;
        Ok(self.with_http_listener(addr))
    }

    /// Sets the time between the start of two poll cycles.
    ///
    /// Defaults to 60 seconds.
    ///
    /// ## Errors
    ///
    /// If the interval is zero, an error variant will be returned.
    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self, BuildError> {
        if interval.is_zero() {
            return Err(BuildError::ZeroPollInterval);
        }
        self.poll_interval = interval;
        Ok(self)
    }

    /// Sets the command producing the eximstats HTML report.
    ///
    /// Defaults to `eximstats -html /var/log/exim4/mainlog`.
    ///
    /// ## Errors
    ///
    /// If `program` is empty, an error variant will be returned.
    pub fn with_report_command<P, I, A>(mut self, program: P, args: I) -> Result<Self, BuildError>
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.report_command = CommandConfig::new("report", program, args)?;
        Ok(self)
    }

    /// Sets the command printing the number of queued messages.
    ///
    /// Defaults to `exim -bpc`.
    ///
    /// ## Errors
    ///
    /// If `program` is empty, an error variant will be returned.
    pub fn with_queue_count_command<P, I, A>(
        mut self,
        program: P,
        args: I,
    ) -> Result<Self, BuildError>
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.queue_count_command = CommandConfig::new("queue count", program, args)?;
        Ok(self)
    }

    /// Sets the command listing queued messages.
    ///
    /// Defaults to `exim -bp`.
    ///
    /// ## Errors
    ///
    /// If `program` is empty, an error variant will be returned.
    pub fn with_queue_listing_command<P, I, A>(
        mut self,
        program: P,
        args: I,
    ) -> Result<Self, BuildError>
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.queue_listing_command = CommandConfig::new("queue listing", program, args)?;
        Ok(self)
    }

    /// Sets how long each command may run before it is killed and its slice skipped.
    ///
    /// Defaults to 30 seconds.
    ///
    /// ## Errors
    ///
    /// If the timeout is zero, an error variant will be returned.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Result<Self, BuildError> {
        if timeout.is_zero() {
            return Err(BuildError::ZeroCommandTimeout);
        }
        self.command_timeout = timeout;
        Ok(self)
    }

    /// Sets the value of the `hostname` label on per-sender queue metrics.
    ///
    /// Defaults to the host name of the system, or `localhost` if it cannot be determined.
    #[must_use]
    pub fn with_hostname<H: Into<String>>(mut self, hostname: H) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Builds the poller and the HTTP listener, and installs the listener.
    ///
    /// When called from within a Tokio runtime, the listener future is spawned directly into the
    /// runtime. Otherwise, a new single-threaded Tokio runtime is created on a background thread,
    /// and the listener is spawned there.
    ///
    /// The returned [`Poller`] still has to be run by the caller.
    ///
    /// ## Errors
    ///
    /// If there is an error while either building the listener or spawning its runtime, an error
    /// variant will be returned describing the error.
    pub fn install(self) -> Result<Poller, BuildError> {
        use tokio::runtime;

        let listen_address = self.listen_address;
        let poller = if let Ok(handle) = runtime::Handle::try_current() {
            let (poller, exporter) = self.build()?;
            handle.spawn(log_exit(exporter));

            poller
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            let (poller, exporter) = self.build()?;

            thread::Builder::new()
                .name("exim-exporter-http-listener".to_owned())
                .spawn(move || runtime.block_on(log_exit(exporter)))
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            poller
        };

        info!(address = %listen_address, "serving metrics");
        Ok(poller)
    }

    /// Builds the poller and a future running the HTTP listener.
    ///
    /// The listener is bound immediately; the future must be awaited on a Tokio runtime.
    ///
    /// ## Errors
    ///
    /// If the listen address cannot be bound, an error variant will be returned describing the
    /// error.
    pub fn build(self) -> Result<(Poller, ExporterFuture), BuildError> {
        let listen_address = self.listen_address;
        let poller = self.build_poller();
        let exporter = super::http_listener::new_http_listener(poller.handle(), listen_address)?;

        Ok((poller, exporter))
    }

    /// Builds the poller without any listener.
    ///
    /// Metrics can still be read through [`Poller::handle`].
    pub fn build_poller(self) -> Poller {
        let hostname = self.hostname.unwrap_or_else(detect_hostname);
        let recorder = EximRecorder::new(hostname);

        Poller::new(
            recorder,
            self.report_command.to_source(self.command_timeout),
            self.queue_count_command.to_source(self.command_timeout),
            self.queue_listing_command.to_source(self.command_timeout),
        )
        .with_interval(self.poll_interval)
    }
}

impl Default for EximExporterBuilder {
    fn default() -> Self {
        EximExporterBuilder::new()
    }
}

async fn log_exit(exporter: ExporterFuture) {
    if let Err(e) = exporter.await {
        error!(error = %e, "HTTP listener stopped");
    }
}

fn detect_hostname() -> String {
    let non_empty = |name: String| {
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_owned())
    };

    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .and_then(non_empty)
        .or_else(|| std::env::var("HOSTNAME").ok().and_then(non_empty))
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::{detect_hostname, CommandConfig, EximExporterBuilder};
    use crate::common::BuildError;

    #[test]
    fn defaults() {
        let builder = EximExporterBuilder::new();
        assert_eq!(builder.listen_address, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(builder.poll_interval, Duration::from_secs(60));
        assert_eq!(builder.command_timeout, Duration::from_secs(30));
        assert_eq!(
            builder.report_command,
            CommandConfig::new("report", "eximstats", ["-html", "/var/log/exim4/mainlog"]).unwrap()
        );
        assert_eq!(builder.queue_count_command.args, vec!["-bpc".to_owned()]);
        assert_eq!(builder.queue_listing_command.args, vec!["-bp".to_owned()]);
        assert_eq!(builder.hostname, None);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(matches!(
            EximExporterBuilder::new().with_listen_address("localhost"),
            Err(BuildError::InvalidListenAddress(_))
        ));
        assert!(matches!(
            EximExporterBuilder::new().with_poll_interval(Duration::ZERO),
            Err(BuildError::ZeroPollInterval)
        ));
        assert!(matches!(
            EximExporterBuilder::new().with_command_timeout(Duration::ZERO),
            Err(BuildError::ZeroCommandTimeout)
        ));
        assert!(matches!(
            EximExporterBuilder::new().with_queue_count_command(" ", ["-bpc"]),
            Err(BuildError::EmptyCommand("queue count"))
        ));
    }

    #[test]
    fn build_poller_applies_settings() {
        let poller = EximExporterBuilder::new()
            .with_hostname("mx1.example.org")
            .with_poll_interval(Duration::from_secs(15))
            .and_then(|builder| builder.with_command_timeout(Duration::from_millis(1)))
            .unwrap()
            .build_poller();

        assert_eq!(poller.interval(), Duration::from_secs(15));
        assert_eq!(poller.handle().hostname(), "mx1.example.org");
    }

    #[test]
    fn build_binds_listener() {
        let result = EximExporterBuilder::new()
            .with_listen_address("127.0.0.1:0")
            .and_then(EximExporterBuilder::build);
        assert!(result.is_ok());
    }

    #[test]
    fn detected_hostname_is_never_empty() {
        assert!(!detect_hostname().is_empty());
    }
}
