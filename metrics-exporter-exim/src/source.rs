//! Where raw report and queue text comes from.
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::common::Error;

/// Convenience type for the future returned by [`Source::fetch`].
pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<String, Error>> + Send + 'a>>;

/// A producer of raw text, polled once per cycle.
pub trait Source: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Produces the current text.
    ///
    /// Failures are reported as [`Error::SourceUnavailable`]; the caller skips that cycle's
    /// update for whatever this source feeds.
    fn fetch(&self) -> SourceFuture<'_>;
}

/// Runs an external program and returns its standard output.
#[derive(Clone, Debug)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    /// Default bound on how long the program may run.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a source running `program` with `args`.
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets how long the program may run before it is killed.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The program being run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn unavailable(&self, reason: impl Into<String>) -> Error {
        Error::SourceUnavailable { source_name: self.program.clone(), reason: reason.into() }
    }

    async fn run(&self) -> Result<String, Error> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unavailable(format!("failed to spawn: {e}")))?;

        // Dropping the `wait_with_output` future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| self.unavailable(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.unavailable(format!("failed to read output: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(self.unavailable(if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                format!("exited with {}: {stderr}", output.status)
            }));
        }

        debug!(source = %self.program, bytes = output.stdout.len(), "command finished");

        // Mainlogs carry raw 8-bit bytes; a bad byte costs one cell, not the whole output.
        Ok(match String::from_utf8(output.stdout) {
            Ok(text) => text,
            Err(e) => {
                debug!(source = %self.program, "output is not valid UTF-8, replacing bad bytes");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        })
    }
}

impl Source for CommandSource {
    fn name(&self) -> &str {
        &self.program
    }

    fn fetch(&self) -> SourceFuture<'_> {
        Box::pin(self.run())
    }
}

/// Returns the same text, or the same failure, on every fetch.
#[derive(Clone, Debug)]
pub struct StaticSource {
    name: String,
    result: Result<String, String>,
}

impl StaticSource {
    /// Creates a source that always returns `text`.
    pub fn new<N, T>(name: N, text: T) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self { name: name.into(), result: Ok(text.into()) }
    }

    /// Creates a source that always fails with `reason`.
    pub fn unavailable<N, R>(name: N, reason: R) -> Self
    where
        N: Into<String>,
        R: Into<String>,
    {
        Self { name: name.into(), result: Err(reason.into()) }
    }
}

impl Source for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> SourceFuture<'_> {
        let result = self.result.clone().map_err(|reason| Error::SourceUnavailable {
            source_name: self.name.clone(),
            reason,
        });
        Box::pin(async move { result })
    }
}
