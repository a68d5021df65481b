use std::future::Future;
use std::pin::Pin;

/// Convenience type for Future implementing an exporter.
///
/// Resolves only if the listener itself fails; errors on individual connections are logged and
/// never end it.
pub type ExporterFuture = Pin<Box<dyn Future<Output = Result<(), std::io::Error>> + Send + 'static>>;

mod http_listener;

pub(crate) mod builder;
