use std::net::SocketAddr;

use http_body_util::Full;
use hyper::{
    body::{self, Bytes},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1::Builder as HyperHttpBuilder,
    service::service_fn,
    Request, Response,
};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::{common::BuildError, EximHandle, ExporterFuture};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

struct HttpListeningExporter {
    handle: EximHandle,
}

impl HttpListeningExporter {
    async fn serve(&self, listener: std::net::TcpListener) -> Result<(), std::io::Error> {
        let listener = TcpListener::from_std(listener)?;

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Error accepting connection. Ignoring request. Error: {:?}", e);
                    continue;
                }
            };

            self.process_stream(stream);
        }
    }

    fn process_stream(&self, stream: TcpStream) {
        let handle = self.handle.clone();
        let service = service_fn(move |req: Request<body::Incoming>| {
            let handle = handle.clone();
            async move { Ok::<_, hyper::Error>(Self::handle_http_request(&handle, req.uri().path())) }
        });

        tokio::task::spawn(async move {
            if let Err(err) =
                HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await
            {
                warn!("Error serving connection.  Error: {:?}", err);
            };
        });
    }

    fn handle_http_request(handle: &EximHandle, path: &str) -> Response<Full<Bytes>> {
        debug!(path, "scrape request");
        match path {
            "/health" => Response::new("OK".into()),
            _ => {
                let mut response = Response::new(handle.render().into());
                response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                response
            }
        }
    }
}

/// Creates an `ExporterFuture` implementing a http listener that serves the rendered metrics.
///
/// # Errors
/// Will return Err if it cannot bind to the listen address
pub(crate) fn new_http_listener(
    handle: EximHandle,
    listen_address: SocketAddr,
) -> Result<ExporterFuture, BuildError> {
    let listener = std::net::TcpListener::bind(listen_address)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(|e| BuildError::FailedToCreateHTTPListener(e.to_string()))?;

    let exporter = HttpListeningExporter { handle };

    Ok(Box::pin(async move { exporter.serve(listener).await }))
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use hyper::header::CONTENT_TYPE;

    use crate::exporter::http_listener::HttpListeningExporter;
    use crate::EximRecorder;

    fn body_text(response: hyper::Response<http_body_util::Full<hyper::body::Bytes>>) -> String {
        let body = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap_or_else(|e| panic!("failed to create test runtime: {e:?}"))
            .block_on(response.into_body().collect())
            .unwrap_or_else(|e| match e {});
        String::from_utf8(body.to_bytes().to_vec()).expect("body should be UTF-8")
    }

    #[test]
    fn health_answers_ok() {
        let recorder = EximRecorder::new("mx1");
        let response = HttpListeningExporter::handle_http_request(&recorder.handle(), "/health");
        assert!(response.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(body_text(response), "OK");
    }

    #[test]
    fn any_other_path_renders_metrics() {
        let recorder = EximRecorder::new("mx1");
        recorder.ingest_queue_count(4);

        for path in ["/", "/metrics", "/anything"] {
            let response = HttpListeningExporter::handle_http_request(&recorder.handle(), path);
            assert_eq!(
                response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
                Some("text/plain; version=0.0.4")
            );
            assert!(body_text(response).contains("exim_queue_count 4\n"));
        }
    }
}
