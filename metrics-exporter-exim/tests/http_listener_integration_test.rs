mod http_listener_test {
    use http_body_util::{BodyExt, Collected, Empty};
    use hyper::{
        body::{Buf, Bytes},
        header::CONTENT_TYPE,
        Request, StatusCode, Uri,
    };
    use hyper_util::client::legacy::{connect::HttpConnector, Client};
    use metrics_exporter_exim::EximExporterBuilder;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/eximstats.html");

    #[test]
    fn test_http_listener() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap_or_else(|e| panic!("Failed to create test runtime: {:?}", e));

        runtime.block_on(async {
            let local = [127, 0, 0, 1];
            let port = get_available_port(local).await;
            let socket_address = SocketAddr::from((local, port));

            let (poller, exporter) = EximExporterBuilder::new()
                .with_http_listener(socket_address)
                .with_hostname("mx1")
                .with_report_command("cat", [FIXTURE])
                .and_then(|b| b.with_queue_count_command("sh", ["-c", "echo 2"]))
                .and_then(|b| {
                    b.with_queue_listing_command(
                        "sh",
                        ["-c", "printf '1h a alice@example.com\\n2h b bob@example.com\\n'"],
                    )
                })
                .and_then(EximExporterBuilder::build)
                .unwrap_or_else(|e| panic!("failed to create poller and http listener: {:?}", e));

            let summary = poller.poll_once().await;
            assert!(summary.failed_sources.is_empty(), "failed: {:?}", summary.failed_sources);

            runtime_spawn(exporter);
            tokio::time::sleep(Duration::from_millis(200)).await;

            let uri = format!("http://{socket_address}/metrics")
                .parse::<Uri>()
                .unwrap_or_else(|e| panic!("Error parsing URI: {:?}", e));

            let (status, body, content_type) = read_from(uri).await;
            let body = String::from_utf8(body).unwrap();

            assert_eq!(status, StatusCode::OK);
            assert_eq!(content_type, "text/plain; version=0.0.4");
            assert!(body.contains("# TYPE exim_messages_received gauge\nexim_messages_received 500\n"));
            assert!(body.contains("exim_volume_received_bytes 12582912\n"));
            assert!(body.contains("# TYPE exim_rejection_reasons_total counter\n"));
            assert!(body.contains("exim_rejection_reasons_total{reason=\"relay not permitted\"} 12\n"));
            assert!(body.contains(
                "exim_relayed_messages{from=\"mail.a.example [192.0.2.10]\",to=\"mx.b.example [198.51.100.7]\"} 3\n"
            ));
            assert!(body.contains("exim_queue_count 2\n"));
            assert!(body.contains("exim_email_count{email=\"bob@example.com\",hostname=\"mx1\"} 1\n"));

            let health = format!("http://{socket_address}/health")
                .parse::<Uri>()
                .unwrap_or_else(|e| panic!("Error parsing URI: {:?}", e));
            let (status, body, _) = read_from(health).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"OK");
        });
    }

    fn runtime_spawn(exporter: metrics_exporter_exim::ExporterFuture) {
        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                panic!("listener failed: {e:?}");
            }
        });
    }

    async fn get_available_port(listen_address: [u8; 4]) -> u16 {
        let socket_address = SocketAddr::from((listen_address, 0));
        TcpListener::bind(socket_address)
            .await
            .unwrap_or_else(|e| {
                panic!("Unable to bind to an available port on address {socket_address}: {:?}", e);
            })
            .local_addr()
            .expect("Unable to obtain local address from TcpListener")
            .port()
    }

    async fn read_from(endpoint: Uri) -> (StatusCode, Vec<u8>, String) {
        let client =
            Client::builder(hyper_util::rt::TokioExecutor::new()).build(HttpConnector::new());

        let req = Request::builder()
            .uri(endpoint.to_string())
            .body(Empty::<Bytes>::new())
            .unwrap_or_else(|e| panic!("Failed building request: {:?}", e));

        let response = client
            .request(req)
            .await
            .unwrap_or_else(|e| panic!("Failed requesting data from {endpoint}: {:?}", e));

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut body = response
            .into_body()
            .collect()
            .await
            .map(Collected::aggregate)
            .unwrap_or_else(|e| panic!("Error reading response: {:?}", e));

        let body_bytes = body.copy_to_bytes(body.remaining()).to_vec();

        (status, body_bytes, content_type)
    }
}
