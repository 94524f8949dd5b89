use api::{MetricsExporter, MetricsRecorder};
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_exporter_serves_and_stops() {
    let recorder = MetricsRecorder::new().unwrap();
    recorder.record_request("POST", "/predict");
    recorder.observe_latency("/predict", 0.042);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let exporter = MetricsExporter::with_listener(listener, recorder.clone());
    assert!(exporter.is_running());

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let content_type = response.headers()[reqwest::header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let text = response.text().await.unwrap();
    assert!(text.contains(r#"request_count_total{endpoint="/predict",method="POST"} 1"#));
    assert!(text.contains(r#"request_latency_seconds_sum{endpoint="/predict"} 0.042"#));

    // Later requests are visible on the next scrape.
    recorder.record_request("POST", "/predict");
    let text = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains(r#"request_count_total{endpoint="/predict",method="POST"} 2"#));

    tokio::time::timeout(Duration::from_secs(5), exporter.stop())
        .await
        .expect("exporter did not stop");

    assert!(reqwest::get(format!("http://{addr}/metrics")).await.is_err());
}

#[tokio::test]
async fn test_exporter_bind_failure_is_not_fatal() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();

    let exporter = MetricsExporter::start(addr.to_string(), MetricsRecorder::new().unwrap());

    tokio::time::timeout(Duration::from_secs(5), exporter.stop())
        .await
        .expect("exporter did not stop");
}
