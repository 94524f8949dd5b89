use api::TrackingConfig;
use api::tracking::{MlflowClient, RunRecord};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use inference::Detection;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const EXPERIMENT_ID: &str = "7";
const RUN_ID: &str = "run-1";

/// In-process stand-in for an MLflow tracking server.
#[derive(Clone, Default)]
struct MockMlflow {
    experiment_exists: Arc<Mutex<bool>>,
    log_batch_unavailable: Arc<Mutex<bool>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockMlflow {
    fn existing() -> Self {
        let mock = Self::default();
        *mock.experiment_exists.lock().unwrap() = true;
        mock
    }

    fn push(&self, call: &str, body: Value) {
        self.calls.lock().unwrap().push((call.to_string(), body));
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }

    fn body(&self, call: &str) -> Value {
        self.calls()
            .into_iter()
            .find(|(name, _)| name == call)
            .map(|(_, body)| body)
            .unwrap_or_else(|| panic!("{call} was never called"))
    }

    async fn serve(self) -> SocketAddr {
        let app = Router::new()
            .route("/api/2.0/mlflow/experiments/get-by-name", get(get_by_name))
            .route("/api/2.0/mlflow/experiments/create", post(create_experiment))
            .route("/api/2.0/mlflow/runs/create", post(create_run))
            .route("/api/2.0/mlflow/runs/log-batch", post(log_batch))
            .route("/api/2.0/mlflow/runs/update", post(update_run))
            .route("/api/2.0/mlflow-artifacts/artifacts/*path", put(upload))
            .with_state(self);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

async fn get_by_name(
    State(mock): State<MockMlflow>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    mock.push("get-by-name", json!(query));
    if *mock.experiment_exists.lock().unwrap() {
        Json(json!({ "experiment": { "experiment_id": EXPERIMENT_ID, "name": query["experiment_name"] } }))
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error_code": "RESOURCE_DOES_NOT_EXIST" })),
        )
            .into_response()
    }
}

async fn create_experiment(State(mock): State<MockMlflow>, Json(body): Json<Value>) -> Json<Value> {
    mock.push("experiments/create", body);
    *mock.experiment_exists.lock().unwrap() = true;
    Json(json!({ "experiment_id": EXPERIMENT_ID }))
}

async fn create_run(State(mock): State<MockMlflow>, Json(body): Json<Value>) -> Json<Value> {
    mock.push("runs/create", body);
    Json(json!({
        "run": {
            "info": {
                "run_id": RUN_ID,
                "experiment_id": EXPERIMENT_ID,
                "artifact_uri": format!("mlflow-artifacts:/{EXPERIMENT_ID}/{RUN_ID}/artifacts"),
            }
        }
    }))
}

async fn log_batch(State(mock): State<MockMlflow>, Json(body): Json<Value>) -> Response {
    mock.push("runs/log-batch", body);
    if *mock.log_batch_unavailable.lock().unwrap() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error_code": "TEMPORARILY_UNAVAILABLE" })),
        )
            .into_response();
    }
    Json(json!({})).into_response()
}

async fn update_run(State(mock): State<MockMlflow>, Json(body): Json<Value>) -> Json<Value> {
    mock.push("runs/update", body);
    Json(json!({ "run_info": { "run_id": RUN_ID } }))
}

async fn upload(
    State(mock): State<MockMlflow>,
    Path(path): Path<String>,
    body: Bytes,
) -> Json<Value> {
    let contents = String::from_utf8_lossy(&body).to_string();
    mock.push("artifact", json!({ "path": path, "contents": contents }));
    Json(json!({}))
}

fn client(addr: SocketAddr) -> MlflowClient {
    MlflowClient::new(&TrackingConfig::new(format!("http://{addr}"), "detections")).unwrap()
}

fn detection() -> Detection {
    Detection {
        xmin: 1.0,
        ymin: 2.0,
        xmax: 3.0,
        ymax: 4.0,
        confidence: 0.9,
        class_id: 0,
        label: "person".to_string(),
    }
}

#[tokio::test]
async fn test_successful_run_is_fully_logged() {
    let mock = MockMlflow::default();
    let addr = mock.clone().serve().await;

    let run = RunRecord::prediction("/predict", Some("cat.png"), 0.25, &[detection()], Utc::now());
    let run_id = client(addr).log_run(&run).await.unwrap();
    assert_eq!(run_id, RUN_ID);

    assert_eq!(
        mock.names(),
        vec![
            "get-by-name",
            "experiments/create",
            "runs/create",
            "runs/log-batch",
            "artifact",
            "runs/update",
        ]
    );

    assert_eq!(mock.body("get-by-name")["experiment_name"], "detections");
    assert_eq!(mock.body("experiments/create")["name"], "detections");

    let create = mock.body("runs/create");
    assert_eq!(create["experiment_id"], EXPERIMENT_ID);
    assert_eq!(create["tags"], json!([{ "key": "endpoint", "value": "/predict" }]));
    assert!(create["start_time"].as_i64().unwrap() > 0);

    let batch = mock.body("runs/log-batch");
    assert_eq!(batch["run_id"], RUN_ID);
    assert_eq!(batch["params"], json!([{ "key": "filename", "value": "cat.png" }]));
    let metrics = batch["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0]["key"], "response_time");
    assert_eq!(metrics[0]["value"], 0.25);
    assert_eq!(metrics[1]["key"], "detections");
    assert_eq!(metrics[1]["value"], 1.0);

    let artifact = mock.body("artifact");
    assert_eq!(artifact["path"], "7/run-1/artifacts/results.txt");
    let logged: Vec<Detection> =
        serde_json::from_str(artifact["contents"].as_str().unwrap()).unwrap();
    assert_eq!(logged, vec![detection()]);

    let update = mock.body("runs/update");
    assert_eq!(update["run_id"], RUN_ID);
    assert_eq!(update["status"], "FINISHED");
    assert!(update["end_time"].as_i64().unwrap() >= create["start_time"].as_i64().unwrap());
}

#[tokio::test]
async fn test_failed_run_skips_artifact() {
    let mock = MockMlflow::existing();
    let addr = mock.clone().serve().await;

    let run = RunRecord::failure("/predict", None, 0.01, "cannot identify image file", Utc::now());
    client(addr).log_run(&run).await.unwrap();

    assert_eq!(
        mock.names(),
        vec!["get-by-name", "runs/create", "runs/log-batch", "runs/update"]
    );
    assert_eq!(
        mock.body("runs/create")["tags"],
        json!([
            { "key": "endpoint", "value": "/predict" },
            { "key": "error", "value": "cannot identify image file" },
        ])
    );
    assert_eq!(mock.body("runs/update")["status"], "FAILED");
}

#[tokio::test]
async fn test_run_is_closed_as_failed_when_logging_breaks() {
    let mock = MockMlflow::existing();
    *mock.log_batch_unavailable.lock().unwrap() = true;
    let addr = mock.clone().serve().await;

    let run = RunRecord::prediction("/predict", Some("cat.png"), 0.25, &[detection()], Utc::now());
    let err = client(addr).log_run(&run).await.unwrap_err();
    assert!(format!("{err:#}").contains("runs/log-batch"), "{err:#}");

    assert_eq!(
        mock.names(),
        vec!["get-by-name", "runs/create", "runs/log-batch", "runs/update"]
    );
    let update = mock.body("runs/update");
    assert_eq!(update["run_id"], RUN_ID);
    assert_eq!(update["status"], "FAILED");
    assert!(update["end_time"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_experiment_id_is_resolved_once() {
    let mock = MockMlflow::existing();
    let addr = mock.clone().serve().await;
    let client = client(addr);

    for _ in 0..3 {
        let run = RunRecord::prediction("/predict", Some("a.png"), 0.1, &[], Utc::now());
        client.log_run(&run).await.unwrap();
    }

    let names = mock.names();
    assert_eq!(names.iter().filter(|n| *n == "get-by-name").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "experiments/create").count(), 0);
    assert_eq!(names.iter().filter(|n| *n == "runs/create").count(), 3);
}

#[tokio::test]
async fn test_unreachable_server_is_an_error() {
    let mut config = TrackingConfig::new("http://127.0.0.1:1", "Default");
    config.timeout_ms = 500;
    let client = MlflowClient::new(&config).unwrap();

    let run = RunRecord::prediction("/predict", None, 0.1, &[], Utc::now());
    assert!(client.log_run(&run).await.is_err());
}
