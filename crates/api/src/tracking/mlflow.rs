//! Minimal MLflow REST client (API 2.0): just enough to log one run per
//! request with tags, params, metrics and a text artifact.

use super::{ExperimentSink, RunRecord, RunStatus, TextArtifact};
use crate::config::TrackingConfig;
use anyhow::Context;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

const API_PREFIX: &str = "api/2.0/mlflow";
const ARTIFACTS_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts";
const PROXIED_ARTIFACT_SCHEME: &str = "mlflow-artifacts:";

#[derive(Serialize)]
struct Tag<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct Metric<'a> {
    key: &'a str,
    value: f64,
    timestamp: i64,
    step: i64,
}

#[derive(Serialize)]
struct CreateExperiment<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Serialize)]
struct CreateRun<'a> {
    experiment_id: &'a str,
    start_time: i64,
    tags: Vec<Tag<'a>>,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: Run,
}

#[derive(Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    artifact_uri: Option<String>,
}

#[derive(Serialize)]
struct LogBatch<'a> {
    run_id: &'a str,
    metrics: Vec<Metric<'a>>,
    params: Vec<Tag<'a>>,
    tags: Vec<Tag<'a>>,
}

#[derive(Serialize)]
struct UpdateRun<'a> {
    run_id: &'a str,
    status: &'a str,
    end_time: i64,
}

/// Ignores whatever JSON body the endpoint returns.
#[derive(Deserialize)]
struct Empty {}

pub struct MlflowClient {
    http: Client,
    base_url: Url,
    experiment_name: String,
    experiment_id: OnceCell<String>,
}

impl MlflowClient {
    pub fn new(config: &TrackingConfig) -> anyhow::Result<Self> {
        let mut base = config.uri.trim_end_matches('/').to_string();
        base.push('/');
        let base_url =
            Url::parse(&base).with_context(|| format!("invalid tracking URI {:?}", config.uri))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url,
            experiment_name: config.experiment_name.clone(),
            experiment_id: OnceCell::new(),
        })
    }

    /// Log `run` as a complete MLflow run and return its id.
    pub async fn log_run(&self, run: &RunRecord) -> anyhow::Result<String> {
        let experiment_id = self.experiment_id().await?;

        let tags = run
            .tags
            .iter()
            .map(|(key, value)| Tag { key, value })
            .collect();
        let created: CreateRunResponse = self
            .post(
                "runs/create",
                &CreateRun {
                    experiment_id,
                    start_time: run.started_at.timestamp_millis(),
                    tags,
                },
            )
            .await
            .context("runs/create")?;
        let info = created.run.info;

        if let Err(e) = self.complete_run(&info, run).await {
            if let Err(close) = self
                .update_run(&info.run_id, RunStatus::Failed, Utc::now().timestamp_millis())
                .await
            {
                tracing::debug!(run_id = %info.run_id, error = %close, "Could not close run after failure");
            }
            return Err(e);
        }

        tracing::debug!(run_id = %info.run_id, experiment_id, "Experiment run logged");
        Ok(info.run_id)
    }

    /// Everything after `runs/create`: data, artifact, final status.
    async fn complete_run(&self, info: &RunInfo, run: &RunRecord) -> anyhow::Result<()> {
        let timestamp = run.ended_at.timestamp_millis();
        let batch = LogBatch {
            run_id: &info.run_id,
            metrics: run
                .metrics
                .iter()
                .map(|(key, value)| Metric {
                    key,
                    value: *value,
                    timestamp,
                    step: 0,
                })
                .collect(),
            params: run
                .params
                .iter()
                .map(|(key, value)| Tag { key, value })
                .collect(),
            tags: Vec::new(),
        };
        let _: Empty = self
            .post("runs/log-batch", &batch)
            .await
            .context("runs/log-batch")?;

        if let Some(artifact) = &run.artifact {
            match info.artifact_uri.as_deref() {
                Some(uri) => self
                    .upload_artifact(uri, artifact)
                    .await
                    .context("artifact upload")?,
                None => tracing::debug!(run_id = %info.run_id, "Run has no artifact URI"),
            }
        }

        self.update_run(&info.run_id, run.status, timestamp).await
    }

    async fn update_run(&self, run_id: &str, status: RunStatus, end_time: i64) -> anyhow::Result<()> {
        let _: Empty = self
            .post(
                "runs/update",
                &UpdateRun {
                    run_id,
                    status: status.as_str(),
                    end_time,
                },
            )
            .await
            .context("runs/update")?;
        Ok(())
    }

    async fn experiment_id(&self) -> anyhow::Result<&str> {
        let id = self
            .experiment_id
            .get_or_try_init(|| self.resolve_experiment())
            .await?;
        Ok(id.as_str())
    }

    async fn resolve_experiment(&self) -> anyhow::Result<String> {
        let url = Url::parse_with_params(
            self.endpoint(&format!("{API_PREFIX}/experiments/get-by-name"))?.as_str(),
            &[("experiment_name", self.experiment_name.as_str())],
        )?;

        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            let created: CreateExperimentResponse = self
                .post(
                    "experiments/create",
                    &CreateExperiment {
                        name: &self.experiment_name,
                    },
                )
                .await
                .context("experiments/create")?;
            tracing::info!(
                experiment = %self.experiment_name,
                experiment_id = %created.experiment_id,
                "Created tracking experiment"
            );
            return Ok(created.experiment_id);
        }

        let found: GetExperimentResponse = response
            .error_for_status()
            .context("experiments/get-by-name")?
            .json()
            .await?;
        Ok(found.experiment.experiment_id)
    }

    /// Upload through the tracking server's artifact proxy. Other artifact
    /// stores are not reachable from here and are skipped.
    async fn upload_artifact(&self, artifact_uri: &str, artifact: &TextArtifact) -> anyhow::Result<()> {
        let Some(location) = proxied_artifact_path(artifact_uri) else {
            tracing::debug!(artifact_uri, "Artifact store is not proxied, skipping upload");
            return Ok(());
        };

        let url = self.endpoint(&format!("{ARTIFACTS_PREFIX}/{location}/{}", artifact.path))?;
        self.http
            .put(url)
            .body(artifact.contents.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn post<B, R>(&self, method: &str, body: &B) -> anyhow::Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(&format!("{API_PREFIX}/{method}"))?;
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        Ok(self.base_url.join(path)?)
    }
}

/// `mlflow-artifacts:/0/<run>/artifacts` → `0/<run>/artifacts`.
fn proxied_artifact_path(artifact_uri: &str) -> Option<&str> {
    let rest = artifact_uri.strip_prefix(PROXIED_ARTIFACT_SCHEME)?;
    if rest.starts_with("//") {
        // Authority form points at a different server.
        return None;
    }
    let path = rest.trim_matches('/');
    (!path.is_empty()).then_some(path)
}

/// [`ExperimentSink`] that logs each run on a background task.
pub struct MlflowSink {
    client: Arc<MlflowClient>,
}

impl MlflowSink {
    pub fn new(client: MlflowClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl ExperimentSink for MlflowSink {
    fn record(&self, run: RunRecord) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available, experiment run dropped");
            return;
        };

        let client = Arc::clone(&self.client);
        runtime.spawn(async move {
            if let Err(e) = client.log_run(&run).await {
                tracing::warn!(error = format!("{e:#}"), "Experiment tracking failed, run dropped");
            }
        });
    }
}
