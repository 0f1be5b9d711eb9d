//! Kubernetes job framework.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::context::ExecutionContext;
use crate::error::{CoreError, CoreResult};
use crate::model::{JobPayload, Runnable};
use crate::registry::Framework;

use super::K8S_JOB;

const RUN_ID_LABEL: &str = "runhub.io/run-id";
const PROJECT_LABEL: &str = "runhub.io/project";

/// Longest DNS-1123 label, which is also the label value limit.
const MAX_NAME_LEN: usize = 63;
/// Hex digits of the run id digest appended to job names.
const NAME_HASH_LEN: usize = 8;

/// Job framework configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sJobConfig {
    /// Kubernetes namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// TTL seconds after job finishes.
    #[serde(default = "default_ttl")]
    pub ttl_seconds_after_finished: i32,

    /// Pod retries before the job is marked failed.
    #[serde(default)]
    pub backoff_limit: i32,

    /// Substrate-level timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,

    /// Image pull policy.
    #[serde(default = "default_pull_policy")]
    pub image_pull_policy: String,

    /// Status poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive failed status checks before the run is failed.
    #[serde(default = "default_max_status_errors")]
    pub max_status_errors: u32,
}

fn default_namespace() -> String {
    "runhub".to_string()
}

fn default_ttl() -> i32 {
    300
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_status_errors() -> u32 {
    10
}

impl Default for K8sJobConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            ttl_seconds_after_finished: default_ttl(),
            backoff_limit: 0,
            active_deadline_seconds: None,
            image_pull_policy: default_pull_policy(),
            poll_interval_ms: default_poll_interval_ms(),
            max_status_errors: default_max_status_errors(),
        }
    }
}

/// Observed phase of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    /// The job no longer exists.
    Missing,
}

/// Result of submitting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created,
    /// A job with the same name was already there.
    AlreadyExists,
}

/// Minimal job API used by the framework.
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn create(&self, job: &Job) -> CoreResult<SubmitOutcome>;

    async fn phase(&self, name: &str) -> CoreResult<JobPhase>;

    async fn delete(&self, name: &str) -> CoreResult<()>;
}

/// [`JobClient`] backed by the cluster API. Connects on first use.
pub struct KubeJobClient {
    namespace: String,
    client: OnceCell<Client>,
}

impl KubeJobClient {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            client: OnceCell::new(),
        }
    }

    async fn jobs(&self) -> CoreResult<Api<Job>> {
        let client = self
            .client
            .get_or_try_init(|| async {
                Client::try_default().await.map_err(|e| {
                    CoreError::Substrate(format!("Failed to create K8s client: {}", e))
                })
            })
            .await?;
        Ok(Api::namespaced(client.clone(), &self.namespace))
    }
}

#[async_trait]
impl JobClient for KubeJobClient {
    async fn create(&self, job: &Job) -> CoreResult<SubmitOutcome> {
        let jobs = self.jobs().await?;
        match jobs.create(&PostParams::default(), job).await {
            Ok(_) => Ok(SubmitOutcome::Created),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Ok(SubmitOutcome::AlreadyExists)
            }
            Err(e) => Err(CoreError::Substrate(format!("Failed to create Job: {}", e))),
        }
    }

    async fn phase(&self, name: &str) -> CoreResult<JobPhase> {
        let jobs = self.jobs().await?;
        let Some(job) = jobs.get_opt(name).await? else {
            return Ok(JobPhase::Missing);
        };

        let Some(status) = job.status else {
            return Ok(JobPhase::Pending);
        };

        if status.succeeded.unwrap_or(0) > 0 {
            return Ok(JobPhase::Succeeded);
        }

        let failed_condition = status.conditions.unwrap_or_default().into_iter().find(|c| {
            c.type_ == "Failed" && c.status == "True"
        });
        if let Some(condition) = failed_condition {
            let reason = condition
                .message
                .or(condition.reason)
                .unwrap_or_else(|| "job failed".to_string());
            return Ok(JobPhase::Failed(reason));
        }

        if status.active.unwrap_or(0) > 0 {
            Ok(JobPhase::Running)
        } else {
            Ok(JobPhase::Pending)
        }
    }

    async fn delete(&self, name: &str) -> CoreResult<()> {
        let jobs = self.jobs().await?;
        match jobs.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(CoreError::Substrate(format!("Failed to delete Job: {}", e))),
        }
    }
}

/// Deterministic job name for a run: DNS-1123, at most 63 characters.
///
/// The readable part is the sanitized run id; the suffix is a digest of the
/// raw id, so ids that sanitize alike (`Run_1`, `run.1`) get distinct names.
pub fn job_name(run_id: &str) -> String {
    let sanitized: String = run_id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let digest = format!("{:x}", Sha256::digest(run_id.as_bytes()));

    let mut stem = format!("runhub-{}", sanitized.trim_matches('-'));
    stem.truncate(MAX_NAME_LEN - NAME_HASH_LEN - 1);
    format!("{}-{}", stem.trim_end_matches('-'), &digest[..NAME_HASH_LEN])
}

/// Label value: at most 63 characters of `[A-Za-z0-9-_.]`, beginning and
/// ending with an alphanumeric.
pub fn label_value(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

fn forget(claimed: &Mutex<HashSet<String>>, run_id: &str) {
    match claimed.lock() {
        Ok(mut claimed) => claimed.remove(run_id),
        Err(poisoned) => poisoned.into_inner().remove(run_id),
    };
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        None
    } else {
        Some(
            values
                .iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect(),
        )
    }
}

/// Build the job object for a runnable.
pub fn build_job(runnable: &Runnable, payload: &JobPayload, config: &K8sJobConfig) -> Job {
    let name = job_name(&runnable.id);

    let mut labels = BTreeMap::new();
    labels.insert(RUN_ID_LABEL.to_string(), label_value(&runnable.id));
    labels.insert(PROJECT_LABEL.to_string(), label_value(&runnable.project));

    // Labels may be lossy; the annotation keeps the exact id.
    let annotations = BTreeMap::from([(RUN_ID_LABEL.to_string(), runnable.id.clone())]);

    let env: Vec<EnvVar> = payload
        .env
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();

    let resources = if payload.resources.is_empty() {
        None
    } else {
        Some(ResourceRequirements {
            requests: quantities(&payload.resources.requests),
            limits: quantities(&payload.resources.limits),
            ..Default::default()
        })
    };

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(JobSpec {
            ttl_seconds_after_finished: Some(config.ttl_seconds_after_finished),
            backoff_limit: Some(config.backoff_limit),
            active_deadline_seconds: config.active_deadline_seconds,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "workload".to_string(),
                        image: Some(payload.image.clone()),
                        image_pull_policy: Some(config.image_pull_policy.clone()),
                        command: Some(vec![payload.command.clone()]),
                        args: if payload.args.is_empty() {
                            None
                        } else {
                            Some(payload.args.clone())
                        },
                        env: if env.is_empty() { None } else { Some(env) },
                        resources,
                        ..Default::default()
                    }],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Runs job runnables as Kubernetes batch jobs.
///
/// Submissions are deduplicated by run id, in process while the run is
/// tracked and through the deterministic job name. A watcher per run polls
/// the job and reports the outcome; the run stops being tracked once the
/// outcome is known or the run is stopped.
pub struct K8sJobFramework {
    config: K8sJobConfig,
    client: Arc<dyn JobClient>,
    claimed: Arc<Mutex<HashSet<String>>>,
    watchers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl K8sJobFramework {
    pub fn new(config: K8sJobConfig, client: Arc<dyn JobClient>) -> Self {
        Self {
            config,
            client,
            claimed: Arc::new(Mutex::new(HashSet::new())),
            watchers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Framework talking to the cluster from the ambient kubeconfig.
    pub fn in_cluster(config: K8sJobConfig) -> Self {
        let client = Arc::new(KubeJobClient::new(config.namespace.clone()));
        Self::new(config, client)
    }

    /// Claim a run id. Returns false if it is already tracked.
    fn claim(&self, run_id: &str) -> bool {
        match self.claimed.lock() {
            Ok(mut claimed) => claimed.insert(run_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(run_id.to_string()),
        }
    }

    fn release(&self, run_id: &str) {
        forget(&self.claimed, run_id);
    }

    /// Number of runs with a job being tracked.
    pub fn tracked_runs(&self) -> usize {
        self.claimed.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn watch(&self, name: String, ctx: ExecutionContext) {
        let client = self.client.clone();
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_errors = self.config.max_status_errors;
        let namespace = self.config.namespace.clone();
        let watchers = self.watchers.clone();
        let claimed = self.claimed.clone();
        let run_id = ctx.run_id.clone();

        // Held across the spawn so the watcher's own removal cannot run
        // before its handle is registered.
        let mut registered = self
            .watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let handle = tokio::spawn(async move {
            let mut errors = 0;
            let outcome = loop {
                tokio::time::sleep(interval).await;

                match client.phase(&name).await {
                    Ok(JobPhase::Succeeded) => break Ok(()),
                    Ok(JobPhase::Failed(reason)) => {
                        break Err(format!("job {} failed: {}", name, reason));
                    }
                    Ok(JobPhase::Missing) => break Err(format!("job {} disappeared", name)),
                    Ok(phase) => {
                        errors = 0;
                        tracing::trace!(job = %name, ?phase, "Job in progress");
                    }
                    Err(e) => {
                        errors += 1;
                        tracing::warn!(
                            job = %name,
                            error = %e,
                            attempt = errors,
                            "Error checking job status"
                        );
                        if errors >= max_errors {
                            break Err(format!("lost track of job {}: {}", name, e));
                        }
                    }
                }
            };

            if let Ok(mut watchers) = watchers.lock() {
                watchers.remove(&ctx.run_id);
            }
            forget(&claimed, &ctx.run_id);

            match outcome {
                Ok(()) => {
                    let mut detail = Map::new();
                    detail.insert("job".to_string(), Value::String(name));
                    detail.insert("namespace".to_string(), Value::String(namespace));
                    ctx.succeeded(detail).await;
                }
                Err(message) => ctx.failed(message).await,
            }
        });

        registered.insert(run_id, handle);
    }
}

#[async_trait]
impl Framework for K8sJobFramework {
    fn name(&self) -> &'static str {
        K8S_JOB
    }

    async fn execute(&self, runnable: Runnable, ctx: ExecutionContext) -> CoreResult<()> {
        let payload = runnable.job().ok_or_else(|| {
            CoreError::Execution(format!("{} requires a job payload", K8S_JOB))
        })?;

        if !self.claim(&runnable.id) {
            tracing::debug!(run_id = %runnable.id, "Job already submitted, skipping");
            return Ok(());
        }

        let job = build_job(&runnable, payload, &self.config);
        let name = job_name(&runnable.id);

        match self.client.create(&job).await {
            Ok(SubmitOutcome::Created) => {
                tracing::info!(
                    run_id = %runnable.id,
                    job = %name,
                    namespace = %self.config.namespace,
                    image = %payload.image,
                    "Job created"
                );
            }
            Ok(SubmitOutcome::AlreadyExists) => {
                tracing::info!(run_id = %runnable.id, job = %name, "Job already exists, watching");
            }
            Err(e) => {
                self.release(&runnable.id);
                return Err(e);
            }
        }

        self.watch(name, ctx);
        Ok(())
    }

    async fn stop(&self, run_id: &str) -> CoreResult<()> {
        let watcher = self
            .watchers
            .lock()
            .ok()
            .and_then(|mut watchers| watchers.remove(run_id));
        if let Some(handle) = watcher {
            handle.abort();
        }
        self.release(run_id);

        let name = job_name(run_id);
        tracing::info!(run_id = %run_id, job = %name, "Deleting job");
        self.client.delete(&name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StatusReporter;
    use crate::model::{Resources, RunnablePayload};
    use crate::state::{RunEvent, RunState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockJobClient {
        creates: AtomicUsize,
        deletes: AtomicUsize,
        phase: Mutex<JobPhase>,
    }

    impl MockJobClient {
        fn new(phase: JobPhase) -> Self {
            Self {
                creates: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
                phase: Mutex::new(phase),
            }
        }
    }

    #[async_trait]
    impl JobClient for MockJobClient {
        async fn create(&self, _job: &Job) -> CoreResult<SubmitOutcome> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(SubmitOutcome::Created)
        }

        async fn phase(&self, _name: &str) -> CoreResult<JobPhase> {
            Ok(self.phase.lock().unwrap().clone())
        }

        async fn delete(&self, _name: &str) -> CoreResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: tokio::sync::Mutex<Vec<(RunEvent, Map<String, Value>)>>,
    }

    #[async_trait]
    impl StatusReporter for Recorder {
        async fn report(&self, _run_id: &str, event: RunEvent, context: Map<String, Value>) {
            self.events.lock().await.push((event, context));
        }
    }

    fn runnable(id: &str) -> Runnable {
        Runnable {
            id: id.to_string(),
            project: "demo".to_string(),
            framework: K8S_JOB.to_string(),
            state: RunState::Ready,
            payload: RunnablePayload::Job(JobPayload {
                image: "dbt:latest".to_string(),
                command: "run".to_string(),
                args: vec!["--select".to_string(), "a".to_string()],
                env: BTreeMap::from([("A".to_string(), "1".to_string())]),
                resources: Resources {
                    requests: BTreeMap::from([("cpu".to_string(), "500m".to_string())]),
                    limits: BTreeMap::new(),
                },
            }),
        }
    }

    fn config() -> K8sJobConfig {
        K8sJobConfig {
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    async fn wait_for_events(recorder: &Recorder, count: usize) {
        for _ in 0..200 {
            if recorder.events.lock().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn is_dns_label(name: &str) -> bool {
        name.len() <= 63
            && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !name.starts_with('-')
            && !name.ends_with('-')
    }

    #[test]
    fn test_job_name() {
        let name = job_name("R1");
        assert!(name.starts_with("runhub-r1-"));
        assert_eq!(name.len(), "runhub-r1-".len() + 8);
        assert_eq!(job_name("R1"), name);

        for id in ["a_b.c", "-edge-", "Ünïcode run", "", &"x".repeat(100)] {
            assert!(is_dns_label(&job_name(id)), "{:?}", job_name(id));
        }
    }

    #[test]
    fn test_job_names_of_similar_ids_differ() {
        assert_ne!(job_name("Run_1"), job_name("run.1"));
        assert_ne!(job_name("run-1"), job_name("RUN-1"));

        let a = format!("{}a", "x".repeat(80));
        let b = format!("{}b", "x".repeat(80));
        assert_ne!(job_name(&a), job_name(&b));
        assert_eq!(job_name(&a).len(), 63);
    }

    #[test]
    fn test_label_value() {
        assert_eq!(label_value("Run_1"), "Run_1");
        assert_eq!(label_value("my project/α"), "my-project");
        assert_eq!(label_value("_x_"), "x");
        assert_eq!(label_value(&"p".repeat(80)).len(), 63);
    }

    #[test]
    fn test_build_job() {
        let runnable = runnable("R1");
        let job = build_job(&runnable, runnable.job().unwrap(), &K8sJobConfig::default());

        assert_eq!(job.metadata.name, Some(job_name("R1")));
        assert_eq!(job.metadata.namespace.as_deref(), Some("runhub"));
        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[RUN_ID_LABEL], "R1");
        assert_eq!(labels[PROJECT_LABEL], "demo");
        assert_eq!(job.metadata.annotations.as_ref().unwrap()[RUN_ID_LABEL], "R1");
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("dbt:latest"));
        assert_eq!(container.command, Some(vec!["run".to_string()]));
        assert_eq!(container.args.as_ref().unwrap().len(), 2);
        let requests = container.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["cpu"], Quantity("500m".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_execute_creates_one_job() {
        let client = Arc::new(MockJobClient::new(JobPhase::Running));
        let framework = K8sJobFramework::new(config(), client.clone());
        let recorder = Arc::new(Recorder::default());

        framework
            .execute(runnable("R1"), ExecutionContext::new("R1", recorder.clone()))
            .await
            .unwrap();
        framework
            .execute(runnable("R1"), ExecutionContext::new("R1", recorder.clone()))
            .await
            .unwrap();

        assert_eq!(client.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watcher_reports_success() {
        let client = Arc::new(MockJobClient::new(JobPhase::Succeeded));
        let framework = K8sJobFramework::new(config(), client.clone());
        let recorder = Arc::new(Recorder::default());

        framework
            .execute(runnable("R2"), ExecutionContext::new("R2", recorder.clone()))
            .await
            .unwrap();
        wait_for_events(&recorder, 1).await;

        let events = recorder.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, RunEvent::SubstrateDone);
        assert_eq!(events[0].1["job"], job_name("R2").as_str());
        drop(events);
        assert_eq!(framework.tracked_runs(), 0);
    }

    #[tokio::test]
    async fn test_watcher_reports_failure() {
        let client = Arc::new(MockJobClient::new(JobPhase::Failed("BackoffLimitExceeded".into())));
        let framework = K8sJobFramework::new(config(), client.clone());
        let recorder = Arc::new(Recorder::default());

        framework
            .execute(runnable("R3"), ExecutionContext::new("R3", recorder.clone()))
            .await
            .unwrap();
        wait_for_events(&recorder, 1).await;

        let events = recorder.events.lock().await;
        assert_eq!(events[0].0, RunEvent::SubstrateFailed);
        assert!(events[0].1["error"].as_str().unwrap().contains("BackoffLimitExceeded"));
    }

    #[tokio::test]
    async fn test_stop_deletes_job_and_silences_watcher() {
        let client = Arc::new(MockJobClient::new(JobPhase::Running));
        let framework = K8sJobFramework::new(config(), client.clone());
        let recorder = Arc::new(Recorder::default());

        framework
            .execute(runnable("R4"), ExecutionContext::new("R4", recorder.clone()))
            .await
            .unwrap();
        framework.stop("R4").await.unwrap();

        *client.phase.lock().unwrap() = JobPhase::Succeeded;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(client.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(framework.tracked_runs(), 0);
        assert!(recorder.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_build_job_sanitizes_project_label() {
        let mut runnable = runnable("R6");
        runnable.project = "Data Team/Nightly".to_string();
        let job = build_job(&runnable, runnable.job().unwrap(), &K8sJobConfig::default());

        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels[PROJECT_LABEL], "Data-Team-Nightly");
    }

    struct UnreachableJobs {
        checks: AtomicUsize,
    }

    #[async_trait]
    impl JobClient for UnreachableJobs {
        async fn create(&self, _job: &Job) -> CoreResult<SubmitOutcome> {
            Ok(SubmitOutcome::Created)
        }

        async fn phase(&self, _name: &str) -> CoreResult<JobPhase> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Substrate("connection refused".to_string()))
        }

        async fn delete(&self, _name: &str) -> CoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_watcher_gives_up_after_status_errors() {
        let client = Arc::new(UnreachableJobs {
            checks: AtomicUsize::new(0),
        });
        let config = K8sJobConfig {
            max_status_errors: 3,
            ..config()
        };
        let framework = K8sJobFramework::new(config, client.clone());
        let recorder = Arc::new(Recorder::default());

        framework
            .execute(runnable("R7"), ExecutionContext::new("R7", recorder.clone()))
            .await
            .unwrap();
        wait_for_events(&recorder, 1).await;

        let events = recorder.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, RunEvent::SubstrateFailed);
        let error = events[0].1["error"].as_str().unwrap();
        assert!(error.contains("lost track"));
        assert!(error.contains("connection refused"));
        assert_eq!(client.checks.load(Ordering::SeqCst), 3);
        assert_eq!(framework.tracked_runs(), 0);
        assert!(framework.watchers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watcher_finishing_at_once_is_not_left_registered() {
        let client = Arc::new(MockJobClient::new(JobPhase::Succeeded));
        let config = K8sJobConfig {
            poll_interval_ms: 0,
            ..config()
        };
        let framework = K8sJobFramework::new(config, client);
        let recorder = Arc::new(Recorder::default());

        framework
            .execute(runnable("R8"), ExecutionContext::new("R8", recorder.clone()))
            .await
            .unwrap();
        wait_for_events(&recorder, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(framework.watchers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_process_payload() {
        let client = Arc::new(MockJobClient::new(JobPhase::Running));
        let framework = K8sJobFramework::new(config(), client.clone());
        let mut runnable = runnable("R5");
        runnable.payload = RunnablePayload::Process(crate::model::ProcessPayload {
            command: "true".into(),
            args: vec![],
            env: BTreeMap::new(),
            cwd: None,
        });

        let err = framework
            .execute(runnable, ExecutionContext::new("R5", Arc::new(Recorder::default())))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Execution(_)));
        assert_eq!(client.creates.load(Ordering::SeqCst), 0);
    }
}
