//! Application configuration for the RunHub control plane.

use serde::Deserialize;
use std::time::Duration;

use runhub_core::frameworks::{K8sJobConfig, LocalConfig};

/// Backend used to persist runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Postgres,
}

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `RUNHUB_`:
/// - `RUNHUB_WORKER_COUNT`: Execution workers (default: 4)
/// - `RUNHUB_QUEUE_CAPACITY`: Execution queue bound (default: 256)
/// - `RUNHUB_DEFAULT_DEADLINE_SECS`: Deadline applied to every submission (optional)
/// - `RUNHUB_K8S_NAMESPACE`: Namespace for job runnables (default: "runhub")
/// - `RUNHUB_STORE`: `memory` or `postgres` (default: "memory")
/// - `RUNHUB_MANIFEST`: YAML manifest submitted at startup (optional)
/// - `RUNHUB_LOG_JSON`: Emit JSON logs (default: false)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Number of execution workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Capacity of the execution queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deadline applied when the caller supplies none
    #[serde(default)]
    pub default_deadline_secs: Option<u64>,

    /// Kubernetes namespace for jobs
    #[serde(default = "default_namespace")]
    pub k8s_namespace: String,

    /// Job status poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub k8s_poll_interval_ms: u64,

    /// Shell for local processes
    #[serde(default = "default_shell")]
    pub local_shell: String,

    /// Run store backend
    #[serde(default)]
    pub store: StoreKind,

    /// Manifest path
    #[serde(default)]
    pub manifest: Option<String>,

    /// JSON log output
    #[serde(default)]
    pub log_json: bool,
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_namespace() -> String {
    "runhub".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_shell() -> String {
    "bash".to_string()
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `RUNHUB_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("RUNHUB_").from_env::<AppConfig>()
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_secs.map(Duration::from_secs)
    }

    /// Job framework settings derived from this config.
    pub fn k8s_job(&self) -> K8sJobConfig {
        K8sJobConfig {
            namespace: self.k8s_namespace.clone(),
            poll_interval_ms: self.k8s_poll_interval_ms,
            ..Default::default()
        }
    }

    /// Local framework settings derived from this config.
    pub fn local(&self) -> LocalConfig {
        LocalConfig {
            shell: self.local_shell.clone(),
            ..Default::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            default_deadline_secs: None,
            k8s_namespace: default_namespace(),
            k8s_poll_interval_ms: default_poll_interval_ms(),
            local_shell: default_shell(),
            store: StoreKind::default(),
            manifest: None,
            log_json: false,
        }
    }
}
