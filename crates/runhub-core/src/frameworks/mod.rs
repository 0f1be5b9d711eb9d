//! Built-in execution frameworks.
//!
//! - `k8sjob` - Kubernetes batch jobs
//! - `local` - processes on the dispatching node

mod k8s_job;
mod local;

pub use self::k8s_job::{
    build_job, job_name, JobClient, JobPhase, K8sJobConfig, K8sJobFramework, KubeJobClient,
    SubmitOutcome,
};
pub use self::local::{LocalConfig, LocalFramework};

/// Name of the Kubernetes job framework.
pub const K8S_JOB: &str = "k8sjob";

/// Name of the local process framework.
pub const LOCAL: &str = "local";
