mod spec;
mod status;

pub use self::spec::{
    FailurePolicy, JobGroup, JobGroupSpec, Network, Operator, ReplicatedJob, SuccessPolicy,
};
pub use self::status::{
    Condition, ConditionStatus, ConditionType, JobGroupStatus, ReplicatedJobStatus,
};

use std::fmt;

use kube::{CustomResourceExt, ResourceExt};

pub const API_GROUP: &str = "batch.jobgroup.dev";

pub const GROUP_NAME_LABEL: &str = "batch.jobgroup.dev/group-name";
pub const REPLICATED_JOB_NAME_LABEL: &str = "batch.jobgroup.dev/replicatedjob-name";
pub const JOB_INDEX_LABEL: &str = "batch.jobgroup.dev/job-index";
pub const RESTART_ATTEMPT_LABEL: &str = "batch.jobgroup.dev/restart-attempt";

/// Identity of a group: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub namespace: String,
    pub name: String,
}

impl GroupKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(group: &JobGroup) -> Option<Self> {
        Some(Self::new(group.namespace()?, group.metadata.name.clone()?))
    }

    pub fn label_selector(&self) -> String {
        format!("{GROUP_NAME_LABEL}={}", self.name)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Deterministic child job name for one replica of a member.
pub fn child_job_name(group: &str, member: &str, index: i32) -> String {
    format!("{group}-{member}-{index}")
}

/// Name of the headless service (and pod subdomain) of a member.
pub fn member_service_name(group: &str, member: &str) -> String {
    format!("{group}-{member}")
}

pub fn crd_yaml() -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&JobGroup::crd())
}
