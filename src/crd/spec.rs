use k8s_openapi::api::batch::v1::JobTemplateSpec;
use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};

use super::status::JobGroupStatus;

/// A group of replicated jobs that is scheduled, restarted, suspended and
/// finished as one unit.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "batch.jobgroup.dev",
    version = "v1alpha1",
    kind = "JobGroup",
    plural = "jobgroups",
    shortname = "jg",
    namespaced,
    status = "JobGroupStatus",
    printcolumn = r#"{"name":"Restarts","type":"integer","jsonPath":".status.restarts"}"#,
    printcolumn = r#"{"name":"Suspended","type":"boolean","jsonPath":".spec.suspend"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JobGroupSpec {
    /// Member templates, in declaration order.
    #[serde(default)]
    pub members: Vec<ReplicatedJob>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_policy: Option<SuccessPolicy>,

    /// Pauses the group. No child runs while set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,
}

impl JobGroupSpec {
    pub fn is_suspended(&self) -> bool {
        self.suspend.unwrap_or(false)
    }

    pub fn max_restarts(&self) -> i32 {
        self.failure_policy
            .as_ref()
            .map(|p| p.max_restarts)
            .unwrap_or(0)
    }

    pub fn member(&self, name: &str) -> Option<&ReplicatedJob> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedJob {
    /// Unique within the group. Part of every child job name.
    pub name: String,

    /// Number of child jobs created from the template.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Template every replica's child job is created from.
    #[schemars(schema_with = "job_template_schema")]
    pub job_template: JobTemplateSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
}

impl ReplicatedJob {
    pub fn dns_hostnames_enabled(&self) -> bool {
        self.network
            .as_ref()
            .and_then(|n| n.enable_dns_hostnames)
            .unwrap_or(false)
    }
}

fn default_replicas() -> i32 {
    1
}

fn job_template_schema(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Network {
    /// Gives every pod a stable hostname resolvable by its peers.
    #[serde(
        rename = "enableDNSHostnames",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub enable_dns_hostnames: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailurePolicy {
    /// Whole-group restarts tolerated before the group is marked failed.
    #[serde(default)]
    pub max_restarts: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SuccessPolicy {
    pub operator: Operator,

    /// Member names the operator is applied to. Empty means every member.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl SuccessPolicy {
    pub fn targets_member(&self, name: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| t == name)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Operator {
    #[default]
    All,
    Any,
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP_YAML: &str = r#"
apiVersion: batch.jobgroup.dev/v1alpha1
kind: JobGroup
metadata:
  name: train
  namespace: ml
spec:
  members:
    - name: driver
      jobTemplate:
        spec:
          template:
            spec:
              containers:
                - name: main
                  image: busybox
    - name: worker
      replicas: 4
      network:
        enableDNSHostnames: false
      jobTemplate:
        spec:
          completionMode: NonIndexed
          template:
            spec:
              containers:
                - name: main
                  image: busybox
  failurePolicy:
    maxRestarts: 2
  successPolicy:
    operator: Any
    targets: [driver]
"#;

    #[test]
    fn test_group_deserialize() {
        let group: JobGroup = serde_yaml::from_str(GROUP_YAML).unwrap();

        assert_eq!(group.spec.members.len(), 2);
        assert_eq!(group.spec.members[0].replicas, 1);
        assert_eq!(group.spec.members[1].replicas, 4);
        assert!(!group.spec.members[1].dns_hostnames_enabled());
        assert_eq!(group.spec.max_restarts(), 2);
        assert!(!group.spec.is_suspended());

        let policy = group.spec.success_policy.unwrap();
        assert_eq!(policy.operator, Operator::Any);
        assert!(policy.targets_member("driver"));
        assert!(!policy.targets_member("worker"));
    }

    #[test]
    fn test_spec_serializes_camel_case() {
        let group: JobGroup = serde_yaml::from_str(GROUP_YAML).unwrap();
        let value = serde_json::to_value(&group.spec).unwrap();

        assert!(value["members"][0]["jobTemplate"].is_object());
        assert_eq!(value["failurePolicy"]["maxRestarts"], 2);
        assert_eq!(value["members"][1]["network"]["enableDNSHostnames"], false);
        assert!(value.get("suspend").is_none());
    }

    #[test]
    fn test_empty_targets_select_every_member() {
        let policy = SuccessPolicy::default();
        assert_eq!(policy.operator, Operator::All);
        assert!(policy.targets_member("anything"));
    }
}
