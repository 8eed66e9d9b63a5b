use tracing::trace;

use crate::crd::{JobGroup, Network, Operator, SuccessPolicy};

pub const INDEXED_COMPLETION: &str = "Indexed";
pub const RESTART_ON_FAILURE: &str = "OnFailure";

/// Fills unset fields with their defaults. Applying it twice changes nothing.
pub fn apply_defaults(group: &mut JobGroup) {
    for member in group.spec.members.iter_mut() {
        let job_spec = member.job_template.spec.get_or_insert_with(Default::default);

        if job_spec.completion_mode.is_none() {
            trace!(member = %member.name, "defaulting completionMode to Indexed");
            job_spec.completion_mode = Some(INDEXED_COMPLETION.to_string());
        }

        if let Some(pod_spec) = job_spec.template.spec.as_mut()
            && pod_spec.restart_policy.is_none()
        {
            pod_spec.restart_policy = Some(RESTART_ON_FAILURE.to_string());
        }

        let network = member.network.get_or_insert_with(Network::default);
        if network.enable_dns_hostnames.is_none() {
            network.enable_dns_hostnames = Some(true);
        }
    }

    if group.spec.success_policy.is_none() {
        group.spec.success_policy = Some(SuccessPolicy {
            operator: Operator::All,
            targets: Vec::new(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(yaml: &str) -> JobGroup {
        serde_yaml::from_str(yaml).unwrap()
    }

    const UNSET: &str = r#"
apiVersion: batch.jobgroup.dev/v1alpha1
kind: JobGroup
metadata:
  name: completionmode-unset
  namespace: default
spec:
  members:
    - name: rjob
      jobTemplate:
        spec:
          template:
            spec:
              containers:
                - name: test-container
                  image: busybox:latest
"#;

    #[test]
    fn test_defaults_applied() {
        let mut g = group(UNSET);
        apply_defaults(&mut g);

        let member = &g.spec.members[0];
        let job_spec = member.job_template.spec.as_ref().unwrap();
        assert_eq!(job_spec.completion_mode.as_deref(), Some("Indexed"));
        assert_eq!(
            job_spec
                .template
                .spec
                .as_ref()
                .unwrap()
                .restart_policy
                .as_deref(),
            Some("OnFailure")
        );
        assert!(member.dns_hostnames_enabled());

        let policy = g.spec.success_policy.as_ref().unwrap();
        assert_eq!(policy.operator, Operator::All);
        assert!(policy.targets.is_empty());
    }

    #[test]
    fn test_defaults_idempotent() {
        let mut once = group(UNSET);
        apply_defaults(&mut once);
        let mut twice = once.clone();
        apply_defaults(&mut twice);

        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    #[test]
    fn test_explicit_values_kept() {
        let mut g = group(
            r#"
apiVersion: batch.jobgroup.dev/v1alpha1
kind: JobGroup
metadata:
  name: completionmode-nonindexed
  namespace: default
spec:
  members:
    - name: rjob
      network:
        enableDNSHostnames: false
      jobTemplate:
        spec:
          completionMode: NonIndexed
          template:
            spec:
              restartPolicy: Never
              containers:
                - name: test-container
                  image: busybox:latest
  successPolicy:
    operator: Any
    targets: [rjob]
"#,
        );
        apply_defaults(&mut g);

        let member = &g.spec.members[0];
        let job_spec = member.job_template.spec.as_ref().unwrap();
        assert_eq!(job_spec.completion_mode.as_deref(), Some("NonIndexed"));
        assert_eq!(
            job_spec
                .template
                .spec
                .as_ref()
                .unwrap()
                .restart_policy
                .as_deref(),
            Some("Never")
        );
        assert!(!member.dns_hostnames_enabled());
        assert_eq!(
            g.spec.success_policy.as_ref().unwrap().operator,
            Operator::Any
        );
    }

    #[test]
    fn test_network_block_without_flag_defaults_to_enabled() {
        let mut g = group(UNSET);
        g.spec.members[0].network = Some(Network::default());
        apply_defaults(&mut g);

        assert_eq!(
            g.spec.members[0].network,
            Some(Network {
                enable_dns_hostnames: Some(true)
            })
        );
    }
}
