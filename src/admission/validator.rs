use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use super::placement::AllowList;
use crate::crd::{JobGroup, JobGroupSpec, ReplicatedJob, child_job_name};

const MAX_DNS_LABEL_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MalformedRequest,
    EmptyMembers,
    InvalidReplicas,
    DuplicateMemberName,
    InvalidMemberName,
    NameTooLong,
    InvalidJobTemplate,
    InvalidFailurePolicy,
    InvalidSuccessPolicyTarget,
    ImmutableFieldChanged,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}: {message}")]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

pub fn validate_create(group: &JobGroup) -> Result<(), Rejection> {
    let spec = &group.spec;
    if spec.members.is_empty() {
        return Err(Rejection::new(
            RejectReason::EmptyMembers,
            "spec.members must declare at least one replicated job",
        ));
    }

    let mut seen = HashSet::new();
    for (i, member) in spec.members.iter().enumerate() {
        if !is_dns_label(&member.name) {
            return Err(Rejection::new(
                RejectReason::InvalidMemberName,
                format!(
                    "spec.members[{i}].name '{}' must be a lowercase RFC 1123 label",
                    member.name
                ),
            ));
        }
        if !seen.insert(member.name.as_str()) {
            return Err(Rejection::new(
                RejectReason::DuplicateMemberName,
                format!("spec.members[{i}].name '{}' is declared twice", member.name),
            ));
        }
        if member.replicas < 1 {
            return Err(Rejection::new(
                RejectReason::InvalidReplicas,
                format!(
                    "spec.members[{i}].replicas must be positive, got {}",
                    member.replicas
                ),
            ));
        }
        validate_job_template(i, member)?;
        validate_name_length(group_name(group).as_deref(), i, member)?;
    }

    if let Some(policy) = &spec.failure_policy
        && policy.max_restarts < 0
    {
        return Err(Rejection::new(
            RejectReason::InvalidFailurePolicy,
            format!(
                "spec.failurePolicy.maxRestarts must not be negative, got {}",
                policy.max_restarts
            ),
        ));
    }

    if let Some(policy) = &spec.success_policy {
        for target in &policy.targets {
            if spec.member(target).is_none() {
                return Err(Rejection::new(
                    RejectReason::InvalidSuccessPolicyTarget,
                    format!("spec.successPolicy.targets names unknown replicated job '{target}'"),
                ));
            }
        }
    }

    Ok(())
}

/// Checks an update against the persisted object. While the persisted group
/// is suspended only the fields in `allow` may differ on members; otherwise
/// everything but `suspend` is frozen. A finished group accepts no change.
pub fn validate_update(
    prior: &JobGroup,
    candidate: &JobGroup,
    allow: &AllowList,
) -> Result<(), Rejection> {
    validate_create(candidate)?;

    if prior.status.as_ref().is_some_and(|s| s.is_finished()) {
        if prior.spec != candidate.spec {
            return Err(Rejection::new(
                RejectReason::ImmutableFieldChanged,
                "spec cannot change after the group has completed or failed",
            ));
        }
        return Ok(());
    }

    let mut munged = candidate.spec.clone();
    if prior.spec.is_suspended() {
        for (prior_member, member) in prior.spec.members.iter().zip(munged.members.iter_mut()) {
            carry_over_placement(prior_member, member, allow);
        }
    }

    match first_frozen_difference(&prior.spec, &munged) {
        Some(path) => {
            let mode = if prior.spec.is_suspended() {
                "is immutable"
            } else {
                "is immutable while the group is not suspended"
            };
            Err(Rejection::new(
                RejectReason::ImmutableFieldChanged,
                format!("{path} {mode}"),
            ))
        }
        None => Ok(()),
    }
}

fn carry_over_placement(prior: &ReplicatedJob, member: &mut ReplicatedJob, allow: &AllowList) {
    let prior_pod = prior
        .job_template
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref());
    let pod = member
        .job_template
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut());
    if let (Some(prior_pod), Some(pod)) = (prior_pod, pod) {
        allow.carry_over(prior_pod, pod);
    }
}

/// Path of the first field outside `suspend` that differs.
fn first_frozen_difference(prior: &JobGroupSpec, candidate: &JobGroupSpec) -> Option<String> {
    if prior.members.len() != candidate.members.len() {
        return Some("spec.members".to_string());
    }
    for (i, (old, new)) in prior.members.iter().zip(&candidate.members).enumerate() {
        if old.name != new.name {
            return Some(format!("spec.members[{i}].name"));
        }
        if old.replicas != new.replicas {
            return Some(format!("spec.members[{i}].replicas"));
        }
        if old.network != new.network {
            return Some(format!("spec.members[{i}].network"));
        }
        if old.job_template != new.job_template {
            return Some(format!("spec.members[{i}].jobTemplate"));
        }
    }
    if prior.failure_policy != candidate.failure_policy {
        return Some("spec.failurePolicy".to_string());
    }
    if prior.success_policy != candidate.success_policy {
        return Some("spec.successPolicy".to_string());
    }
    None
}

fn validate_job_template(i: usize, member: &ReplicatedJob) -> Result<(), Rejection> {
    let has_containers = member
        .job_template
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .is_some_and(|pod| !pod.containers.is_empty());
    if has_containers {
        Ok(())
    } else {
        Err(Rejection::new(
            RejectReason::InvalidJobTemplate,
            format!("spec.members[{i}].jobTemplate must declare a pod spec with containers"),
        ))
    }
}

/// Generated names are resolved after admission, so the longest possible
/// suffix is assumed for them.
fn group_name(group: &JobGroup) -> Option<String> {
    match (&group.metadata.name, &group.metadata.generate_name) {
        (Some(name), _) => Some(name.clone()),
        (None, Some(prefix)) => Some(format!("{prefix}xxxxx")),
        (None, None) => None,
    }
}

/// Child job names, and the indexed pod hostnames derived from them, must
/// stay valid DNS labels.
fn validate_name_length(
    group: Option<&str>,
    i: usize,
    member: &ReplicatedJob,
) -> Result<(), Rejection> {
    let Some(group) = group else {
        return Ok(());
    };
    let job_name = child_job_name(group, &member.name, member.replicas - 1);
    let completions = member
        .job_template
        .spec
        .as_ref()
        .and_then(|s| s.completions)
        .unwrap_or(1)
        .max(1);
    let hostname_len = job_name.len() + 1 + (completions - 1).to_string().len();
    if hostname_len > MAX_DNS_LABEL_LEN {
        return Err(Rejection::new(
            RejectReason::NameTooLong,
            format!(
                "group name '{group}' with spec.members[{i}].name '{}' yields pod hostnames of {hostname_len} characters, limit is {MAX_DNS_LABEL_LEN}",
                member.name
            ),
        ));
    }
    Ok(())
}

fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_DNS_LABEL_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}
