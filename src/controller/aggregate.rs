use k8s_openapi::api::batch::v1::Job;

use crate::crd::{JobGroupSpec, REPLICATED_JOB_NAME_LABEL, ReplicatedJobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberPhase {
    Active,
    /// Every replica succeeded.
    Completed,
    /// At least one replica failed permanently.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSummary {
    pub status: ReplicatedJobStatus,
    pub phase: MemberPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobState {
    Active,
    Succeeded,
    Failed,
}

fn has_true_condition(job: &Job, type_: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == "True")
        })
}

/// A job's terminal conditions are set by the job controller according to
/// its completion mode and backoff limit.
pub(crate) fn job_state(job: &Job) -> JobState {
    if has_true_condition(job, "Failed") {
        JobState::Failed
    } else if has_true_condition(job, "Complete") {
        JobState::Succeeded
    } else {
        JobState::Active
    }
}

pub(crate) fn job_suspended(job: &Job) -> bool {
    job.spec.as_ref().and_then(|s| s.suspend).unwrap_or(false)
}

/// Folds the current attempt's child jobs into one summary per member, in
/// declaration order.
pub fn aggregate(spec: &JobGroupSpec, jobs: &[Job]) -> Vec<MemberSummary> {
    spec.members
        .iter()
        .map(|member| {
            let mut status = ReplicatedJobStatus {
                name: member.name.clone(),
                ..Default::default()
            };
            let owned = jobs.iter().filter(|job| {
                job.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(REPLICATED_JOB_NAME_LABEL))
                    .is_some_and(|name| *name == member.name)
            });
            for job in owned {
                match job_state(job) {
                    JobState::Failed => status.failed += 1,
                    JobState::Succeeded => status.succeeded += 1,
                    JobState::Active if job_suspended(job) => status.suspended += 1,
                    JobState::Active => status.active += 1,
                }
            }

            let phase = if status.failed > 0 {
                MemberPhase::Failed
            } else if status.succeeded >= member.replicas {
                MemberPhase::Completed
            } else {
                MemberPhase::Active
            };
            MemberSummary { status, phase }
        })
        .collect()
}
