use super::aggregate::{MemberPhase, MemberSummary};
use crate::crd::{ConditionType, JobGroupSpec, Operator};

pub const REASON_SUSPENDED: &str = "SuspendRequested";
pub const REASON_RESUMING: &str = "ResumeRequested";
pub const REASON_RUNNING: &str = "ChildJobsRunning";
pub const REASON_RESTARTING: &str = "GroupRestarted";
pub const REASON_ALL_TARGETS_COMPLETED: &str = "AllTargetsCompleted";
pub const REASON_TARGET_COMPLETED: &str = "TargetCompleted";
pub const REASON_MAX_RESTARTS: &str = "MaxRestartsReached";
pub const REASON_MEMBER_FAILED: &str = "ReplicatedJobFailed";
pub const REASON_INVALID_TEMPLATE: &str = "InvalidJobTemplate";
pub const REASON_MISSING_UID: &str = "MissingUID";

/// Next lifecycle step of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Suspend,
    Resume,
    Run,
    /// Discard every child and start a new attempt.
    Restart { member: String },
    Complete { reason: &'static str },
    Fail { reason: &'static str, message: String },
}

impl Verdict {
    pub fn condition(&self) -> ConditionType {
        match self {
            Verdict::Suspend => ConditionType::Suspended,
            Verdict::Resume => ConditionType::Resuming,
            Verdict::Run | Verdict::Restart { .. } => ConditionType::Active,
            Verdict::Complete { .. } => ConditionType::Completed,
            Verdict::Fail { .. } => ConditionType::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Complete { .. } | Verdict::Fail { .. })
    }
}

/// Decides the next step from the aggregated members.
///
/// Precedence is suspend, failure, success, resume, then active. A failed
/// member restarts the group while `restarts < maxRestarts`.
pub fn evaluate(
    spec: &JobGroupSpec,
    members: &[MemberSummary],
    restarts: i32,
    current: Option<ConditionType>,
) -> Verdict {
    if spec.is_suspended() {
        return Verdict::Suspend;
    }

    if let Some(failed) = members.iter().find(|m| m.phase == MemberPhase::Failed) {
        let max_restarts = spec.max_restarts();
        let member = failed.status.name.clone();
        if restarts < max_restarts {
            return Verdict::Restart { member };
        }
        return if spec.failure_policy.is_some() {
            Verdict::Fail {
                reason: REASON_MAX_RESTARTS,
                message: format!(
                    "replicated job '{member}' failed after {restarts} of {max_restarts} restarts"
                ),
            }
        } else {
            Verdict::Fail {
                reason: REASON_MEMBER_FAILED,
                message: format!("replicated job '{member}' failed"),
            }
        };
    }

    if let Some(reason) = success(spec, members) {
        return Verdict::Complete { reason };
    }

    if current == Some(ConditionType::Suspended) {
        return Verdict::Resume;
    }
    Verdict::Run
}

fn success(spec: &JobGroupSpec, members: &[MemberSummary]) -> Option<&'static str> {
    let policy = spec.success_policy.clone().unwrap_or_default();
    let mut targeted = members
        .iter()
        .filter(|m| policy.targets_member(&m.status.name))
        .peekable();
    targeted.peek()?;

    match policy.operator {
        Operator::All => targeted
            .all(|m| m.phase == MemberPhase::Completed)
            .then_some(REASON_ALL_TARGETS_COMPLETED),
        Operator::Any => targeted
            .any(|m| m.phase == MemberPhase::Completed)
            .then_some(REASON_TARGET_COMPLETED),
    }
}
