//! Admission of group writes: defaulting followed by validation.
//!
//! [`admit`] is the whole decision and has no side effects. The HTTPS
//! adapter that feeds it lives in [`webhook`].

mod defaulter;
mod placement;
mod validator;
pub mod webhook;

pub use self::defaulter::apply_defaults;
pub use self::placement::{AllowList, PlacementField};
pub use self::validator::{RejectReason, Rejection, validate_create, validate_update};

use tracing::debug;

use crate::crd::JobGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

#[derive(Debug, Clone)]
pub enum Decision {
    /// The candidate with defaults applied.
    Accept(Box<JobGroup>),
    Reject(Rejection),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accept(_))
    }
}

pub fn admit(
    prior: Option<&JobGroup>,
    candidate: &JobGroup,
    op: Operation,
    allow: &AllowList,
) -> Decision {
    let mut defaulted = candidate.clone();
    apply_defaults(&mut defaulted);

    let result = match (op, prior) {
        (Operation::Create, _) => validate_create(&defaulted),
        (Operation::Update, Some(prior)) => validate_update(prior, &defaulted, allow),
        (Operation::Update, None) => Err(Rejection::new(
            RejectReason::MalformedRequest,
            "update request carries no prior object",
        )),
    };

    match result {
        Ok(()) => Decision::Accept(Box::new(defaulted)),
        Err(rejection) => {
            debug!(
                group = ?defaulted.metadata.name,
                reason = %rejection.reason,
                "rejecting {op:?}: {}",
                rejection.message
            );
            Decision::Reject(rejection)
        }
    }
}
