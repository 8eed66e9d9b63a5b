//! The reconciliation pass and the controller that drives it.
//!
//! A pass reads the group and its children, makes the children match the
//! declared members, aggregates their state, lets the policy engine pick the
//! next lifecycle step and writes the status back guarded by the group's
//! resource version. A pass that loses that race is discarded and the group
//! is reconciled again from scratch.
//!
//! Dispatch is kube's [`Controller`]: it runs at most one pass per group at a
//! time and triggers a group whenever one of the jobs or services it owns
//! changes.

pub mod aggregate;
pub mod children;
mod error;
pub mod policy;

pub use self::error::{ErrorClass, ReconcileError};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Resource};
use tracing::{debug, error, info, instrument, trace, warn};

use self::aggregate::aggregate;
use self::policy::{REASON_INVALID_TEMPLATE, REASON_MISSING_UID, Verdict};
use crate::admission::AllowList;
use crate::config::BackoffConfig;
use crate::crd::{ConditionType, GROUP_NAME_LABEL, GroupKey, JobGroup, JobGroupStatus};
use crate::error::{SpannedErr, SpannedExt, report_span_trace};
use crate::scheduler::Shutdown;
use crate::store::{ClusterStore, StoreError};

/// Delay before retrying a pass that had to wait for old children to go.
const DEFERRED_REQUEUE: Duration = Duration::from_secs(1);

const IMMEDIATELY: Duration = Duration::ZERO;

#[derive(Debug)]
pub struct Context<S> {
    pub store: S,
    pub allow_list: AllowList,
    pub resync_interval: Duration,
    pub backoff: BackoffConfig,
    /// Consecutive transient failures per group.
    failures: Mutex<BTreeMap<GroupKey, u32>>,
}

impl<S> Context<S> {
    pub fn new(
        store: S,
        allow_list: AllowList,
        resync_interval: Duration,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            store,
            allow_list,
            resync_interval,
            backoff,
            failures: Mutex::default(),
        }
    }

    fn record_failure(&self, key: &GroupKey) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.clone()).or_default();
        *count = count.saturating_add(1);
        *count
    }

    fn forget(&self, key: &GroupKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

fn owned<K: Resource>(objects: Vec<K>, uid: &str) -> Vec<K> {
    objects
        .into_iter()
        .filter(|object| children::owned_by(object.meta(), uid))
        .collect()
}

#[instrument(skip(ctx), fields(group = %key))]
pub async fn reconcile<S: ClusterStore>(
    ctx: &Context<S>,
    key: &GroupKey,
) -> Result<Action, SpannedErr<ReconcileError>> {
    let Some(group) = ctx.store.get_group(key).await? else {
        debug!("Group no longer exists.");
        return Ok(Action::await_change());
    };
    if group.metadata.deletion_timestamp.is_some() {
        debug!("Group is being deleted.");
        return Ok(Action::await_change());
    }

    let prior = group.status.clone().unwrap_or_default();
    if prior.is_finished() {
        trace!("Group is finished.");
        return Ok(Action::await_change());
    }

    let Some(resource_version) = group.metadata.resource_version.clone() else {
        return Err(ReconcileError::MissingMetadata(key.to_string())).with_span_trace();
    };

    let mut status = prior.clone();
    let now = Utc::now();

    let Some(owner) = group.controller_owner_ref(&()) else {
        warn!("Group has no uid, its children could not reference it.");
        status.transition(
            ConditionType::Failed,
            REASON_MISSING_UID,
            "the group has no uid to own child jobs",
            now,
        );
        write_status(ctx, key, &resource_version, &prior, &status).await?;
        return Ok(Action::await_change());
    };

    let jobs = owned(ctx.store.list_jobs(key).await?, &owner.uid);
    let services = owned(ctx.store.list_services(key).await?, &owner.uid);
    let plan = children::plan(
        &group,
        &owner,
        &jobs,
        &services,
        prior.restarts,
        &ctx.allow_list,
    );
    let deferred = !plan.deferred.is_empty();

    let current = match children::apply(&ctx.store, &key.namespace, plan).await {
        Ok(current) => current,
        Err(StoreError::Invalid(message)) => {
            warn!("Child job rejected by the API server: {message}");
            // Jobs created earlier in the same apply are running too.
            let jobs = owned(ctx.store.list_jobs(key).await?, &owner.uid);
            children::stop_active(&ctx.store, &key.namespace, &jobs).await?;
            status.transition(ConditionType::Failed, REASON_INVALID_TEMPLATE, message, now);
            write_status(ctx, key, &resource_version, &prior, &status).await?;
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };

    let members = aggregate(&group.spec, &current);
    status.per_member = members.iter().map(|m| m.status.clone()).collect();

    let verdict = policy::evaluate(&group.spec, &members, prior.restarts, prior.current());
    if verdict.is_terminal() {
        children::stop_active(&ctx.store, &key.namespace, &current).await?;
    }

    match &verdict {
        Verdict::Suspend => status.transition(
            ConditionType::Suspended,
            policy::REASON_SUSPENDED,
            "",
            now,
        ),
        Verdict::Resume => {
            status.transition(ConditionType::Resuming, policy::REASON_RESUMING, "", now)
        }
        Verdict::Run => status.transition(ConditionType::Active, policy::REASON_RUNNING, "", now),
        Verdict::Restart { member } => {
            status.restarts += 1;
            let message = format!(
                "replicated job '{member}' failed, starting attempt {}",
                status.restarts
            );
            status.transition(
                ConditionType::Active,
                policy::REASON_RESTARTING,
                message,
                now,
            );
        }
        Verdict::Complete { reason } => {
            status.transition(ConditionType::Completed, reason, "", now)
        }
        Verdict::Fail { reason, message } => {
            status.transition(ConditionType::Failed, reason, message.clone(), now)
        }
    }

    write_status(ctx, key, &resource_version, &prior, &status).await?;

    match verdict {
        Verdict::Restart { member } => {
            info!(
                "Replicated job {member} failed, restarting group (restart {}).",
                status.restarts
            );
            children::delete_all(&ctx.store, &key.namespace, &current).await?;
            Ok(Action::requeue(IMMEDIATELY))
        }
        Verdict::Complete { .. } | Verdict::Fail { .. } => {
            info!("Group finished with {:?}.", verdict.condition());
            Ok(Action::await_change())
        }
        _ if deferred => Ok(Action::requeue(DEFERRED_REQUEUE)),
        _ => Ok(Action::requeue(ctx.resync_interval)),
    }
}

async fn write_status<S: ClusterStore>(
    ctx: &Context<S>,
    key: &GroupKey,
    resource_version: &str,
    prior: &JobGroupStatus,
    status: &JobGroupStatus,
) -> Result<(), StoreError> {
    if status == prior {
        trace!("Status unchanged.");
        return Ok(());
    }
    ctx.store
        .patch_group_status(key, resource_version, status)
        .await
}

async fn reconcile_group<S: ClusterStore>(
    group: Arc<JobGroup>,
    ctx: Arc<Context<S>>,
) -> Result<Action, SpannedErr<ReconcileError>> {
    let Some(key) = GroupKey::of(&group) else {
        return Ok(Action::await_change());
    };
    let action = reconcile(ctx.as_ref(), &key).await?;
    ctx.forget(&key);
    Ok(action)
}

fn error_policy<S: ClusterStore>(
    group: Arc<JobGroup>,
    err: &SpannedErr<ReconcileError>,
    ctx: Arc<Context<S>>,
) -> Action {
    let Some(key) = GroupKey::of(&group) else {
        return Action::await_change();
    };
    match err.inner().class() {
        ErrorClass::Conflict => {
            debug!(group = %key, "Group changed during the pass, starting over.");
            Action::requeue(IMMEDIATELY)
        }
        ErrorClass::Gone => {
            debug!(group = %key, "{err}");
            ctx.forget(&key);
            Action::await_change()
        }
        ErrorClass::Transient => {
            let failures = ctx.record_failure(&key);
            let delay = ctx.backoff.delay(failures);
            warn!(group = %key, failures, ?delay, "Reconciliation failed: {err}");
            Action::requeue(delay)
        }
        ErrorClass::Permanent => {
            error!(group = %key, "Reconciliation failed permanently: {err}");
            report_span_trace(err);
            ctx.forget(&key);
            Action::await_change()
        }
    }
}

/// Reconciles every group visible through `groups` with up to `workers`
/// concurrent passes until shutdown.
pub async fn run<S: ClusterStore>(
    ctx: Arc<Context<S>>,
    groups: Api<JobGroup>,
    jobs: Api<Job>,
    services: Api<Service>,
    workers: u16,
    shutdown: Shutdown,
) {
    let children = watcher::Config::default().labels(GROUP_NAME_LABEL);

    info!("Starting group controller with {workers} workers.");

    Controller::new(groups, watcher::Config::default())
        .owns(jobs, children.clone())
        .owns(services, children)
        .with_config(controller::Config::default().concurrency(workers))
        .graceful_shutdown_on(shutdown.signalled())
        .run(reconcile_group::<S>, error_policy::<S>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((group, action)) => trace!(%group, ?action, "Reconciled."),
                Err(e) => debug!(error = %e, "Reconcile stream reported an error."),
            }
        })
        .await;

    info!("Group controller stopped.");
}
