//! Child job and service planning.
//!
//! [`plan`] compares the declared members with what exists and lists the
//! writes needed; [`apply`] performs them. Re-planning after a successful
//! apply yields an empty plan.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::aggregate::{JobState, job_state, job_suspended};
use crate::admission::AllowList;
use crate::crd::{
    GROUP_NAME_LABEL, JOB_INDEX_LABEL, JobGroup, REPLICATED_JOB_NAME_LABEL, RESTART_ATTEMPT_LABEL,
    ReplicatedJob, child_job_name, member_service_name,
};
use crate::store::{ClusterStore, StoreError};

#[derive(Debug, Default, Clone)]
pub struct ChildPlan {
    pub create_services: Vec<Service>,
    pub create_jobs: Vec<Job>,
    /// Jobs of earlier attempts or of replicas no longer declared.
    pub delete_jobs: Vec<String>,
    pub suspend_jobs: Vec<String>,
    /// Merge patches that unsuspend a job and refresh its placement fields.
    pub resume_jobs: Vec<(String, Value)>,
    /// Desired names still held by a terminating job of an earlier attempt.
    pub deferred: Vec<String>,
    /// Current-attempt jobs that already exist.
    pub existing: Vec<Job>,
}

impl ChildPlan {
    pub fn write_count(&self) -> usize {
        self.create_services.len()
            + self.create_jobs.len()
            + self.delete_jobs.len()
            + self.suspend_jobs.len()
            + self.resume_jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.write_count() == 0
    }
}

fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

fn child_labels(group: &str, member: &str, index: i32, attempt: i32) -> BTreeMap<String, String> {
    BTreeMap::from([
        (GROUP_NAME_LABEL.to_string(), group.to_string()),
        (REPLICATED_JOB_NAME_LABEL.to_string(), member.to_string()),
        (JOB_INDEX_LABEL.to_string(), index.to_string()),
        (RESTART_ATTEMPT_LABEL.to_string(), attempt.to_string()),
    ])
}

/// The child job for replica `index` of `member` in restart attempt `attempt`.
pub fn desired_job(
    group: &JobGroup,
    owner: &OwnerReference,
    member: &ReplicatedJob,
    index: i32,
    attempt: i32,
) -> Job {
    let group_name = group.name_any();
    let labels = child_labels(&group_name, &member.name, index, attempt);
    let template_meta = member.job_template.metadata.clone().unwrap_or_default();

    let mut job_labels = template_meta.labels.unwrap_or_default();
    job_labels.extend(labels.clone());

    let mut spec = member.job_template.spec.clone().unwrap_or_default();
    spec.suspend = Some(group.spec.is_suspended());

    let pod_meta = spec.template.metadata.get_or_insert_with(Default::default);
    pod_meta
        .labels
        .get_or_insert_with(Default::default)
        .extend(labels);

    if member.dns_hostnames_enabled()
        && let Some(pod_spec) = spec.template.spec.as_mut()
    {
        pod_spec.subdomain = Some(member_service_name(&group_name, &member.name));
    }

    Job {
        metadata: ObjectMeta {
            name: Some(child_job_name(&group_name, &member.name, index)),
            namespace: group.namespace(),
            labels: Some(job_labels),
            annotations: template_meta.annotations,
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}

/// Headless service giving the pods of `member` stable DNS names.
pub fn desired_service(group: &JobGroup, owner: &OwnerReference, member: &ReplicatedJob) -> Service {
    let group_name = group.name_any();
    let selector = BTreeMap::from([
        (GROUP_NAME_LABEL.to_string(), group_name.clone()),
        (REPLICATED_JOB_NAME_LABEL.to_string(), member.name.clone()),
    ]);
    Service {
        metadata: ObjectMeta {
            name: Some(member_service_name(&group_name, &member.name)),
            namespace: group.namespace(),
            labels: Some(selector.clone()),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector),
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        status: None,
    }
}

fn resume_patch(member: &ReplicatedJob, job: &Job, allow: &AllowList) -> Value {
    let pod_of = |spec: Option<&JobSpec>| {
        spec.and_then(|s| s.template.spec.clone())
            .unwrap_or_default()
    };
    let current = pod_of(job.spec.as_ref());
    let desired = pod_of(member.job_template.spec.as_ref());
    json!({
        "spec": {
            "suspend": false,
            "template": {
                "spec": allow.patch_towards(&current, &desired),
            },
        },
    })
}

pub fn suspend_patch() -> Value {
    json!({ "spec": { "suspend": true } })
}

fn in_attempt(job: &Job, attempt: &str) -> bool {
    label(&job.metadata, RESTART_ATTEMPT_LABEL) == Some(attempt)
}

/// Whether `meta` names the group with `uid` among its owners. Children of
/// an earlier group that had the same name do not count.
pub fn owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|owner| owner.uid == uid)
}

fn is_terminating(job: &Job) -> bool {
    job.metadata.deletion_timestamp.is_some()
}

/// Plans the writes that make the children of `group` match attempt
/// `attempt`. Jobs that already finished are left as they are. No job is
/// created while the group is suspended.
pub fn plan(
    group: &JobGroup,
    owner: &OwnerReference,
    observed_jobs: &[Job],
    observed_services: &[Service],
    attempt: i32,
    allow: &AllowList,
) -> ChildPlan {
    let mut plan = ChildPlan::default();
    let group_name = group.name_any();
    let suspended = group.spec.is_suspended();
    let attempt_label = attempt.to_string();

    let mut observed: HashMap<&str, &Job> = HashMap::new();
    for job in observed_jobs {
        if let Some(name) = job.metadata.name.as_deref() {
            observed.insert(name, job);
        }
    }

    for member in &group.spec.members {
        if member.dns_hostnames_enabled() {
            let name = member_service_name(&group_name, &member.name);
            let exists = observed_services
                .iter()
                .any(|s| s.metadata.name.as_deref() == Some(name.as_str()));
            if !exists {
                plan.create_services.push(desired_service(group, owner, member));
            }
        }
    }

    let mut desired_names = Vec::new();
    for member in &group.spec.members {
        for index in 0..member.replicas {
            let name = child_job_name(&group_name, &member.name, index);
            match observed.get(name.as_str()) {
                None if suspended => {}
                None => plan
                    .create_jobs
                    .push(desired_job(group, owner, member, index, attempt)),
                Some(job) if !in_attempt(job, &attempt_label) || is_terminating(job) => {
                    if !suspended {
                        plan.deferred.push(name.clone());
                    }
                }
                Some(job) => {
                    plan.existing.push((*job).clone());
                    if job_state(job) == JobState::Active {
                        match (suspended, job_suspended(job)) {
                            (true, false) => plan.suspend_jobs.push(name.clone()),
                            (false, true) => plan
                                .resume_jobs
                                .push((name.clone(), resume_patch(member, job, allow))),
                            _ => {}
                        }
                    }
                }
            }
            desired_names.push(name);
        }
    }

    for job in observed_jobs {
        let Some(name) = job.metadata.name.as_deref() else {
            continue;
        };
        if is_terminating(job) {
            continue;
        }
        if !in_attempt(job, &attempt_label) || !desired_names.iter().any(|d| d == name) {
            plan.delete_jobs.push(name.to_string());
        }
    }

    plan
}

/// Performs `plan` and returns the current-attempt jobs as they are after
/// the writes. A create rejected as invalid aborts with
/// [`StoreError::Invalid`].
#[instrument(skip_all, fields(writes = plan.write_count()))]
pub async fn apply<S: ClusterStore>(
    store: &S,
    namespace: &str,
    plan: ChildPlan,
) -> Result<Vec<Job>, StoreError> {
    for name in &plan.delete_jobs {
        info!("Deleting stale child job {name}.");
        store.delete_job(namespace, name).await?;
    }

    for service in &plan.create_services {
        debug!("Creating service {:?}.", service.metadata.name);
        store.create_service(namespace, service).await?;
    }

    let mut current = plan.existing;
    for (name, patch) in &plan.resume_jobs {
        info!("Resuming child job {name}.");
        let patched = store.patch_job(namespace, name, patch).await?;
        replace(&mut current, patched);
    }
    for name in &plan.suspend_jobs {
        info!("Suspending child job {name}.");
        let patched = store.patch_job(namespace, name, &suspend_patch()).await?;
        replace(&mut current, patched);
    }

    for job in &plan.create_jobs {
        debug!("Creating child job {:?}.", job.metadata.name);
        match store.create_job(namespace, job).await {
            Ok(created) => current.push(created),
            Err(StoreError::AlreadyExists) => {
                warn!("Child job {:?} appeared concurrently.", job.metadata.name);
            }
            Err(e) => return Err(e),
        }
    }

    if !plan.deferred.is_empty() {
        debug!(
            "Deferring {} child jobs until earlier attempts are gone.",
            plan.deferred.len()
        );
    }

    Ok(current)
}

fn replace(jobs: &mut [Job], patched: Job) {
    if let Some(slot) = jobs
        .iter_mut()
        .find(|j| j.metadata.name == patched.metadata.name)
    {
        *slot = patched;
    }
}

/// Suspends every job that has not finished yet.
pub async fn stop_active<S: ClusterStore>(
    store: &S,
    namespace: &str,
    jobs: &[Job],
) -> Result<(), StoreError> {
    let running = jobs
        .iter()
        .filter(|job| job_state(job) == JobState::Active && !job_suspended(job));
    for job in running {
        let name = job.name_any();
        info!("Stopping child job {name}.");
        store.patch_job(namespace, &name, &suspend_patch()).await?;
    }
    Ok(())
}

/// Deletes every child job of the group, regardless of attempt.
pub async fn delete_all<S: ClusterStore>(
    store: &S,
    namespace: &str,
    jobs: &[Job],
) -> Result<(), StoreError> {
    for job in jobs.iter().filter(|job| !is_terminating(job)) {
        store.delete_job(namespace, &job.name_any()).await?;
    }
    Ok(())
}
