use std::collections::BTreeMap;
use std::sync::Mutex;

use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use super::{ClusterStore, StoreError};
use crate::crd::{GROUP_NAME_LABEL, GroupKey, JobGroup, JobGroupStatus};

type ObjectKey = (String, String);

#[derive(Default)]
struct Objects {
    version: u64,
    groups: BTreeMap<GroupKey, JobGroup>,
    jobs: BTreeMap<ObjectKey, Job>,
    services: BTreeMap<ObjectKey, Service>,
    writes: usize,
    terminating_deletes: bool,
    /// Name prefix and message of job creates rejected as invalid.
    reject_creates: Option<(String, String)>,
    race_status_write: bool,
}

impl Objects {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-memory object store with resource versions, used by reconciler tests.
#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: Mutex<Objects>,
}

fn owned_by(labels: &Option<BTreeMap<String, String>>, key: &GroupKey) -> bool {
    labels
        .as_ref()
        .and_then(|l| l.get(GROUP_NAME_LABEL))
        .is_some_and(|name| *name == key.name)
}

impl MemoryStore {
    pub(crate) fn insert_group(&self, mut group: JobGroup) -> GroupKey {
        let mut objects = self.objects.lock().unwrap();
        let key = GroupKey::of(&group).expect("test group needs namespace and name");
        group.metadata.resource_version = Some(objects.next_version());
        if group.metadata.uid.is_none() {
            group.metadata.uid = Some(format!("uid-{}", key.name));
        }
        objects.groups.insert(key.clone(), group);
        key
    }

    /// Replaces the spec as an accepted user update would.
    pub(crate) fn update_spec(&self, key: &GroupKey, update: impl FnOnce(&mut JobGroup)) {
        let mut objects = self.objects.lock().unwrap();
        let version = objects.next_version();
        let group = objects.groups.get_mut(key).unwrap();
        update(group);
        group.metadata.resource_version = Some(version);
    }

    pub(crate) fn group(&self, key: &GroupKey) -> JobGroup {
        self.objects.lock().unwrap().groups[key].clone()
    }

    pub(crate) fn jobs(&self) -> Vec<Job> {
        self.objects.lock().unwrap().jobs.values().cloned().collect()
    }

    pub(crate) fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.objects
            .lock()
            .unwrap()
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub(crate) fn services(&self) -> Vec<Service> {
        self.objects.lock().unwrap().services.values().cloned().collect()
    }

    pub(crate) fn writes(&self) -> usize {
        self.objects.lock().unwrap().writes
    }

    /// Deleted jobs linger with a deletion timestamp until `purge_terminating`.
    pub(crate) fn keep_terminating_jobs(&self) {
        self.objects.lock().unwrap().terminating_deletes = true;
    }

    pub(crate) fn purge_terminating(&self) {
        self.objects
            .lock()
            .unwrap()
            .jobs
            .retain(|_, job| job.metadata.deletion_timestamp.is_none());
    }

    pub(crate) fn reject_creates(&self, message: &str) {
        self.reject_creates_for("", message);
    }

    /// Rejects creates of jobs whose name starts with `prefix`.
    pub(crate) fn reject_creates_for(&self, prefix: &str, message: &str) {
        self.objects.lock().unwrap().reject_creates =
            Some((prefix.to_string(), message.to_string()));
    }

    /// Stores a job as if something other than this pass had created it.
    pub(crate) fn insert_job(&self, mut job: Job) {
        let mut objects = self.objects.lock().unwrap();
        let namespace = job.metadata.namespace.clone().unwrap();
        let name = job.metadata.name.clone().unwrap();
        job.metadata.resource_version = Some(objects.next_version());
        objects.jobs.insert((namespace, name), job);
    }

    /// The next status write loses the race against a concurrent writer.
    pub(crate) fn race_next_status_write(&self) {
        self.objects.lock().unwrap().race_status_write = true;
    }

    /// Marks a child job finished the way the job controller would.
    pub(crate) fn finish_job(&self, namespace: &str, name: &str, succeeded: bool) {
        let mut objects = self.objects.lock().unwrap();
        let job = objects
            .jobs
            .get_mut(&(namespace.to_string(), name.to_string()))
            .unwrap();
        let condition_type = if succeeded { "Complete" } else { "Failed" };
        job.status = Some(JobStatus {
            active: Some(0),
            succeeded: Some(i32::from(succeeded)),
            failed: Some(i32::from(!succeeded)),
            conditions: Some(vec![JobCondition {
                type_: condition_type.to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
    }
}

impl ClusterStore for MemoryStore {
    async fn get_group(&self, key: &GroupKey) -> Result<Option<JobGroup>, StoreError> {
        Ok(self.objects.lock().unwrap().groups.get(key).cloned())
    }

    async fn list_jobs(&self, key: &GroupKey) -> Result<Vec<Job>, StoreError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .jobs
            .iter()
            .filter(|((ns, _), job)| *ns == key.namespace && owned_by(&job.metadata.labels, key))
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, StoreError> {
        let mut objects = self.objects.lock().unwrap();
        let name = job.metadata.name.clone().unwrap_or_default();
        if let Some((prefix, message)) = &objects.reject_creates
            && name.starts_with(prefix.as_str())
        {
            return Err(StoreError::Invalid(message.clone()));
        }
        let object_key = (namespace.to_string(), name.clone());
        if objects.jobs.contains_key(&object_key) {
            return Err(StoreError::AlreadyExists);
        }
        let mut created = job.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(format!("uid-{name}"));
        created.metadata.resource_version = Some(objects.next_version());
        objects.writes += 1;
        objects.jobs.insert(object_key, created.clone());
        Ok(created)
    }

    async fn patch_job(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Job, StoreError> {
        let mut objects = self.objects.lock().unwrap();
        let object_key = (namespace.to_string(), name.to_string());
        let job = objects.jobs.get(&object_key).ok_or(StoreError::NotFound)?;
        let mut value = serde_json::to_value(job).unwrap();
        json_patch::merge(&mut value, patch);
        let patched: Job = serde_json::from_value(value).unwrap();
        objects.writes += 1;
        objects.jobs.insert(object_key, patched.clone());
        Ok(patched)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        let object_key = (namespace.to_string(), name.to_string());
        objects.writes += 1;
        if objects.terminating_deletes {
            if let Some(job) = objects.jobs.get_mut(&object_key) {
                job.metadata.deletion_timestamp = Some(Time(Default::default()));
            }
        } else {
            objects.jobs.remove(&object_key);
        }
        Ok(())
    }

    async fn list_services(&self, key: &GroupKey) -> Result<Vec<Service>, StoreError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .services
            .iter()
            .filter(|((ns, _), svc)| *ns == key.namespace && owned_by(&svc.metadata.labels, key))
            .map(|(_, svc)| svc.clone())
            .collect())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        let name = service.metadata.name.clone().unwrap_or_default();
        objects.writes += 1;
        objects
            .services
            .entry((namespace.to_string(), name))
            .or_insert_with(|| service.clone());
        Ok(())
    }

    async fn patch_group_status(
        &self,
        key: &GroupKey,
        resource_version: &str,
        status: &JobGroupStatus,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        if std::mem::take(&mut objects.race_status_write) {
            let raced = objects.next_version();
            if let Some(group) = objects.groups.get_mut(key) {
                group.metadata.resource_version = Some(raced);
            }
        }
        let version = objects.next_version();
        let group = objects.groups.get_mut(key).ok_or(StoreError::NotFound)?;
        if group.metadata.resource_version.as_deref() != Some(resource_version) {
            return Err(StoreError::Conflict);
        }
        group.status = Some(status.clone());
        group.metadata.resource_version = Some(version);
        objects.writes += 1;
        Ok(())
    }
}
