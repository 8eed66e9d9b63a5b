use derive_debug::Dbg;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::{Instrument, trace_span};

use super::{ClusterStore, StoreError};
use crate::crd::{GroupKey, JobGroup, JobGroupStatus};

#[derive(Dbg, Clone)]
pub struct KubeStore {
    #[dbg(skip)]
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

impl ClusterStore for KubeStore {
    async fn get_group(&self, key: &GroupKey) -> Result<Option<JobGroup>, StoreError> {
        let api: Api<JobGroup> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get_opt(&key.name)
            .instrument(trace_span!("get_jobgroup", group = %key))
            .await
            .map_err(StoreError::from)
    }

    async fn list_jobs(&self, key: &GroupKey) -> Result<Vec<Job>, StoreError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &key.namespace);
        let params = ListParams::default().labels(&key.label_selector());
        let list = api
            .list(&params)
            .instrument(trace_span!("list_child_jobs", group = %key))
            .await?;
        Ok(list.items)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, StoreError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&self.post_params(), job)
            .instrument(trace_span!(
                "create_child_job",
                kubernetes_namespace = %namespace,
                job_name = ?job.metadata.name
            ))
            .await
            .map_err(StoreError::from)
    }

    async fn patch_job(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Job, StoreError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &self.patch_params(), &Patch::Merge(patch))
            .instrument(trace_span!(
                "patch_child_job",
                kubernetes_namespace = %namespace,
                job_name = %name
            ))
            .await
            .map_err(StoreError::from)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete(name, &DeleteParams::background())
            .instrument(trace_span!(
                "delete_child_job",
                kubernetes_namespace = %namespace,
                job_name = %name
            ))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match StoreError::from(e) {
                StoreError::NotFound => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn list_services(&self, key: &GroupKey) -> Result<Vec<Service>, StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &key.namespace);
        let params = ListParams::default().labels(&key.label_selector());
        let list = api
            .list(&params)
            .instrument(trace_span!("list_member_services", group = %key))
            .await?;
        Ok(list.items)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api
            .create(&self.post_params(), service)
            .instrument(trace_span!(
                "create_member_service",
                kubernetes_namespace = %namespace,
                service_name = ?service.metadata.name
            ))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match StoreError::from(e) {
                StoreError::AlreadyExists => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn patch_group_status(
        &self,
        key: &GroupKey,
        resource_version: &str,
        status: &JobGroupStatus,
    ) -> Result<(), StoreError> {
        let api: Api<JobGroup> = Api::namespaced(self.client.clone(), &key.namespace);
        // The resourceVersion turns the merge patch into a compare-and-swap.
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version,
            },
            "status": status,
        });
        api.patch_status(&key.name, &self.patch_params(), &Patch::Merge(&patch))
            .instrument(trace_span!("patch_jobgroup_status", group = %key))
            .await?;
        Ok(())
    }
}
