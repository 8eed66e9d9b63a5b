//! Access to the cluster object store.
//!
//! The reconciler only talks to the cluster through [`ClusterStore`], so a
//! pass can run against the API server or against an in-memory store in tests.

mod kube_store;
#[cfg(test)]
pub(crate) mod memory;

pub use self::kube_store::KubeStore;

use std::future::Future;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use thiserror::Error;

use crate::crd::{GroupKey, JobGroup, JobGroupStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,

    #[error("object was modified concurrently")]
    Conflict,

    #[error("object already exists")]
    AlreadyExists,

    #[error("object rejected as invalid: {0}")]
    Invalid(String),

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound,
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict,
            kube::Error::Api(ae) if ae.code == 422 => StoreError::Invalid(ae.message.clone()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// CRUD on groups and their children. Futures are `Send` so passes can run
/// on the worker pool.
pub trait ClusterStore: Send + Sync + 'static {
    fn get_group(
        &self,
        key: &GroupKey,
    ) -> impl Future<Output = Result<Option<JobGroup>, StoreError>> + Send;

    /// Child jobs labelled with the group's name, across all restart attempts.
    fn list_jobs(&self, key: &GroupKey)
    -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    fn create_job(
        &self,
        namespace: &str,
        job: &Job,
    ) -> impl Future<Output = Result<Job, StoreError>> + Send;

    /// JSON merge patch on a child job.
    fn patch_job(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> impl Future<Output = Result<Job, StoreError>> + Send;

    /// Deletes a child job together with its pods.
    fn delete_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn list_services(
        &self,
        key: &GroupKey,
    ) -> impl Future<Output = Result<Vec<Service>, StoreError>> + Send;

    fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replaces the group status if the group is still at `resource_version`,
    /// otherwise fails with [`StoreError::Conflict`].
    fn patch_group_status(
        &self,
        key: &GroupKey,
        resource_version: &str,
        status: &JobGroupStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
