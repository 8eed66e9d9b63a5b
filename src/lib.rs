use std::path::Path;
use std::sync::Arc;

use self::admission::webhook::{self, WebhookError, WebhookState};
use self::cli::{Cli, Command};
use self::controller::Context;
use self::error::SpannedErr;
use self::scheduler::Shutdown;
use self::store::KubeStore;
use clap::Parser;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use thiserror::Error;
use tokio::select;
use tracing::info;
use tracing_error::ExtractSpanTrace;
use tracing_error::SpanTrace;

pub mod admission;
pub(crate) mod cli;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod scheduler;
pub mod store;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to load config.\n{0}")]
    ConfigError(#[from] config::ConfigLoadError),

    #[error("Failed to initialize kubernetes client.\n{0}")]
    KubeClientError(#[from] kube::Error),

    #[error("Failed to render the CustomResourceDefinition.\n{0}")]
    CrdError(#[from] serde_yaml::Error),

    #[error("Admission webhook stopped due to following error:\n{0}")]
    WebhookError(#[from] SpannedErr<WebhookError>),

    #[error("Background task failed.\n{0}")]
    TaskError(#[from] tokio::task::JoinError),
}

impl ExtractSpanTrace for AppError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            AppError::WebhookError(e) => e.span_trace(),
            _ => None,
        }
    }
}

pub async fn app() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Crd {} => {
            print!("{}", crd::crd_yaml()?);
            Ok(())
        }
        Command::Run {} => run(&cli.config).await,
    }
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn run(config_path: &Path) -> Result<(), AppError> {
    let config = config::Config::new_from_file(config_path).await?;

    info!("Config Loaded.");

    let client = kube::Client::try_default().await?;

    info!("Kubernetes Client Initialized.");

    let shutdown = Shutdown::new();
    let ctx = Arc::new(Context::new(
        KubeStore::new(client.clone(), config.field_manager.clone()),
        config.allow_list.clone(),
        config.resync_interval,
        config.backoff,
    ));

    let namespace = config.namespace.as_deref();
    let controller = controller::run(
        ctx,
        scoped_api(&client, namespace),
        scoped_api(&client, namespace),
        scoped_api(&client, namespace),
        config.workers,
        shutdown.clone(),
    );

    match config.webhook.clone() {
        Some(webhook_config) => {
            let state = WebhookState {
                allow_list: config.allow_list.clone(),
            };
            let mut server = tokio::spawn(webhook::serve(webhook_config, state, shutdown));
            tokio::pin!(controller);
            select! {
                _ = &mut controller => server.await??,
                served = &mut server => {
                    served??;
                    controller.await;
                }
            }
        }
        None => controller.await,
    }

    info!("Shutdown complete.");
    Ok(())
}
