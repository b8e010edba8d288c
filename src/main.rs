// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use clap::{CommandFactory, Parser};
use elastic_operator::{
    config::{Cli, Command, OperatorParams},
    constants::{
        ERROR_REQUEUE_DURATION_SECS, HEALTH_SERVER_PATH, KIND_APM_SERVER, KIND_ELASTICSEARCH,
        KIND_KIBANA, KIND_LOGSTASH, METRICS_SERVER_PATH,
    },
    context::Context,
    crd::{ApmServer, Elasticsearch, Kibana, Logstash},
    errors::{self, OperatorError},
    events::KubeEventPublisher,
    labels::{ELASTICSEARCH_CLUSTER_NAME_LABEL, MANAGED_BY_OPERATOR, TYPE_LABEL, USER_TYPE},
    metrics,
    observer::HttpClusterHealthObserver,
    reconcilers::{
        apmserver::reconcile_apm_server,
        association::{reconcile_association, Associated},
        elasticsearch::reconcile_elasticsearch,
        kibana::reconcile_kibana,
        logstash::reconcile_logstash,
        ReconcileOutcome,
    },
    store::{KubeStore, StoreObject},
    watches::{ObjectKey, WatchRegistry},
};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{Pod, Secret, Service},
};
use kube::{
    runtime::{controller::Action, reflector::ObjectRef, watcher::Config, Controller},
    Api, Client, Resource, ResourceExt,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

type OperatorContext = Context<KubeStore>;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Completions { shell }) = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            MANAGED_BY_OPERATOR,
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let params = cli.run.resolve()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("elastic-operator")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(params))
}

/// Initialize logging.
///
/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT` (`json` or `text`).
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(params: OperatorParams) -> Result<()> {
    init_tracing();
    info!(
        namespace = ?params.namespace,
        metrics_addr = %params.metrics_addr,
        "Starting Elastic Stack operator"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let base = Context::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client.clone(), MANAGED_BY_OPERATOR)),
        Arc::new(HttpClusterHealthObserver::new()),
        params.clone(),
    );
    let namespace = params.namespace.as_deref();

    info!("Starting all controllers");

    // Controllers never exit on their own; any of them returning stops the operator.
    tokio::select! {
        result = run_metrics_server(params.metrics_addr.clone()) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        result = run_elasticsearch_controller(client.clone(), namespace, base.with_fresh_watches()) => {
            error!("CRITICAL: Elasticsearch controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Elasticsearch controller exited unexpectedly without error")
        }
        result = run_kibana_controller(client.clone(), namespace, base.with_fresh_watches()) => {
            error!("CRITICAL: Kibana controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Kibana controller exited unexpectedly without error")
        }
        result = run_apm_server_controller(client.clone(), namespace, base.with_fresh_watches()) => {
            error!("CRITICAL: ApmServer controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("ApmServer controller exited unexpectedly without error")
        }
        result = run_logstash_controller(client.clone(), namespace, base.with_fresh_watches()) => {
            error!("CRITICAL: Logstash controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Logstash controller exited unexpectedly without error")
        }
        result = run_association_controller::<Kibana>(client.clone(), namespace, base.with_fresh_watches()) => {
            error!("CRITICAL: Kibana association controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Kibana association controller exited unexpectedly without error")
        }
        result = run_association_controller::<ApmServer>(client.clone(), namespace, base.with_fresh_watches()) => {
            error!("CRITICAL: ApmServer association controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("ApmServer association controller exited unexpectedly without error")
        }
        result = run_association_controller::<Logstash>(client.clone(), namespace, base.with_fresh_watches()) => {
            error!("CRITICAL: Logstash association controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Logstash association controller exited unexpectedly without error")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
            Ok(())
        }
    }
}

// ============================================================================
// Metrics and health server
// ============================================================================

fn metrics_router() -> Router {
    Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route(HEALTH_SERVER_PATH, get(health_handler))
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn run_metrics_server(addr: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Serving metrics and health endpoints");
    axum::serve(listener, metrics_router()).await?;
    Ok(())
}

// ============================================================================
// Controller plumbing
// ============================================================================

fn api<K: StoreObject>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Object references of every watcher registered on `watched`.
fn watchers_of<K>(registry: &WatchRegistry, watched: &ObjectKey) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    registry
        .watchers_for(watched)
        .into_iter()
        .map(|key| ObjectRef::new(&key.name).within(&key.namespace))
        .collect()
}

/// Controller action of a finished pass.
fn outcome_action(outcome: ReconcileOutcome) -> Action {
    match outcome.requeue_after {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

/// Validation errors wait for a spec change; everything else is retried.
fn retry_action(err: &anyhow::Error) -> Action {
    if errors::is_validation(err) {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
    }
}

fn error_policy<K: ResourceExt>(resource: Arc<K>, err: &ReconcileError, _ctx: Arc<OperatorContext>) -> Action {
    error!(
        namespace = ?resource.namespace(),
        name = %resource.name_any(),
        error = %err,
        "Reconciliation error"
    );
    retry_action(&err.0)
}

fn finish<K: ResourceExt>(
    kind: &str,
    resource: &K,
    start: Instant,
    result: anyhow::Result<ReconcileOutcome>,
) -> Result<Action, ReconcileError> {
    match result {
        Ok(outcome) => {
            metrics::record_reconciliation_success(kind, start.elapsed());
            debug!(
                kind = %kind,
                namespace = ?resource.namespace(),
                name = %resource.name_any(),
                requeue_after = ?outcome.requeue_after,
                "Reconciliation finished"
            );
            Ok(outcome_action(outcome))
        }
        Err(e) => {
            metrics::record_reconciliation_error(kind, start.elapsed());
            metrics::record_error(
                kind,
                errors::classify(&e).map_or("unknown", OperatorError::category),
            );
            Err(e.into())
        }
    }
}

// ============================================================================
// Elasticsearch
// ============================================================================

async fn run_elasticsearch_controller(
    client: Client,
    namespace: Option<&str>,
    ctx: OperatorContext,
) -> Result<()> {
    info!("Starting Elasticsearch controller");

    let ctx = Arc::new(ctx);
    let secure_settings = ctx.watches.clone();

    Controller::new(api::<Elasticsearch>(&client, namespace), Config::default())
        .owns(api::<StatefulSet>(&client, namespace), Config::default())
        .owns(api::<Service>(&client, namespace), Config::default())
        .owns(api::<Secret>(&client, namespace), Config::default())
        .watches(
            api::<Secret>(&client, namespace),
            Config::default(),
            move |secret| {
                let mut refs =
                    watchers_of::<Elasticsearch>(&secure_settings.secrets, &ObjectKey::of(&secret));
                // User secrets feed the file realm of the cluster they are labeled for.
                let labels = secret.labels();
                if labels.get(TYPE_LABEL).map(String::as_str) == Some(USER_TYPE) {
                    if let Some(cluster) = labels.get(ELASTICSEARCH_CLUSTER_NAME_LABEL) {
                        refs.push(ObjectRef::new(cluster).within(&secret.namespace().unwrap_or_default()));
                    }
                }
                refs
            },
        )
        .watches(
            api::<Pod>(&client, namespace),
            Config::default().labels(ELASTICSEARCH_CLUSTER_NAME_LABEL),
            |pod| {
                pod.labels()
                    .get(ELASTICSEARCH_CLUSTER_NAME_LABEL)
                    .map(|cluster| {
                        ObjectRef::<Elasticsearch>::new(cluster)
                            .within(&pod.namespace().unwrap_or_default())
                    })
            },
        )
        .run(reconcile_elasticsearch_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_elasticsearch_wrapper(
    es: Arc<Elasticsearch>,
    ctx: Arc<OperatorContext>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_elasticsearch(&ctx, (*es).clone()).await;
    finish(KIND_ELASTICSEARCH, es.as_ref(), start, result)
}

// ============================================================================
// Kibana, APM Server and Logstash
// ============================================================================

async fn run_kibana_controller(client: Client, namespace: Option<&str>, ctx: OperatorContext) -> Result<()> {
    info!("Starting Kibana controller");

    let ctx = Arc::new(ctx);
    let watches = ctx.watches.clone();

    Controller::new(api::<Kibana>(&client, namespace), Config::default())
        .owns(api::<Deployment>(&client, namespace), Config::default())
        .owns(api::<Service>(&client, namespace), Config::default())
        .owns(api::<Secret>(&client, namespace), Config::default())
        .watches(api::<Secret>(&client, namespace), Config::default(), move |secret| {
            watchers_of::<Kibana>(&watches.secrets, &ObjectKey::of(&secret))
        })
        .run(reconcile_kibana_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_kibana_wrapper(kb: Arc<Kibana>, ctx: Arc<OperatorContext>) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_kibana(&ctx, (*kb).clone()).await;
    finish(KIND_KIBANA, kb.as_ref(), start, result)
}

async fn run_apm_server_controller(
    client: Client,
    namespace: Option<&str>,
    ctx: OperatorContext,
) -> Result<()> {
    info!("Starting ApmServer controller");

    let ctx = Arc::new(ctx);
    let watches = ctx.watches.clone();

    Controller::new(api::<ApmServer>(&client, namespace), Config::default())
        .owns(api::<Deployment>(&client, namespace), Config::default())
        .owns(api::<Service>(&client, namespace), Config::default())
        .owns(api::<Secret>(&client, namespace), Config::default())
        .watches(api::<Secret>(&client, namespace), Config::default(), move |secret| {
            watchers_of::<ApmServer>(&watches.secrets, &ObjectKey::of(&secret))
        })
        .run(reconcile_apm_server_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_apm_server_wrapper(
    apm: Arc<ApmServer>,
    ctx: Arc<OperatorContext>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_apm_server(&ctx, (*apm).clone()).await;
    finish(KIND_APM_SERVER, apm.as_ref(), start, result)
}

async fn run_logstash_controller(client: Client, namespace: Option<&str>, ctx: OperatorContext) -> Result<()> {
    info!("Starting Logstash controller");

    let ctx = Arc::new(ctx);
    let watches = ctx.watches.clone();

    Controller::new(api::<Logstash>(&client, namespace), Config::default())
        .owns(api::<Deployment>(&client, namespace), Config::default())
        .owns(api::<Service>(&client, namespace), Config::default())
        .owns(api::<Secret>(&client, namespace), Config::default())
        .watches(api::<Secret>(&client, namespace), Config::default(), move |secret| {
            watchers_of::<Logstash>(&watches.secrets, &ObjectKey::of(&secret))
        })
        .run(reconcile_logstash_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_logstash_wrapper(ls: Arc<Logstash>, ctx: Arc<OperatorContext>) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_logstash(&ctx, (*ls).clone()).await;
    finish(KIND_LOGSTASH, ls.as_ref(), start, result)
}

// ============================================================================
// Associations
// ============================================================================

/// Run the association controller of `K`.
///
/// Referenced clusters and secrets may live in any namespace, so both are
/// watched cluster-wide and mapped back through the dynamic watches. The auth
/// and CA secrets owned by the dependent trigger a pass when they change or go
/// away.
async fn run_association_controller<K: Associated>(
    client: Client,
    namespace: Option<&str>,
    ctx: OperatorContext,
) -> Result<()> {
    let kind = K::kind(&()).to_string();
    info!("Starting {} association controller", kind);

    let ctx = Arc::new(ctx);
    let clusters = ctx.watches.clone();
    let secrets = ctx.watches.clone();

    Controller::new(api::<K>(&client, namespace), Config::default())
        .owns(api::<Secret>(&client, namespace), Config::default())
        .watches(Api::<Elasticsearch>::all(client.clone()), Config::default(), move |es| {
            watchers_of::<K>(&clusters.elasticsearch_clusters, &ObjectKey::of(&es))
        })
        .watches(Api::<Secret>::all(client.clone()), Config::default(), move |secret| {
            watchers_of::<K>(&secrets.secrets, &ObjectKey::of(&secret))
        })
        .run(reconcile_association_wrapper::<K>, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_association_wrapper<K: Associated>(
    resource: Arc<K>,
    ctx: Arc<OperatorContext>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let kind = format!("{}Association", K::kind(&()));
    let result = reconcile_association(&ctx, (*resource).clone()).await;
    finish(&kind, resource.as_ref(), start, result)
}
