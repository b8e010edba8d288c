// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! APM Server reconciliation.
//!
//! APM Server agents authenticate with a secret token. The operator generates
//! it once into `{name}-apm-token` and hands it to the server through the
//! `SECRET_TOKEN` environment variable. Unlike Kibana and Logstash, APM Server
//! runs without an Elasticsearch reference; only a defined reference gates the
//! Deployment on an established association.

use crate::constants::{APM_SERVER_CONTAINER_NAME, APM_SERVER_HTTP_PORT, DEFAULT_APM_SERVER_IMAGE};
use crate::context::Context;
use crate::crd::{ApmServer, AssociationStatus, DeploymentStatus, ObjectSelector};
use crate::errors::Result;
use crate::keystore::KeystoreInit;
use crate::labels::{AssociationLabels, APM_ASSOCIATION_LABELS, APM_SERVER_NAME_LABEL};
use crate::name::{apm_secret_token, Namer, APM_NAMER};
use crate::reconcilers::association::user::generate_password;
use crate::reconcilers::association::Associated;
use crate::reconcilers::driver::{
    http_certificate_path, merge_layers, product_image, reconcile_driver, user_config, Driver,
    DriverInputs, ProductInfo, ProductSpec,
};
use crate::reconcilers::resources::reconcile_secret;
use crate::reconcilers::ReconcileOutcome;
use crate::settings::CanonicalConfig;
use crate::store::{get_if_exists, ObjectStore};
use crate::workloads::{container_port, env_from_secret, PodDefaults};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

/// Key of the token in the APM token secret
pub const SECRET_TOKEN_KEY: &str = "secret-token";

/// Default memory of the APM Server container
pub const DEFAULT_MEMORY: &str = "512Mi";

const CONFIG_MOUNT_PATH: &str = "/usr/share/apm-server/config/config-secret";

const APM_SERVER_INFO: ProductInfo = ProductInfo {
    type_label: "apm-server",
    name_label: APM_SERVER_NAME_LABEL,
    container_name: APM_SERVER_CONTAINER_NAME,
    default_image: DEFAULT_APM_SERVER_IMAGE,
    service_port_name: "http",
    service_port: APM_SERVER_HTTP_PORT,
    config_file: "apm-server.yml",
    config_mount_path: CONFIG_MOUNT_PATH,
    keystore: KeystoreInit {
        create_command: "/usr/share/apm-server/apm-server keystore create --force",
        add_command: r#"/usr/share/apm-server/apm-server keystore add "$key" --stdin --force < "$filename""#,
        data_volume: "apm-server-data",
        data_path: "/usr/share/apm-server/data",
    },
};

/// The APM token secret, keeping an existing token.
fn token_secret(inputs: &DriverInputs<'_>, token: &[u8]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(apm_secret_token(inputs.name)),
            namespace: Some(inputs.namespace.to_string()),
            labels: Some(inputs.labels.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            SECRET_TOKEN_KEY.to_string(),
            ByteString(token.to_vec()),
        )])),
        ..Default::default()
    }
}

/// Ensure the APM token secret exists and holds a token.
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_apm_token<S: ObjectStore + ?Sized>(
    store: &S,
    owner: &OwnerReference,
    inputs: &DriverInputs<'_>,
) -> Result<Secret> {
    let name = apm_secret_token(inputs.name);
    let existing = get_if_exists::<Secret, _>(store, inputs.namespace, &name).await?;
    let token = existing
        .as_ref()
        .and_then(|s| s.data.as_ref())
        .and_then(|d| d.get(SECRET_TOKEN_KEY))
        .filter(|t| !t.0.is_empty())
        .map(|t| t.0.clone());
    let token = match token {
        Some(token) => token,
        None => {
            info!(namespace = %inputs.namespace, name = %inputs.name, "Generating APM Server secret token");
            generate_password().into_bytes()
        }
    };
    reconcile_secret(store, token_secret(inputs, &token), Some(owner)).await
}

impl Associated for ApmServer {
    const PRODUCT: &'static str = "apm";
    const USER_ROLE: &'static str = "apm_system";
    const NAMER: Namer = APM_NAMER;
    const LABELS: AssociationLabels = APM_ASSOCIATION_LABELS;

    fn elasticsearch_ref(&self) -> &ObjectSelector {
        &self.spec.elasticsearch_ref
    }

    fn association_status(&self) -> AssociationStatus {
        self.status
            .as_ref()
            .map(|s| s.association_status)
            .unwrap_or_default()
    }

    fn set_association_status(&mut self, status: AssociationStatus) {
        self.status.get_or_insert_default().association_status = status;
    }
}

#[async_trait]
impl Driver for ApmServer {
    const INFO: ProductInfo = APM_SERVER_INFO;

    fn product_spec(&self) -> ProductSpec<'_> {
        ProductSpec {
            version: &self.spec.version,
            image: self.spec.image.as_deref(),
            count: self.spec.count,
            http: &self.spec.http,
            pod_template: self.spec.pod_template.as_ref(),
            secure_settings: &self.spec.secure_settings,
            config: self.spec.config.as_ref(),
        }
    }

    fn deployment_status(&self) -> Option<&DeploymentStatus> {
        self.status.as_ref()
    }

    fn set_deployment_status(&mut self, status: DeploymentStatus) {
        self.status = Some(status);
    }

    fn requires_association(&self) -> bool {
        self.spec.elasticsearch_ref.is_defined()
    }

    fn build_config(&self, inputs: &DriverInputs<'_>) -> Result<CanonicalConfig> {
        let base = CanonicalConfig::from_pairs([
            ("apm-server.host", json!(format!(":{APM_SERVER_HTTP_PORT}"))),
            ("apm-server.secret_token", json!("${SECRET_TOKEN}")),
        ]);

        let output = match inputs.credentials {
            Some(credentials) if inputs.association.is_some() => {
                let mut pairs = vec![
                    ("output.elasticsearch.hosts", json!([inputs.elasticsearch_url()])),
                    ("output.elasticsearch.username", json!(credentials.username)),
                    ("output.elasticsearch.password", json!(credentials.password)),
                ];
                if let Some(ca) = inputs.elasticsearch_ca_path() {
                    pairs.push(("output.elasticsearch.ssl.certificate_authorities", json!([ca])));
                }
                CanonicalConfig::from_pairs(pairs)
            }
            _ => CanonicalConfig::new(),
        };

        let tls = if inputs.tls_enabled {
            CanonicalConfig::from_pairs([
                ("apm-server.ssl.enabled", json!(true)),
                ("apm-server.ssl.certificate", json!(http_certificate_path("tls.crt"))),
                ("apm-server.ssl.key", json!(http_certificate_path("tls.key"))),
            ])
        } else {
            CanonicalConfig::new()
        };

        Ok(merge_layers(vec![
            base,
            output,
            tls,
            user_config(self.spec.config.as_ref())?,
        ]))
    }

    fn build_workload(&self, inputs: &DriverInputs<'_>) -> PodDefaults {
        PodDefaults {
            container_name: APM_SERVER_CONTAINER_NAME.to_string(),
            image: product_image(&APM_SERVER_INFO, &self.product_spec()),
            labels: inputs.labels.clone(),
            ports: vec![container_port("http", APM_SERVER_HTTP_PORT)],
            env: vec![env_from_secret(
                "SECRET_TOKEN",
                &apm_secret_token(inputs.name),
                SECRET_TOKEN_KEY,
            )],
            args: vec![
                "-e".to_string(),
                "-c".to_string(),
                format!("{CONFIG_MOUNT_PATH}/apm-server.yml"),
            ],
            memory: DEFAULT_MEMORY.to_string(),
            ..Default::default()
        }
    }

    async fn reconcile_extras<S: ObjectStore>(
        &self,
        store: &S,
        owner: &OwnerReference,
        inputs: &DriverInputs<'_>,
    ) -> Result<()> {
        reconcile_apm_token(store, owner, inputs).await?;
        Ok(())
    }
}

/// Reconcile the workload of one APM Server resource.
///
/// # Errors
///
/// Returns errors that should be retried with the controller backoff.
pub async fn reconcile_apm_server<S: ObjectStore>(
    ctx: &Context<S>,
    apm: ApmServer,
) -> anyhow::Result<ReconcileOutcome> {
    reconcile_driver(ctx, apm).await
}

#[cfg(test)]
#[path = "apmserver_tests.rs"]
mod apmserver_tests;
