// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kibana reconciliation.

use crate::constants::{DEFAULT_KIBANA_IMAGE, KIBANA_CONTAINER_NAME, KIBANA_HTTP_PORT};
use crate::context::Context;
use crate::crd::{AssociationStatus, DeploymentStatus, Kibana, ObjectSelector};
use crate::errors::Result;
use crate::keystore::KeystoreInit;
use crate::labels::{AssociationLabels, KIBANA_ASSOCIATION_LABELS, KIBANA_NAME_LABEL};
use crate::name::{Namer, KB_NAMER};
use crate::reconcilers::association::Associated;
use crate::reconcilers::driver::{
    http_certificate_path, merge_layers, product_image, reconcile_driver, user_config, Driver,
    DriverInputs, ProductInfo, ProductSpec,
};
use crate::reconcilers::ReconcileOutcome;
use crate::settings::CanonicalConfig;
use crate::store::ObjectStore;
use crate::workloads::{container_port, PodDefaults};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Default memory of the Kibana container
pub const DEFAULT_MEMORY: &str = "1Gi";

const KIBANA_INFO: ProductInfo = ProductInfo {
    type_label: "kibana",
    name_label: KIBANA_NAME_LABEL,
    container_name: KIBANA_CONTAINER_NAME,
    default_image: DEFAULT_KIBANA_IMAGE,
    service_port_name: "http",
    service_port: KIBANA_HTTP_PORT,
    config_file: "kibana.yml",
    config_mount_path: "/usr/share/kibana/config",
    keystore: KeystoreInit {
        create_command: "/usr/share/kibana/bin/kibana-keystore create",
        add_command: r#"/usr/share/kibana/bin/kibana-keystore add "$key" --stdin < "$filename""#,
        data_volume: "kibana-data",
        data_path: "/usr/share/kibana/data",
    },
};

impl Associated for Kibana {
    const PRODUCT: &'static str = "kibana";
    const USER_ROLE: &'static str = "kibana_system";
    const NAMER: Namer = KB_NAMER;
    const LABELS: AssociationLabels = KIBANA_ASSOCIATION_LABELS;

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
impl Driver for Kibana {
    const INFO: ProductInfo = KIBANA_INFO;

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

    fn build_config(&self, inputs: &DriverInputs<'_>) -> Result<CanonicalConfig> {
        let url = inputs.elasticsearch_url();
        let base = CanonicalConfig::from_pairs([
            ("server.name", json!(inputs.name)),
            ("server.host", json!("0")),
            ("elasticsearch.hosts", json!([url])),
            (
                "xpack.monitoring.ui.container.elasticsearch.enabled",
                json!(true),
            ),
        ]);

        let tls = if inputs.tls_enabled {
            CanonicalConfig::from_pairs([
                ("server.ssl.enabled", json!(true)),
                ("server.ssl.certificate", json!(http_certificate_path("tls.crt"))),
                ("server.ssl.key", json!(http_certificate_path("tls.key"))),
            ])
        } else {
            CanonicalConfig::new()
        };

        let mut es_tls = vec![("elasticsearch.ssl.verificationMode", json!("certificate"))];
        if let Some(ca) = inputs.elasticsearch_ca_path() {
            es_tls.push(("elasticsearch.ssl.certificateAuthorities", Value::String(ca)));
        }

        let credentials = inputs.credentials.map_or_else(CanonicalConfig::new, |c| {
            CanonicalConfig::from_pairs([
                ("elasticsearch.username", json!(c.username)),
                ("elasticsearch.password", json!(c.password)),
            ])
        });

        // 6.x still reads the single URL setting
        let version = if inputs.version.major == 6 {
            CanonicalConfig::from_pairs([("elasticsearch.url", json!(url))])
        } else {
            CanonicalConfig::new()
        };

        Ok(merge_layers(vec![
            base,
            tls,
            CanonicalConfig::from_pairs(es_tls),
            credentials,
            version,
            user_config(self.spec.config.as_ref())?,
        ]))
    }

    fn build_workload(&self, inputs: &DriverInputs<'_>) -> PodDefaults {
        PodDefaults {
            container_name: KIBANA_CONTAINER_NAME.to_string(),
            image: product_image(&KIBANA_INFO, &self.product_spec()),
            labels: inputs.labels.clone(),
            ports: vec![container_port("http", KIBANA_HTTP_PORT)],
            memory: DEFAULT_MEMORY.to_string(),
            ..Default::default()
        }
    }
}

/// Reconcile the workload of one Kibana resource.
///
/// # Errors
///
/// Returns errors that should be retried with the controller backoff.
pub async fn reconcile_kibana<S: ObjectStore>(
    ctx: &Context<S>,
    kb: Kibana,
) -> anyhow::Result<ReconcileOutcome> {
    reconcile_driver(ctx, kb).await
}

#[cfg(test)]
#[path = "kibana_tests.rs"]
mod kibana_tests;
