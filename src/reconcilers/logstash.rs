// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Logstash reconciliation.
//!
//! Besides the shared [`driver`](super::driver) pass, Logstash owns a pipeline
//! ConfigMap `{name}-ls-pipeline`. Its `input_main.conf` and `output_main.conf`
//! default to a beats input and an output to the associated Elasticsearch
//! cluster; user provided pipelines are written as they are.

use crate::constants::{
    DEFAULT_LOGSTASH_IMAGE, LOGSTASH_BEATS_PORT, LOGSTASH_CONTAINER_NAME, LOGSTASH_MONITOR_PORT,
};
use crate::context::Context;
use crate::crd::{AssociationStatus, DeploymentStatus, Logstash, ObjectSelector};
use crate::errors::Result;
use crate::keystore::KeystoreInit;
use crate::labels::{AssociationLabels, LOGSTASH_ASSOCIATION_LABELS, LOGSTASH_NAME_LABEL};
use crate::name::{logstash_pipeline_config_map, Namer, LS_NAMER};
use crate::reconcilers::association::Associated;
use crate::reconcilers::driver::{
    http_certificate_path, merge_layers, product_image, reconcile_driver, user_config, Driver,
    DriverInputs, ProductInfo, ProductSpec,
};
use crate::reconcilers::resources::reconcile_config_map;
use crate::reconcilers::ReconcileOutcome;
use crate::settings::CanonicalConfig;
use crate::store::ObjectStore;
use crate::workloads::{container, container_port, env_var, memory_request, PodDefaults, VolumeSpec};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Volume of the pipeline ConfigMap
pub const PIPELINE_VOLUME_NAME: &str = "pipeline";

/// Mount path of the pipeline ConfigMap
pub const PIPELINE_MOUNT_PATH: &str = "/usr/share/logstash/pipeline";

/// File mode of the pipeline files
pub const PIPELINE_VOLUME_MODE: i32 = 420;

/// Pipeline ConfigMap key of the input configuration
pub const INPUT_CONF_KEY: &str = "input_main.conf";

/// Pipeline ConfigMap key of the output configuration
pub const OUTPUT_CONF_KEY: &str = "output_main.conf";

/// Default memory of the Logstash container
pub const DEFAULT_MEMORY: &str = "1Gi";

const DATA_VOLUME_NAME: &str = "logstash-data";
const DATA_MOUNT_PATH: &str = "/usr/share/logstash/data";

const LOGSTASH_INFO: ProductInfo = ProductInfo {
    type_label: "logstash",
    name_label: LOGSTASH_NAME_LABEL,
    container_name: LOGSTASH_CONTAINER_NAME,
    default_image: DEFAULT_LOGSTASH_IMAGE,
    service_port_name: "beats",
    service_port: LOGSTASH_BEATS_PORT,
    config_file: "logstash.yml",
    config_mount_path: "/mnt/elastic-internal/logstash-config",
    keystore: KeystoreInit {
        create_command: "/usr/share/logstash/bin/logstash-keystore create",
        add_command: r#"/usr/share/logstash/bin/logstash-keystore add "$key" --stdin < "$filename""#,
        data_volume: DATA_VOLUME_NAME,
        data_path: DATA_MOUNT_PATH,
    },
};

const INPUT_TEMPLATE: &str = r"input {
  beats {
    port => 5044
  }
}
";

/// Default beats input pipeline.
#[must_use]
pub fn default_input_conf() -> String {
    INPUT_TEMPLATE.to_string()
}

/// Default output pipeline shipping to the associated cluster.
///
/// `ssl` follows the scheme of the cluster URL.
#[must_use]
pub fn default_output_conf(inputs: &DriverInputs<'_>) -> String {
    let (user, password) = inputs
        .credentials
        .map(|c| (c.username.as_str(), c.password.as_str()))
        .unwrap_or_default();
    let cacert = inputs
        .elasticsearch_ca_path()
        .map(|path| format!("    cacert => \"{path}\"\n"))
        .unwrap_or_default();
    format!(
        r#"output {{
  elasticsearch {{
    hosts => ["{url}"]
    user => "{user}"
    password => "{password}"
    manage_template => false
    index => "%{{[@metadata][beat]}}-%{{+YYYY.MM.dd}}"
    ssl => {ssl}
{cacert}  }}
}}
"#,
        url = inputs.elasticsearch_url(),
        ssl = inputs.elasticsearch_url().starts_with("https://"),
    )
}

/// The pipeline ConfigMap, with templates for blank pipelines.
#[must_use]
pub fn pipeline_config_map(ls: &Logstash, inputs: &DriverInputs<'_>) -> ConfigMap {
    let input = if ls.spec.input_conf.trim().is_empty() {
        default_input_conf()
    } else {
        ls.spec.input_conf.clone()
    };
    let output = if ls.spec.output_conf.trim().is_empty() {
        default_output_conf(inputs)
    } else {
        ls.spec.output_conf.clone()
    };
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(logstash_pipeline_config_map(inputs.name)),
            namespace: Some(inputs.namespace.to_string()),
            labels: Some(inputs.labels.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (INPUT_CONF_KEY.to_string(), input),
            (OUTPUT_CONF_KEY.to_string(), output),
        ])),
        ..Default::default()
    }
}

/// JVM heap options matching a memory quantity, e.g. `1Gi` gives `-Xmx1g -Xms1g`.
#[must_use]
pub fn java_opts(memory: &str) -> String {
    let heap = memory.replace("Gi", "g").replace("Mi", "m");
    format!("-Xmx{heap} -Xms{heap}")
}

/// Settings of the Logstash 6.0 to 6.5 line.
fn settings_v6(inputs: &DriverInputs<'_>) -> CanonicalConfig {
    CanonicalConfig::from_pairs([(
        "xpack.monitoring.elasticsearch.url",
        json!(inputs.elasticsearch_url()),
    )])
}

/// Version specific settings.
fn version_settings(inputs: &DriverInputs<'_>) -> CanonicalConfig {
    if inputs.version.major == 6 && !inputs.version.at_least(6, 6) {
        settings_v6(inputs)
    } else {
        CanonicalConfig::new()
    }
}

impl Associated for Logstash {
    const PRODUCT: &'static str = "logstash";
    const USER_ROLE: &'static str = "logstash_system";
    const NAMER: Namer = LS_NAMER;
    const LABELS: AssociationLabels = LOGSTASH_ASSOCIATION_LABELS;

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
impl Driver for Logstash {
    const INFO: ProductInfo = LOGSTASH_INFO;

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
            ("node.name", json!(inputs.name)),
            ("http.host", json!("0.0.0.0")),
            ("http.port", json!(LOGSTASH_MONITOR_PORT)),
            ("path.config", json!(PIPELINE_MOUNT_PATH)),
            ("xpack.monitoring.enabled", json!(true)),
            ("xpack.monitoring.elasticsearch.hosts", json!([url])),
        ]);

        let tls = if inputs.tls_enabled {
            CanonicalConfig::from_pairs([
                ("api.ssl.enabled", json!(true)),
                ("api.ssl.certificate", json!(http_certificate_path("tls.crt"))),
                ("api.ssl.key", json!(http_certificate_path("tls.key"))),
            ])
        } else {
            CanonicalConfig::new()
        };

        let mut es_tls = vec![(
            "xpack.monitoring.elasticsearch.ssl.verification_mode",
            json!("certificate"),
        )];
        if let Some(ca) = inputs.elasticsearch_ca_path() {
            es_tls.push((
                "xpack.monitoring.elasticsearch.ssl.certificate_authority",
                Value::String(ca),
            ));
        }

        let credentials = inputs.credentials.map_or_else(CanonicalConfig::new, |c| {
            CanonicalConfig::from_pairs([
                ("xpack.monitoring.elasticsearch.username", json!(c.username)),
                ("xpack.monitoring.elasticsearch.password", json!(c.password)),
            ])
        });

        Ok(merge_layers(vec![
            base,
            tls,
            CanonicalConfig::from_pairs(es_tls),
            credentials,
            version_settings(inputs),
            user_config(self.spec.config.as_ref())?,
        ]))
    }

    fn build_workload(&self, inputs: &DriverInputs<'_>) -> PodDefaults {
        let memory = self
            .spec
            .pod_template
            .as_ref()
            .and_then(|t| container(t, LOGSTASH_CONTAINER_NAME))
            .and_then(memory_request)
            .unwrap_or_else(|| DEFAULT_MEMORY.to_string());

        PodDefaults {
            container_name: LOGSTASH_CONTAINER_NAME.to_string(),
            image: product_image(&LOGSTASH_INFO, &self.product_spec()),
            labels: inputs.labels.clone(),
            ports: vec![
                container_port("monitor", LOGSTASH_MONITOR_PORT),
                container_port("beats", LOGSTASH_BEATS_PORT),
            ],
            env: vec![
                env_var("ELASTICSEARCH_HOST", inputs.elasticsearch_url()),
                env_var("LS_JAVA_OPTS", &java_opts(&memory)),
                env_var("HTTP_HOST", "0.0.0.0"),
                env_var("HTTP_PORT", &LOGSTASH_MONITOR_PORT.to_string()),
                env_var("CONFIG_RELOAD_AUTOMATIC", "true"),
                env_var("PATH_CONFIG", PIPELINE_MOUNT_PATH),
                env_var("PATH_DATA", DATA_MOUNT_PATH),
                env_var("QUEUE_CHECKPOINT_WRITES", "1"),
                env_var("QUEUE_DRAIN", "true"),
                env_var("QUEUE_MAX_BYTES", "1gb"),
                env_var("QUEUE_TYPE", "persisted"),
            ],
            args: Vec::new(),
            memory: DEFAULT_MEMORY.to_string(),
            volumes: vec![VolumeSpec::config_map(
                PIPELINE_VOLUME_NAME,
                &logstash_pipeline_config_map(inputs.name),
                PIPELINE_MOUNT_PATH,
                PIPELINE_VOLUME_MODE,
            )],
            init_containers: Vec::new(),
        }
    }

    async fn reconcile_extras<S: ObjectStore>(
        &self,
        store: &S,
        owner: &OwnerReference,
        inputs: &DriverInputs<'_>,
    ) -> Result<()> {
        reconcile_config_map(store, pipeline_config_map(self, inputs), Some(owner)).await?;
        Ok(())
    }
}

/// Reconcile the workload of one Logstash resource.
///
/// # Errors
///
/// Returns errors that should be retried with the controller backoff.
pub async fn reconcile_logstash<S: ObjectStore>(
    ctx: &Context<S>,
    ls: Logstash,
) -> anyhow::Result<ReconcileOutcome> {
    reconcile_driver(ctx, ls).await
}

#[cfg(test)]
#[path = "logstash_tests.rs"]
mod logstash_tests;
