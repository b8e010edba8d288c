// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared orchestration of the Deployment based products.
//!
//! Kibana, APM Server and Logstash differ only in their configuration, their
//! pod defaults and a few extra objects. Each implements [`Driver`], and
//! [`reconcile_driver`] runs the same strictly sequential pass for all three:
//!
//! 1. Version validation
//! 2. Finalizers (secure settings watch, auth secret watch)
//! 3. Association gate
//! 4. Product extras (pipeline ConfigMap, APM token)
//! 5. HTTP service
//! 6. Certificates
//! 7. Configuration secret
//! 8. Keystore resources
//! 9. Deployment, with the configuration checksum on its pod template
//! 10. Health and status

use crate::certificates::{reconcile_certificates, secret_value, CertificateParams};
use crate::constants::{
    CA_FILE_NAME, CERT_FILE_NAME, CONFIG_VOLUME_NAME, CONFLICT_REQUEUE_SECS,
    ELASTICSEARCH_CA_MOUNT_PATH, ELASTICSEARCH_CA_VOLUME_NAME, HTTP_CERTIFICATES_MOUNT_PATH,
    HTTP_CERTIFICATES_VOLUME_NAME, MAX_SUPPORTED_MAJOR, MIN_SUPPORTED_MAJOR,
};
use crate::context::Context;
use crate::crd::{AssociationConf, DeploymentStatus, HttpConfig, SecretSource};
use crate::errors::{OperatorError, Result};
use crate::events::{publish_all, PendingEvent};
use crate::keystore::{reconcile_keystore_resources, secure_settings_watch_name, KeystoreInit, KeystoreParams};
use crate::labels::{config_checksum_label, es_auth_secret_finalizer, new_labels, secure_settings_finalizer};
use crate::metrics;
use crate::observer::BasicAuth;
use crate::reconcilers::association::user::auth_password;
use crate::reconcilers::association::Associated;
use crate::reconcilers::finalizers::{handle_finalizers, is_being_deleted, Finalizer, WatchFinalizer};
use crate::reconcilers::resources::{reconcile_deployment, reconcile_secret, reconcile_service};
use crate::reconcilers::state::ReconcileState;
use crate::reconcilers::ReconcileOutcome;
use crate::settings::CanonicalConfig;
use crate::status_reasons::{EVENT_ASSOCIATION_ERROR, EVENT_RECONCILIATION_ERROR};
use crate::store::{controller_reference, get_if_exists, ObjectStore};
use crate::watches::{NamedWatch, ObjectKey, WatchRegistry};
use crate::workloads::{
    build_deployment, build_pod_template, build_service, service_port, set_pod_label, PodDefaults,
    VolumeSpec,
};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use serde_json::Value;
use sha2::{Digest, Sha224};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A parsed `major.minor.patch[-suffix]` version.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    /// Major version
    pub major: u64,
    /// Minor version
    pub minor: u64,
    /// Patch version
    pub patch: u64,
    /// Pre-release suffix, e.g. `SNAPSHOT`
    pub suffix: Option<String>,
}

impl Version {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `raw` is not `major.minor.patch[-suffix]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || OperatorError::Validation(format!("invalid version {raw:?}"));
        let (numbers, suffix) = match raw.trim().split_once('-') {
            Some((numbers, suffix)) if !suffix.is_empty() => (numbers, Some(suffix.to_string())),
            Some(_) => return Err(invalid()),
            None => (raw.trim(), None),
        };
        let parts: Vec<&str> = numbers.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(invalid());
        };
        let number = |s: &str| s.parse::<u64>().map_err(|_| invalid());
        Ok(Self {
            major: number(major)?,
            minor: number(minor)?,
            patch: number(patch)?,
            suffix,
        })
    }

    /// Ensure the major version is one the operator can manage.
    ///
    /// # Errors
    ///
    /// Returns a validation error for majors outside the supported range.
    pub fn check_supported(&self) -> Result<()> {
        if (MIN_SUPPORTED_MAJOR..=MAX_SUPPORTED_MAJOR).contains(&self.major) {
            Ok(())
        } else {
            Err(OperatorError::Validation(format!(
                "unsupported version {self}: supported majors are {MIN_SUPPORTED_MAJOR} to {MAX_SUPPORTED_MAJOR}"
            )))
        }
    }

    /// Whether this version is at least `major.minor`.
    #[must_use]
    pub fn at_least(&self, major: u64, minor: u64) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "-{suffix}")?;
        }
        Ok(())
    }
}

/// Static description of a product.
#[derive(Clone, Copy, Debug)]
pub struct ProductInfo {
    /// Value of the `common.k8s.elastic.co/type` label
    pub type_label: &'static str,
    /// Label naming the managed resource on its children
    pub name_label: &'static str,
    /// Name of the main container
    pub container_name: &'static str,
    /// Image repository, the version is appended as tag
    pub default_image: &'static str,
    /// Name of the HTTP service port
    pub service_port_name: &'static str,
    /// Port exposed by the HTTP service
    pub service_port: i32,
    /// Key of the rendered configuration in the config secret
    pub config_file: &'static str,
    /// Directory the config secret is mounted at
    pub config_mount_path: &'static str,
    /// Keystore commands and data volume
    pub keystore: KeystoreInit,
}

/// Borrowed view of the spec fields every product shares.
#[derive(Clone, Copy, Debug)]
pub struct ProductSpec<'a> {
    /// Stack version
    pub version: &'a str,
    /// Custom image
    pub image: Option<&'a str>,
    /// Number of replicas
    pub count: i32,
    /// HTTP layer
    pub http: &'a HttpConfig,
    /// Pod template overlay
    pub pod_template: Option<&'a PodTemplateSpec>,
    /// Secure settings sources
    pub secure_settings: &'a [SecretSource],
    /// User configuration
    pub config: Option<&'a Value>,
}

/// Everything a product needs to build its configuration, pods and extras.
#[derive(Clone, Copy, Debug)]
pub struct DriverInputs<'a> {
    /// Name of the managed resource
    pub name: &'a str,
    /// Namespace of the managed resource
    pub namespace: &'a str,
    /// Parsed version
    pub version: &'a Version,
    /// Association configuration, when associated
    pub association: Option<&'a AssociationConf>,
    /// Credentials of the association user
    pub credentials: Option<&'a BasicAuth>,
    /// Whether the HTTP layer serves TLS
    pub tls_enabled: bool,
    /// Labels of every child object
    pub labels: &'a BTreeMap<String, String>,
}

impl DriverInputs<'_> {
    /// URL of the associated Elasticsearch cluster, or empty.
    #[must_use]
    pub fn elasticsearch_url(&self) -> &str {
        self.association.map(|a| a.url.as_str()).unwrap_or_default()
    }

    /// Path of the mounted Elasticsearch CA, when provided.
    #[must_use]
    pub fn elasticsearch_ca_path(&self) -> Option<String> {
        self.association
            .filter(|a| a.ca_is_configured() && a.ca_cert_provided)
            .map(|_| format!("{ELASTICSEARCH_CA_MOUNT_PATH}/{CA_FILE_NAME}"))
    }
}

/// Path of a mounted HTTP certificate file.
#[must_use]
pub fn http_certificate_path(file: &str) -> String {
    format!("{HTTP_CERTIFICATES_MOUNT_PATH}/{file}")
}

/// The image of a product: the custom one, or the default repository tagged with the version.
#[must_use]
pub fn product_image(info: &ProductInfo, spec: &ProductSpec<'_>) -> String {
    match spec.image.filter(|i| !i.is_empty()) {
        Some(image) => image.to_string(),
        None => format!("{}:{}", info.default_image, spec.version),
    }
}

/// Merge configuration layers left to right, later layers winning per leaf.
#[must_use]
pub fn merge_layers(layers: Vec<CanonicalConfig>) -> CanonicalConfig {
    let mut merged = CanonicalConfig::new();
    merged.merge_with(&layers);
    merged
}

/// The user configuration of a product as the last layer.
///
/// # Errors
///
/// Returns a validation error if the configuration is not an object.
pub fn user_config(config: Option<&Value>) -> Result<CanonicalConfig> {
    config.map_or_else(|| Ok(CanonicalConfig::new()), CanonicalConfig::from_value)
}

/// A Deployment based product managed by [`reconcile_driver`].
#[async_trait]
pub trait Driver: Associated {
    /// Static description of the product
    const INFO: ProductInfo;

    /// The shared spec fields.
    fn product_spec(&self) -> ProductSpec<'_>;

    /// The status stored on the resource.
    fn deployment_status(&self) -> Option<&DeploymentStatus>;

    /// Replace the status stored on the resource.
    fn set_deployment_status(&mut self, status: DeploymentStatus);

    /// Whether the product cannot run without an established association.
    fn requires_association(&self) -> bool {
        true
    }

    /// The layered product configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid user configuration.
    fn build_config(&self, inputs: &DriverInputs<'_>) -> Result<CanonicalConfig>;

    /// Product defaults of the pod: image, ports, environment, memory and volumes.
    ///
    /// The config, certificate and keystore volumes are added by the driver.
    fn build_workload(&self, inputs: &DriverInputs<'_>) -> PodDefaults;

    /// Reconcile objects only this product needs, before its service.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    async fn reconcile_extras<S: ObjectStore>(
        &self,
        _store: &S,
        _owner: &OwnerReference,
        _inputs: &DriverInputs<'_>,
    ) -> Result<()> {
        Ok(())
    }

    /// Available nodes and availability of the Deployment.
    fn compute_health(deployment: &Deployment) -> (i32, bool) {
        deployment_health(deployment)
    }
}

/// Available replicas, and whether the `Available` condition is true.
#[must_use]
pub fn deployment_health(deployment: &Deployment) -> (i32, bool) {
    let status = deployment.status.as_ref();
    let available_nodes = status.and_then(|s| s.available_replicas).unwrap_or(0);
    let available = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        });
    (available_nodes, available)
}

/// Name of the watch registration on the auth and CA secrets used by a product's pods.
#[must_use]
pub fn auth_secret_watch_name(owner: &ObjectKey) -> String {
    format!("{}-{}-es-auth-secret", owner.namespace, owner.name)
}

/// Contents hashed into the configuration checksum label.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChecksumInputs<'a> {
    /// `resourceVersion` of the aggregated secure settings
    pub keystore_version: Option<&'a str>,
    /// Password of the association user
    pub auth: Option<&'a [u8]>,
    /// Elasticsearch CA certificate
    pub ca: Option<&'a [u8]>,
    /// HTTP certificate
    pub http_certificate: Option<&'a [u8]>,
    /// Rendered configuration
    pub config: &'a [u8],
}

/// Lowercase hex SHA-224 over the checksum inputs, in order.
#[must_use]
pub fn config_checksum(inputs: &ChecksumInputs<'_>) -> String {
    let mut hasher = Sha224::new();
    if let Some(version) = inputs.keystore_version {
        hasher.update(version.as_bytes());
    }
    for part in [inputs.auth, inputs.ca, inputs.http_certificate].into_iter().flatten() {
        hasher.update(part);
    }
    hasher.update(inputs.config);
    format!("{:x}", hasher.finalize())
}

/// Watch the auth and CA secrets the pods depend on, and read the CA bytes.
async fn association_secrets<S: ObjectStore>(
    store: &S,
    secrets: &WatchRegistry,
    key: &ObjectKey,
    conf: Option<&AssociationConf>,
) -> Result<(Option<BasicAuth>, Option<Vec<u8>>)> {
    let watch_name = auth_secret_watch_name(key);
    let Some(conf) = conf.filter(|c| c.auth_is_configured()) else {
        secrets.remove_handler_for_key(&watch_name);
        return Ok((None, None));
    };

    let mut watched = vec![ObjectKey::new(&key.namespace, &conf.auth_secret_name)];
    if conf.ca_is_configured() {
        watched.push(ObjectKey::new(&key.namespace, &conf.ca_secret_name));
    }
    secrets.add_handler(NamedWatch {
        name: watch_name,
        watched,
        watcher: key.clone(),
    });

    let auth_secret: Secret = store.get(&key.namespace, &conf.auth_secret_name).await?;
    let credentials = BasicAuth {
        username: conf.auth_secret_key.clone(),
        password: auth_password(&auth_secret, &conf.auth_secret_key)?,
    };

    let mut ca = None;
    if conf.ca_is_configured() {
        if let Some(secret) =
            get_if_exists::<Secret, _>(store, &key.namespace, &conf.ca_secret_name).await?
        {
            ca = secret_value(&secret, CA_FILE_NAME)
                .or_else(|| secret_value(&secret, CERT_FILE_NAME))
                .map(<[u8]>::to_vec);
        }
    }
    Ok((Some(credentials), ca))
}

fn config_secret(name: &str, namespace: &str, labels: &BTreeMap<String, String>, file: &str, rendered: &[u8]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            file.to_string(),
            ByteString(rendered.to_vec()),
        )])),
        ..Default::default()
    }
}

/// Run one reconciliation pass of a Deployment based product.
///
/// # Errors
///
/// Returns errors that should be retried with the controller backoff.
/// Validation errors are reported as events before they are returned.
#[allow(clippy::too_many_lines)]
pub async fn reconcile_driver<K, S>(ctx: &Context<S>, mut resource: K) -> anyhow::Result<ReconcileOutcome>
where
    K: Driver,
    S: ObjectStore,
{
    let store = ctx.store.as_ref();
    let key = ObjectKey::of(&resource);
    let kind = K::kind(&()).to_string();
    let info = K::INFO;

    let version = match Version::parse(resource.product_spec().version) {
        Ok(version) => version,
        Err(e) => {
            warn!(kind = %kind, namespace = %key.namespace, name = %key.name, error = %e, "Invalid version");
            publish_all(
                ctx.events.as_ref(),
                &resource,
                &[PendingEvent::warning(EVENT_RECONCILIATION_ERROR, e.to_string())],
            )
            .await;
            return Ok(ReconcileOutcome::done());
        }
    };
    if let Err(e) = version.check_supported() {
        publish_all(
            ctx.events.as_ref(),
            &resource,
            &[PendingEvent::warning(EVENT_RECONCILIATION_ERROR, e.to_string())],
        )
        .await;
        return Err(e.into());
    }

    let secure_settings_finalizer = WatchFinalizer::new(
        secure_settings_finalizer(&kind),
        vec![(&ctx.watches.secrets, secure_settings_watch_name(&key))],
    );
    let auth_finalizer = WatchFinalizer::new(
        es_auth_secret_finalizer(&kind),
        vec![(&ctx.watches.secrets, auth_secret_watch_name(&key))],
    );
    let finalizers: [&dyn Finalizer; 2] = [&secure_settings_finalizer, &auth_finalizer];
    match handle_finalizers(store, &mut resource, &finalizers).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            debug!(namespace = %key.namespace, name = %key.name, "Conflict while handling finalizers");
            metrics::record_reconciliation_requeue(&kind, "conflict");
            return Ok(ReconcileOutcome::requeue(Duration::from_secs(CONFLICT_REQUEUE_SECS)));
        }
        Err(e) => return Err(e.into()),
    }
    if is_being_deleted(&resource) {
        return Ok(ReconcileOutcome::done());
    }

    let conf = ctx.associations.load(&resource)?;
    if resource.requires_association() && !conf.as_ref().is_some_and(AssociationConf::is_configured) {
        info!(
            kind = %kind,
            namespace = %key.namespace,
            name = %key.name,
            "Aborting reconciliation as no Elasticsearch backend is configured"
        );
        ctx.watches
            .secrets
            .remove_handler_for_key(&auth_secret_watch_name(&key));
        publish_all(
            ctx.events.as_ref(),
            &resource,
            &[PendingEvent::warning(
                EVENT_ASSOCIATION_ERROR,
                "Elasticsearch backend is not configured",
            )],
        )
        .await;
        return Ok(ReconcileOutcome::done());
    }
    let conf = conf.filter(AssociationConf::is_configured);

    let (credentials, ca) =
        association_secrets(store, &ctx.watches.secrets, &key, conf.as_ref()).await?;

    let spec = resource.product_spec();
    let labels = new_labels(info.type_label, info.name_label, &key.name);
    let owner = controller_reference(&resource)?;
    let inputs = DriverInputs {
        name: &key.name,
        namespace: &key.namespace,
        version: &version,
        association: conf.as_ref(),
        credentials: credentials.as_ref(),
        tls_enabled: spec.http.tls.enabled(),
        labels: &labels,
    };

    resource.reconcile_extras(store, &owner, &inputs).await?;

    let service = reconcile_service(
        store,
        build_service(
            &K::NAMER.http_service(&key.name),
            &key.namespace,
            &labels,
            vec![service_port(info.service_port_name, info.service_port)],
            Some(&spec.http.service),
        ),
        Some(&owner),
    )
    .await?;

    let mut outcome = ReconcileOutcome::done();
    let certificates = reconcile_certificates(
        store,
        &resource,
        &CertificateParams {
            namer: K::NAMER,
            labels: &labels,
            tls: &spec.http.tls,
            services: std::slice::from_ref(&service),
            ca_rotation: ctx.params.ca_rotation,
            cert_rotation: ctx.params.cert_rotation,
        },
        Utc::now(),
    )
    .await?;
    if let Some(certificates) = &certificates {
        outcome = outcome.requeue_at_most(certificates.requeue_after);
    }

    let config = resource.build_config(&inputs)?;
    let rendered = config.render()?;
    let config_secret_name = K::NAMER.config_secret(&key.name);
    reconcile_secret(
        store,
        config_secret(&config_secret_name, &key.namespace, &labels, info.config_file, &rendered),
        Some(&owner),
    )
    .await?;

    let keystore = reconcile_keystore_resources(
        store,
        ctx.events.as_ref(),
        &ctx.watches.secrets,
        &resource,
        &KeystoreParams {
            namer: K::NAMER,
            labels: &labels,
            sources: spec.secure_settings,
            init: info.keystore,
        },
    )
    .await?;

    let checksum = config_checksum(&ChecksumInputs {
        keystore_version: keystore.as_ref().map(|k| k.version.as_str()),
        auth: credentials.as_ref().map(|c| c.password.as_bytes()),
        ca: ca.as_deref(),
        http_certificate: certificates
            .as_ref()
            .and_then(|c| secret_value(&c.http_certificates, CERT_FILE_NAME)),
        config: &rendered,
    });

    let mut defaults = resource.build_workload(&inputs);
    defaults.labels.extend(labels.clone());
    defaults.volumes.push(VolumeSpec::secret(
        CONFIG_VOLUME_NAME,
        &config_secret_name,
        info.config_mount_path,
    ));
    defaults.volumes.push(VolumeSpec::empty_dir(
        info.keystore.data_volume,
        info.keystore.data_path,
    ));
    if certificates.is_some() {
        defaults.volumes.push(VolumeSpec::secret(
            HTTP_CERTIFICATES_VOLUME_NAME,
            &K::NAMER.http_certs_internal_secret(&key.name),
            HTTP_CERTIFICATES_MOUNT_PATH,
        ));
    }
    if let Some(conf) = conf.as_ref().filter(|c| c.ca_is_configured()) {
        defaults.volumes.push(VolumeSpec::secret(
            ELASTICSEARCH_CA_VOLUME_NAME,
            &conf.ca_secret_name,
            ELASTICSEARCH_CA_MOUNT_PATH,
        ));
    }
    if let Some(keystore) = &keystore {
        defaults.volumes.push(keystore.volume.clone());
        defaults.init_containers.push(keystore.init_container.clone());
    }

    let mut template = build_pod_template(spec.pod_template, &defaults);
    set_pod_label(&mut template, &config_checksum_label(info.type_label), &checksum);

    let deployment = reconcile_deployment(
        store,
        build_deployment(
            &K::NAMER.workload(&key.name),
            &key.namespace,
            &labels,
            spec.count,
            template,
        ),
        Some(&owner),
    )
    .await?;

    let (available_nodes, available) = K::compute_health(&deployment);
    metrics::record_available_nodes(&kind, &key.namespace, &key.name, available_nodes);
    let generation = resource.meta().generation;
    let count = spec.count;

    let mut state = ReconcileState::new(resource.deployment_status());
    state.update_deployment(available_nodes, available, count);
    state.update_observed_generation(generation);
    let (events, status) = state.apply();
    if let Some(status) = status {
        resource.set_deployment_status(status);
        match store.update_status(&resource).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(namespace = %key.namespace, name = %key.name, "Conflict while updating status");
                return Ok(outcome.requeue_at_most(Duration::from_secs(CONFLICT_REQUEUE_SECS)));
            }
            Err(e) => return Err(e.into()),
        }
    }
    publish_all(ctx.events.as_ref(), &resource, &events).await;

    Ok(outcome)
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod driver_tests;
