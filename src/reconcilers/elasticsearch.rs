// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Elasticsearch reconciliation.
//!
//! An Elasticsearch cluster runs one StatefulSet per node set. A pass creates,
//! in order:
//!
//! 1. The HTTP service `{es}-es-http`, the headless transport service
//!    `{es}-es-transport` and one headless service per node set
//! 2. The HTTP CA and certificates; the public certificates secret is the CA
//!    source of every association
//! 3. The `elastic` superuser secret `{es}-es-elastic-user`
//! 4. The file realm secret `{es}-es-xpack-file-realm`, aggregating the
//!    `elastic` user and every user secret labeled for the cluster
//! 5. Per node set, the `elasticsearch.yml` secret and the StatefulSet
//!
//! The status follows pod readiness, then the cluster health reported by the
//! [`ClusterHealthObserver`](crate::observer::ClusterHealthObserver) once all
//! StatefulSets are ready.

use crate::certificates::{reconcile_certificates, secret_value, CertificateParams};
use crate::constants::{
    CA_FILE_NAME, CERT_FILE_NAME, CONFIG_VOLUME_NAME, CONFLICT_REQUEUE_SECS,
    DEFAULT_ELASTICSEARCH_IMAGE, ELASTICSEARCH_CONTAINER_NAME, ELASTICSEARCH_HTTP_PORT,
    ELASTICSEARCH_TRANSPORT_PORT, ELASTIC_USER_NAME, HEALTH_REQUEUE_SECS,
    HTTP_CERTIFICATES_MOUNT_PATH, HTTP_CERTIFICATES_VOLUME_NAME, KEY_FILE_NAME,
};
use crate::context::Context;
use crate::crd::{Elasticsearch, ElasticsearchHealth, ElasticsearchPhase, ElasticsearchStatus, NodeSet};
use crate::errors::Result;
use crate::events::{publish_all, PendingEvent};
use crate::keystore::{reconcile_keystore_resources, secure_settings_watch_name, KeystoreInit, KeystoreParams};
use crate::labels::{
    config_checksum_label, new_labels, secure_settings_finalizer, ELASTICSEARCH_CLUSTER_NAME_LABEL,
    ELASTICSEARCH_NODE_SET_LABEL, TYPE_LABEL, USER_TYPE,
};
use crate::metrics;
use crate::name::{
    es_config_secret, es_elastic_user_secret, es_file_realm_secret, es_stateful_set,
    es_transport_service, stateful_set_pod, validate_resource_name, ES_NAMER,
};
use crate::observer::BasicAuth;
use crate::reconcilers::association::elasticsearch_url;
use crate::reconcilers::association::user::{
    generate_password, hash_password, verify_password, PASSWORD_HASH_KEY, USER_NAME_KEY,
    USER_ROLES_KEY,
};
use crate::reconcilers::driver::{config_checksum, merge_layers, user_config, ChecksumInputs, Version};
use crate::reconcilers::finalizers::{handle_finalizers, is_being_deleted, Finalizer, WatchFinalizer};
use crate::reconcilers::resources::{reconcile_secret, reconcile_service, reconcile_stateful_set};
use crate::reconcilers::state::ReconcileState;
use crate::reconcilers::ReconcileOutcome;
use crate::settings::{CanonicalConfig, ElasticsearchSettings};
use crate::status_reasons::EVENT_RECONCILIATION_ERROR;
use crate::store::{controller_reference, get_if_exists, ObjectStore};
use crate::watches::ObjectKey;
use crate::workloads::{
    build_headless_service, build_pod_template, build_service, build_stateful_set, container_port,
    service_port, set_pod_label, PodDefaults, VolumeSpec,
};
use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Value of the `common.k8s.elastic.co/type` label on Elasticsearch objects
pub const ELASTICSEARCH_TYPE: &str = "elasticsearch";

/// Key of the rendered configuration in a node set config secret
pub const CONFIG_FILE: &str = "elasticsearch.yml";

/// Default memory of the Elasticsearch container
pub const DEFAULT_MEMORY: &str = "2Gi";

/// Role granted to the `elastic` user
pub const SUPERUSER_ROLE: &str = "superuser";

/// File realm secret key listing `user:hash` lines
pub const USERS_FILE: &str = "users";

/// File realm secret key listing `role:user,user` lines
pub const USERS_ROLES_FILE: &str = "users_roles";

const CONFIG_MOUNT_PATH: &str = "/mnt/elastic-internal/elasticsearch-config";
const FILE_REALM_VOLUME_NAME: &str = "elastic-internal-xpack-file-realm";
const FILE_REALM_MOUNT_PATH: &str = "/mnt/elastic-internal/xpack-file-realm";
const DATA_VOLUME_NAME: &str = "elasticsearch-data";
const DATA_PATH: &str = "/usr/share/elasticsearch/data";
const LOGS_VOLUME_NAME: &str = "elasticsearch-logs";
const LOGS_PATH: &str = "/usr/share/elasticsearch/logs";

const KEYSTORE: KeystoreInit = KeystoreInit {
    create_command: "/usr/share/elasticsearch/bin/elasticsearch-keystore create",
    add_command: r#"/usr/share/elasticsearch/bin/elasticsearch-keystore add-file "$key" "$filename""#,
    data_volume: DATA_VOLUME_NAME,
    data_path: DATA_PATH,
};

/// A user of the file realm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealmUser {
    /// User name
    pub name: String,
    /// `{SSHA256}` password hash
    pub password_hash: String,
    /// Roles granted to the user
    pub roles: Vec<String>,
}

/// Render the `users` and `users_roles` files of a file realm.
///
/// Users are written in the given order; roles are sorted, each listing its
/// users in the given order.
#[must_use]
pub fn file_realm_data(users: &[RealmUser]) -> BTreeMap<String, ByteString> {
    let mut users_file = String::new();
    let mut roles: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for user in users {
        users_file.push_str(&format!("{}:{}\n", user.name, user.password_hash));
        for role in &user.roles {
            roles.entry(role.as_str()).or_default().push(user.name.as_str());
        }
    }
    let roles_file: String = roles
        .iter()
        .map(|(role, users)| format!("{role}:{}\n", users.join(",")))
        .collect();
    BTreeMap::from([
        (USERS_FILE.to_string(), ByteString(users_file.into_bytes())),
        (USERS_ROLES_FILE.to_string(), ByteString(roles_file.into_bytes())),
    ])
}

/// Password hashes of an existing `users` file, by user name.
fn parse_users_file(secret: Option<&Secret>) -> BTreeMap<String, String> {
    secret
        .and_then(|s| secret_value(s, USERS_FILE))
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .map(|raw| {
            raw.lines()
                .filter_map(|line| line.split_once(':'))
                .map(|(user, hash)| (user.to_string(), hash.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn string_value(secret: &Secret, key: &str) -> Option<String> {
    secret_value(secret, key)
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

/// A user secret labeled for the cluster as a realm user, if complete.
fn realm_user(secret: &Secret) -> Option<RealmUser> {
    Some(RealmUser {
        name: string_value(secret, USER_NAME_KEY)?,
        password_hash: string_value(secret, PASSWORD_HASH_KEY)?,
        roles: string_value(secret, USER_ROLES_KEY)
            .map(|roles| {
                roles
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// Whether a pod reports both `Ready` and `ContainersReady`.
#[must_use]
pub fn pod_is_ready(pod: &Pod) -> bool {
    let conditions = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let is_true = |type_: &str| {
        conditions
            .iter()
            .any(|c| c.type_ == type_ && c.status == "True")
    };
    is_true("Ready") && is_true("ContainersReady")
}

/// Whether a StatefulSet runs all its replicas ready.
#[must_use]
pub fn stateful_set_is_ready(stateful_set: &StatefulSet) -> bool {
    let expected = stateful_set
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = stateful_set
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= expected
}

/// Whether the user configuration of a node set leaves it master eligible.
///
/// # Errors
///
/// Returns a validation error for an invalid node set configuration.
pub fn is_master_eligible(node_set: &NodeSet) -> Result<bool> {
    let settings: ElasticsearchSettings = user_config(node_set.config.as_ref())?.unpack()?;
    Ok(settings.node.master)
}

/// Names of the pods of master eligible node sets.
///
/// # Errors
///
/// Returns a validation error for an invalid node set configuration.
pub fn initial_master_nodes(es_name: &str, node_sets: &[NodeSet]) -> Result<Vec<String>> {
    let mut masters = Vec::new();
    for node_set in node_sets {
        if is_master_eligible(node_set)? {
            let stateful_set = es_stateful_set(es_name, &node_set.name);
            masters.extend((0..node_set.count).map(|ordinal| stateful_set_pod(&stateful_set, ordinal)));
        }
    }
    Ok(masters)
}

/// Inputs of the `elasticsearch.yml` of one node set.
#[derive(Clone, Copy, Debug)]
pub struct NodeSetConfigInputs<'a> {
    /// Name of the cluster
    pub es_name: &'a str,
    /// Parsed version
    pub version: &'a Version,
    /// Pods eligible as initial masters
    pub master_nodes: &'a [String],
    /// Whether the HTTP layer serves TLS
    pub tls_enabled: bool,
}

/// The layered `elasticsearch.yml` of a node set.
///
/// # Errors
///
/// Returns a validation error for an invalid node set configuration.
pub fn node_set_config(node_set: &NodeSet, inputs: &NodeSetConfigInputs<'_>) -> Result<CanonicalConfig> {
    let transport = es_transport_service(inputs.es_name);
    let mut base = vec![
        ("cluster.name", json!(inputs.es_name)),
        ("node.name", json!("${POD_NAME}")),
        ("network.host", json!("0")),
        ("path.data", json!(DATA_PATH)),
        ("path.logs", json!(LOGS_PATH)),
        ("xpack.security.enabled", json!(true)),
        ("xpack.license.self_generated.type", json!("basic")),
    ];
    if inputs.version.major >= 7 {
        base.push(("discovery.seed_hosts", json!([transport])));
        base.push(("cluster.initial_master_nodes", json!(inputs.master_nodes)));
        base.push(("xpack.security.authc.realms.file.file1.order", json!(-100)));
    } else {
        base.push(("discovery.zen.ping.unicast.hosts", json!([transport])));
        base.push((
            "discovery.zen.minimum_master_nodes",
            json!(inputs.master_nodes.len() / 2 + 1),
        ));
        base.push(("xpack.security.authc.realms.file1.type", json!("file")));
        base.push(("xpack.security.authc.realms.file1.order", json!(-100)));
    }

    let tls = if inputs.tls_enabled {
        CanonicalConfig::from_pairs([
            ("xpack.security.http.ssl.enabled", json!(true)),
            (
                "xpack.security.http.ssl.certificate",
                json!(format!("{HTTP_CERTIFICATES_MOUNT_PATH}/{CERT_FILE_NAME}")),
            ),
            (
                "xpack.security.http.ssl.key",
                json!(format!("{HTTP_CERTIFICATES_MOUNT_PATH}/{KEY_FILE_NAME}")),
            ),
            (
                "xpack.security.http.ssl.certificate_authorities",
                json!([format!("{HTTP_CERTIFICATES_MOUNT_PATH}/{CA_FILE_NAME}")]),
            ),
        ])
    } else {
        CanonicalConfig::from_pairs([("xpack.security.http.ssl.enabled", json!(false))])
    };

    Ok(merge_layers(vec![
        CanonicalConfig::from_pairs(base),
        tls,
        user_config(node_set.config.as_ref())?,
    ]))
}

fn pod_name_env() -> EnvVar {
    EnvVar {
        name: "POD_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn image(es: &Elasticsearch) -> String {
    match es.spec.image.as_deref().filter(|i| !i.is_empty()) {
        Some(image) => image.to_string(),
        None => format!("{DEFAULT_ELASTICSEARCH_IMAGE}:{}", es.spec.version),
    }
}

fn secret(name: &str, namespace: &str, labels: &BTreeMap<String, String>, data: BTreeMap<String, ByteString>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Persist the accumulated status once and publish the buffered events.
async fn apply_state<S: ObjectStore>(
    ctx: &Context<S>,
    es: &mut Elasticsearch,
    state: ReconcileState<ElasticsearchStatus>,
    outcome: ReconcileOutcome,
) -> anyhow::Result<ReconcileOutcome> {
    let (events, status) = state.apply();
    if let Some(status) = status {
        es.status = Some(status);
        match ctx.store.update_status(&*es).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(namespace = %es.namespace().unwrap_or_default(), name = %es.name_any(), "Conflict while updating status");
                return Ok(outcome.requeue_at_most(Duration::from_secs(CONFLICT_REQUEUE_SECS)));
            }
            Err(e) => return Err(e.into()),
        }
    }
    publish_all(ctx.events.as_ref(), &*es, &events).await;
    Ok(outcome)
}

/// Reconcile the `elastic` superuser password, keeping an existing one.
async fn reconcile_elastic_user<S: ObjectStore>(
    store: &S,
    es: &Elasticsearch,
    labels: &BTreeMap<String, String>,
) -> Result<String> {
    let namespace = es.namespace().unwrap_or_default();
    let name = es_elastic_user_secret(&es.name_any());
    let existing = get_if_exists::<Secret, _>(store, &namespace, &name).await?;
    let password = existing
        .as_ref()
        .and_then(|s| string_value(s, ELASTIC_USER_NAME))
        .unwrap_or_else(|| {
            info!(namespace = %namespace, name = %es.name_any(), "Generating elastic user password");
            generate_password()
        });
    let data = BTreeMap::from([(
        ELASTIC_USER_NAME.to_string(),
        ByteString(password.clone().into_bytes()),
    )]);
    reconcile_secret(
        store,
        secret(&name, &namespace, labels, data),
        Some(&controller_reference(es)?),
    )
    .await?;
    Ok(password)
}

/// Reconcile the file realm from the `elastic` user and the cluster's user secrets.
async fn reconcile_file_realm<S: ObjectStore>(
    store: &S,
    es: &Elasticsearch,
    labels: &BTreeMap<String, String>,
    elastic_password: &str,
) -> Result<Secret> {
    let namespace = es.namespace().unwrap_or_default();
    let es_name = es.name_any();
    let name = es_file_realm_secret(&es_name);
    let existing = get_if_exists::<Secret, _>(store, &namespace, &name).await?;
    let elastic_hash = parse_users_file(existing.as_ref())
        .remove(ELASTIC_USER_NAME)
        .filter(|hash| verify_password(hash, elastic_password))
        .unwrap_or_else(|| hash_password(elastic_password));

    let selector = BTreeMap::from([
        (TYPE_LABEL.to_string(), USER_TYPE.to_string()),
        (ELASTICSEARCH_CLUSTER_NAME_LABEL.to_string(), es_name.clone()),
    ]);
    let mut user_secrets: Vec<Secret> = store.list(Some(&namespace), &selector).await?;
    user_secrets.sort_by_key(|s| s.name_any());

    let mut users = vec![RealmUser {
        name: ELASTIC_USER_NAME.to_string(),
        password_hash: elastic_hash,
        roles: vec![SUPERUSER_ROLE.to_string()],
    }];
    for user_secret in &user_secrets {
        match realm_user(user_secret) {
            Some(user) if user.name != ELASTIC_USER_NAME => users.push(user),
            _ => {
                warn!(namespace = %namespace, name = %user_secret.name_any(), "Skipping incomplete user secret");
            }
        }
    }
    debug!(namespace = %namespace, name = %es_name, users = users.len(), "Reconciling file realm");

    reconcile_secret(
        store,
        secret(&name, &namespace, labels, file_realm_data(&users)),
        Some(&controller_reference(es)?),
    )
    .await
}

/// Reconcile one Elasticsearch cluster.
///
/// # Errors
///
/// Returns errors that should be retried with the controller backoff.
#[allow(clippy::too_many_lines)]
pub async fn reconcile_elasticsearch<S: ObjectStore>(
    ctx: &Context<S>,
    mut es: Elasticsearch,
) -> anyhow::Result<ReconcileOutcome> {
    let store = ctx.store.as_ref();
    let key = ObjectKey::of(&es);
    let kind = Elasticsearch::kind(&()).to_string();
    let mut state = ReconcileState::new(es.status.as_ref());
    state.update_observed_generation(es.meta().generation);

    let version = validate_resource_name(&key.name)
        .and_then(|()| Version::parse(&es.spec.version))
        .and_then(|version| version.check_supported().map(|()| version));
    let version = match version {
        Ok(version) => version,
        Err(e) => {
            warn!(namespace = %key.namespace, name = %key.name, error = %e, "Invalid Elasticsearch specification");
            state.update_elasticsearch_invalid(PendingEvent::warning(EVENT_RECONCILIATION_ERROR, e.to_string()));
            return apply_state(ctx, &mut es, state, ReconcileOutcome::done()).await;
        }
    };

    let secure_settings_finalizer = WatchFinalizer::new(
        secure_settings_finalizer(&kind),
        vec![(&ctx.watches.secrets, secure_settings_watch_name(&key))],
    );
    let finalizers: [&dyn Finalizer; 1] = [&secure_settings_finalizer];
    match handle_finalizers(store, &mut es, &finalizers).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            debug!(namespace = %key.namespace, name = %key.name, "Conflict while handling finalizers");
            metrics::record_reconciliation_requeue(&kind, "conflict");
            return Ok(ReconcileOutcome::requeue(Duration::from_secs(CONFLICT_REQUEUE_SECS)));
        }
        Err(e) => return Err(e.into()),
    }
    if is_being_deleted(&es) {
        return Ok(ReconcileOutcome::done());
    }

    let labels = new_labels(ELASTICSEARCH_TYPE, ELASTICSEARCH_CLUSTER_NAME_LABEL, &key.name);
    let owner = controller_reference(&es)?;
    let tls_enabled = es.spec.http.tls.enabled();
    let http_port_name = if tls_enabled { "https" } else { "http" };

    let http_service = reconcile_service(
        store,
        build_service(
            &ES_NAMER.http_service(&key.name),
            &key.namespace,
            &labels,
            vec![service_port(http_port_name, ELASTICSEARCH_HTTP_PORT)],
            Some(&es.spec.http.service),
        ),
        Some(&owner),
    )
    .await?;
    reconcile_service(
        store,
        build_headless_service(
            &es_transport_service(&key.name),
            &key.namespace,
            &labels,
            vec![service_port("transport", ELASTICSEARCH_TRANSPORT_PORT)],
        ),
        Some(&owner),
    )
    .await?;
    for node_set in &es.spec.node_sets {
        let name = es_stateful_set(&key.name, &node_set.name);
        let mut selector = labels.clone();
        selector.insert(ELASTICSEARCH_NODE_SET_LABEL.to_string(), name.clone());
        reconcile_service(
            store,
            build_headless_service(
                &name,
                &key.namespace,
                &selector,
                vec![service_port(http_port_name, ELASTICSEARCH_HTTP_PORT)],
            ),
            Some(&owner),
        )
        .await?;
    }

    let mut outcome = ReconcileOutcome::done();
    let certificates = reconcile_certificates(
        store,
        &es,
        &CertificateParams {
            namer: ES_NAMER,
            labels: &labels,
            tls: &es.spec.http.tls,
            services: std::slice::from_ref(&http_service),
            ca_rotation: ctx.params.ca_rotation,
            cert_rotation: ctx.params.cert_rotation,
        },
        Utc::now(),
    )
    .await?;
    if let Some(certificates) = &certificates {
        outcome = outcome.requeue_at_most(certificates.requeue_after);
    }

    let elastic_password = reconcile_elastic_user(store, &es, &labels).await?;
    reconcile_file_realm(store, &es, &labels, &elastic_password).await?;

    let keystore = reconcile_keystore_resources(
        store,
        ctx.events.as_ref(),
        &ctx.watches.secrets,
        &es,
        &KeystoreParams {
            namer: ES_NAMER,
            labels: &labels,
            sources: &es.spec.secure_settings,
            init: KEYSTORE,
        },
    )
    .await?;

    let master_nodes = initial_master_nodes(&key.name, &es.spec.node_sets)?;
    let config_inputs = NodeSetConfigInputs {
        es_name: &key.name,
        version: &version,
        master_nodes: &master_nodes,
        tls_enabled,
    };
    let http_certificate = certificates
        .as_ref()
        .and_then(|c| secret_value(&c.http_certificates, CERT_FILE_NAME));

    let mut all_ready = true;
    for node_set in &es.spec.node_sets {
        let stateful_set_name = es_stateful_set(&key.name, &node_set.name);
        let mut node_labels = labels.clone();
        node_labels.insert(ELASTICSEARCH_NODE_SET_LABEL.to_string(), stateful_set_name.clone());

        let rendered = node_set_config(node_set, &config_inputs)?.render()?;
        let config_secret_name = es_config_secret(&key.name, &node_set.name);
        reconcile_secret(
            store,
            secret(
                &config_secret_name,
                &key.namespace,
                &node_labels,
                BTreeMap::from([(CONFIG_FILE.to_string(), ByteString(rendered.clone()))]),
            ),
            Some(&owner),
        )
        .await?;

        let checksum = config_checksum(&ChecksumInputs {
            keystore_version: keystore.as_ref().map(|k| k.version.as_str()),
            auth: None,
            ca: None,
            http_certificate,
            config: &rendered,
        });

        let mut defaults = PodDefaults {
            container_name: ELASTICSEARCH_CONTAINER_NAME.to_string(),
            image: image(&es),
            labels: node_labels.clone(),
            ports: vec![
                container_port(http_port_name, ELASTICSEARCH_HTTP_PORT),
                container_port("transport", ELASTICSEARCH_TRANSPORT_PORT),
            ],
            env: vec![pod_name_env()],
            memory: DEFAULT_MEMORY.to_string(),
            volumes: vec![
                VolumeSpec::secret(CONFIG_VOLUME_NAME, &config_secret_name, CONFIG_MOUNT_PATH),
                VolumeSpec::empty_dir(DATA_VOLUME_NAME, DATA_PATH),
                VolumeSpec::empty_dir(LOGS_VOLUME_NAME, LOGS_PATH),
                VolumeSpec::secret(
                    FILE_REALM_VOLUME_NAME,
                    &es_file_realm_secret(&key.name),
                    FILE_REALM_MOUNT_PATH,
                ),
            ],
            ..Default::default()
        };
        if certificates.is_some() {
            defaults.volumes.push(VolumeSpec::secret(
                HTTP_CERTIFICATES_VOLUME_NAME,
                &ES_NAMER.http_certs_internal_secret(&key.name),
                HTTP_CERTIFICATES_MOUNT_PATH,
            ));
        }
        if let Some(keystore) = &keystore {
            defaults.volumes.push(keystore.volume.clone());
            defaults.init_containers.push(keystore.init_container.clone());
        }

        let mut template = build_pod_template(node_set.pod_template.as_ref(), &defaults);
        set_pod_label(&mut template, &config_checksum_label(ELASTICSEARCH_TYPE), &checksum);

        let stateful_set = reconcile_stateful_set(
            store,
            build_stateful_set(
                &stateful_set_name,
                &key.namespace,
                &node_labels,
                node_set.count,
                &stateful_set_name,
                template,
            ),
            Some(&owner),
        )
        .await?;
        all_ready &= stateful_set_is_ready(&stateful_set);
    }

    let pods: Vec<Pod> = store
        .list(
            Some(&key.namespace),
            &BTreeMap::from([(ELASTICSEARCH_CLUSTER_NAME_LABEL.to_string(), key.name.clone())]),
        )
        .await?;
    let available_nodes = i32::try_from(pods.iter().filter(|p| pod_is_ready(p)).count()).unwrap_or(i32::MAX);

    let (health, phase) = if all_ready {
        let ca = certificates
            .as_ref()
            .and_then(|c| secret_value(&c.http_certificates, CA_FILE_NAME));
        let health = ctx
            .observer
            .cluster_health(&key, &elasticsearch_url(&es), &BasicAuth::elastic(&elastic_password), ca)
            .await
            .unwrap_or(ElasticsearchHealth::Unknown);
        outcome = outcome.requeue_at_most(Duration::from_secs(HEALTH_REQUEUE_SECS));
        (health, ElasticsearchPhase::Ready)
    } else {
        (ElasticsearchHealth::Red, ElasticsearchPhase::ApplyingChanges)
    };
    metrics::record_available_nodes(&kind, &key.namespace, &key.name, available_nodes);
    state.update_elasticsearch_state(available_nodes, health, phase);

    apply_state(ctx, &mut es, state, outcome).await
}

#[cfg(test)]
#[path = "elasticsearch_tests.rs"]
mod elasticsearch_tests;
