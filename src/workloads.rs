// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes workload builders
//!
//! This module builds the `Deployment`, `StatefulSet`, `Service` and pod
//! templates of the managed products. All functions are pure and easily testable.
//!
//! Pod templates start from the user's `podTemplate` overlay. Operator defaults
//! only fill what the user left unset: a user-provided image, env var, port,
//! volume, label or memory request always wins.

use crate::crd::ServiceTemplate;
use crate::reconcilers::resources::set_template_hash;
use k8s_openapi::api::{
    apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec},
    core::v1::{
        ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
        EnvVarSource, PodSpec, PodTemplateSpec, ResourceRequirements, SecretKeySelector,
        SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    },
};
use k8s_openapi::apimachinery::pkg::{
    api::resource::Quantity,
    apis::meta::v1::{LabelSelector, ObjectMeta},
    util::intstr::IntOrString,
};
use std::collections::BTreeMap;
use tracing::debug;

const MEMORY_RESOURCE: &str = "memory";

/// A volume together with its mount in the main container.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeSpec {
    /// Pod volume
    pub volume: Volume,
    /// Mount in the main container
    pub mount: VolumeMount,
}

impl VolumeSpec {
    /// Read-only volume backed by a secret.
    #[must_use]
    pub fn secret(name: &str, secret_name: &str, mount_path: &str) -> Self {
        Self {
            volume: Volume {
                name: name.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.to_string()),
                    optional: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
            mount: VolumeMount {
                name: name.to_string(),
                mount_path: mount_path.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        }
    }

    /// Read-only volume backed by a config map, files created with `mode`.
    #[must_use]
    pub fn config_map(name: &str, config_map_name: &str, mount_path: &str, mode: i32) -> Self {
        Self {
            volume: Volume {
                name: name.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map_name.to_string(),
                    default_mode: Some(mode),
                    ..Default::default()
                }),
                ..Default::default()
            },
            mount: VolumeMount {
                name: name.to_string(),
                mount_path: mount_path.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        }
    }

    /// Writable scratch volume.
    #[must_use]
    pub fn empty_dir(name: &str, mount_path: &str) -> Self {
        Self {
            volume: Volume {
                name: name.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
            mount: VolumeMount {
                name: name.to_string(),
                mount_path: mount_path.to_string(),
                ..Default::default()
            },
        }
    }
}

/// Plain environment variable.
#[must_use]
pub fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Environment variable read from a secret key.
#[must_use]
pub fn env_from_secret(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// TCP container port.
#[must_use]
pub fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// TCP service port targeting the container port of the same number.
#[must_use]
pub fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Operator defaults of a product pod.
#[derive(Clone, Debug, Default)]
pub struct PodDefaults {
    /// Name of the main container
    pub container_name: String,
    /// Default image of the main container
    pub image: String,
    /// Labels of the pod, also used as workload selector
    pub labels: BTreeMap<String, String>,
    /// Container ports
    pub ports: Vec<ContainerPort>,
    /// Environment of the main container
    pub env: Vec<EnvVar>,
    /// Arguments of the main container, unless the overlay sets its own
    pub args: Vec<String>,
    /// Default memory request and limit of the main container
    pub memory: String,
    /// Volumes mounted in the main container
    pub volumes: Vec<VolumeSpec>,
    /// Init containers, defaulted to the main container image
    pub init_containers: Vec<Container>,
}

fn append_missing<T: Clone>(target: &mut Option<Vec<T>>, defaults: &[T], same: impl Fn(&T, &T) -> bool) {
    let list = target.get_or_insert_with(Vec::new);
    for item in defaults {
        if !list.iter().any(|existing| same(existing, item)) {
            list.push(item.clone());
        }
    }
}

fn default_memory(resources: &mut ResourceRequirements, memory: &str) {
    for map in [&mut resources.requests, &mut resources.limits] {
        map.get_or_insert_with(BTreeMap::new)
            .entry(MEMORY_RESOURCE.to_string())
            .or_insert_with(|| Quantity(memory.to_string()));
    }
}

/// Build the pod template of a product from the user overlay and the operator defaults.
///
/// # Arguments
///
/// * `overlay` - The `podTemplate` of the managed resource, if any
/// * `defaults` - Operator defaults, applied where the overlay sets nothing
///
/// # Returns
///
/// The merged pod template
#[must_use]
pub fn build_pod_template(overlay: Option<&PodTemplateSpec>, defaults: &PodDefaults) -> PodTemplateSpec {
    let mut template = overlay.cloned().unwrap_or_default();

    let metadata = template.metadata.get_or_insert_with(ObjectMeta::default);
    let labels = metadata.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in &defaults.labels {
        labels.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let spec = template.spec.get_or_insert_with(PodSpec::default);
    if !spec.containers.iter().any(|c| c.name == defaults.container_name) {
        spec.containers.push(Container {
            name: defaults.container_name.clone(),
            ..Default::default()
        });
    }

    let mounts: Vec<VolumeMount> = defaults.volumes.iter().map(|v| v.mount.clone()).collect();
    let volumes: Vec<Volume> = defaults.volumes.iter().map(|v| v.volume.clone()).collect();
    append_missing(&mut spec.volumes, &volumes, |a, b| a.name == b.name);

    let mut main_image = defaults.image.clone();
    if let Some(main) = spec
        .containers
        .iter_mut()
        .find(|c| c.name == defaults.container_name)
    {
        if main.image.as_deref().is_none_or(str::is_empty) {
            main.image = Some(defaults.image.clone());
        }
        main_image = main.image.clone().unwrap_or_default();
        append_missing(&mut main.ports, &defaults.ports, |a, b| a.name == b.name);
        append_missing(&mut main.env, &defaults.env, |a, b| a.name == b.name);
        if main.args.is_none() && !defaults.args.is_empty() {
            main.args = Some(defaults.args.clone());
        }
        append_missing(&mut main.volume_mounts, &mounts, |a, b| {
            a.name == b.name || a.mount_path == b.mount_path
        });
        if !defaults.memory.is_empty() {
            default_memory(
                main.resources.get_or_insert_with(ResourceRequirements::default),
                &defaults.memory,
            );
        }
    }

    let init_containers: Vec<Container> = defaults
        .init_containers
        .iter()
        .cloned()
        .map(|mut c| {
            if c.image.as_deref().is_none_or(str::is_empty) {
                c.image = Some(main_image.clone());
            }
            c
        })
        .collect();
    append_missing(&mut spec.init_containers, &init_containers, |a, b| a.name == b.name);
    if spec.init_containers.as_ref().is_some_and(Vec::is_empty) {
        spec.init_containers = None;
    }

    debug!(
        container = %defaults.container_name,
        image = %main_image,
        volumes = defaults.volumes.len(),
        "Built pod template"
    );
    template
}

/// The container named `name` in a pod template.
#[must_use]
pub fn container<'a>(template: &'a PodTemplateSpec, name: &str) -> Option<&'a Container> {
    template
        .spec
        .as_ref()
        .and_then(|s| s.containers.iter().find(|c| c.name == name))
}

/// Mutable access to the container named `name` in a pod template.
pub fn container_mut<'a>(template: &'a mut PodTemplateSpec, name: &str) -> Option<&'a mut Container> {
    template
        .spec
        .as_mut()
        .and_then(|s| s.containers.iter_mut().find(|c| c.name == name))
}

/// Memory request of a container, e.g. `1Gi`.
#[must_use]
pub fn memory_request(container: &Container) -> Option<String> {
    container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get(MEMORY_RESOURCE))
        .map(|q| q.0.clone())
}

/// Set a label on the pod template.
pub fn set_pod_label(template: &mut PodTemplateSpec, key: &str, value: &str) {
    template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}

/// Builds a `Deployment` running `replicas` copies of `template`.
///
/// The template hash annotation is set, ready for
/// [`reconcile_deployment`](crate::reconcilers::resources::reconcile_deployment).
#[must_use]
pub fn build_deployment(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    replicas: i32,
    template: PodTemplateSpec,
) -> Deployment {
    let spec = DeploymentSpec {
        replicas: Some(replicas),
        selector: LabelSelector {
            match_labels: Some(labels.clone()),
            ..Default::default()
        },
        template,
        ..Default::default()
    };
    let mut deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    };
    let hash_source = deployment.spec.clone();
    set_template_hash(&mut deployment, &hash_source);
    deployment
}

/// Builds a `StatefulSet` running `replicas` copies of `template`.
#[must_use]
pub fn build_stateful_set(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    replicas: i32,
    service_name: &str,
    template: PodTemplateSpec,
) -> StatefulSet {
    let spec = StatefulSetSpec {
        replicas: Some(replicas),
        service_name: Some(service_name.to_string()),
        pod_management_policy: Some("Parallel".to_string()),
        selector: LabelSelector {
            match_labels: Some(labels.clone()),
            ..Default::default()
        },
        template,
        ..Default::default()
    };
    let mut stateful_set = StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    };
    let hash_source = stateful_set.spec.clone();
    set_template_hash(&mut stateful_set, &hash_source);
    stateful_set
}

/// Builds a `Service` selecting `selector` and exposing `ports`.
///
/// User labels, annotations and type from the `http.service` template are
/// applied on top of the defaults.
#[must_use]
pub fn build_service(
    name: &str,
    namespace: &str,
    selector: &BTreeMap<String, String>,
    ports: Vec<ServicePort>,
    template: Option<&ServiceTemplate>,
) -> Service {
    let mut labels = selector.clone();
    let mut annotations = None;
    let mut spec = ServiceSpec {
        selector: Some(selector.clone()),
        ports: Some(ports),
        type_: Some("ClusterIP".to_string()),
        ..Default::default()
    };
    if let Some(template) = template {
        if let Some(user_labels) = &template.metadata.labels {
            labels.extend(user_labels.clone());
        }
        annotations.clone_from(&template.metadata.annotations);
        if let Some(type_) = &template.spec.type_ {
            spec.type_ = Some(type_.clone());
        }
    }
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations,
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

/// Builds a headless `Service` selecting `selector`.
#[must_use]
pub fn build_headless_service(
    name: &str,
    namespace: &str,
    selector: &BTreeMap<String, String>,
    ports: Vec<ServicePort>,
) -> Service {
    let mut service = build_service(name, namespace, selector, ports, None);
    if let Some(spec) = service.spec.as_mut() {
        spec.cluster_ip = Some("None".to_string());
        spec.publish_not_ready_addresses = Some(true);
    }
    service
}

#[cfg(test)]
#[path = "workloads_tests.rs"]
mod workloads_tests;
