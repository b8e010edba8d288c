// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use elastic_operator::config::OperatorParams;
use elastic_operator::context::Context;
use elastic_operator::crd::{
    Elasticsearch, ElasticsearchSpec, Logstash, LogstashSpec, NodeSet, ObjectSelector,
};
use elastic_operator::events::MemoryEventPublisher;
use elastic_operator::observer::StaticHealthObserver;
use elastic_operator::store::{MemoryStore, ObjectStore};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Secret};
use kube::client::Client;
use std::sync::Arc;

/// In-memory operator wiring shared by the scenario tests.
pub struct Stack {
    pub store: Arc<MemoryStore>,
    pub events: Arc<MemoryEventPublisher>,
    pub observer: Arc<StaticHealthObserver>,
    pub ctx: Context<MemoryStore>,
}

impl Stack {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(MemoryEventPublisher::new());
        let observer = Arc::new(StaticHealthObserver::new());
        let ctx = Context::new(
            store.clone(),
            events.clone(),
            observer.clone(),
            OperatorParams::default(),
        );
        Self {
            store,
            events,
            observer,
            ctx,
        }
    }

    pub async fn elasticsearch(&self, namespace: &str, name: &str) -> Elasticsearch {
        self.store.get(namespace, name).await.unwrap()
    }

    pub async fn logstash(&self, namespace: &str, name: &str) -> Logstash {
        self.store.get(namespace, name).await.unwrap()
    }

    pub async fn secret(&self, namespace: &str, name: &str) -> Secret {
        self.store.get(namespace, name).await.unwrap()
    }

    /// Pod template of a Deployment.
    pub async fn pod_template(&self, namespace: &str, deployment: &str) -> PodTemplateSpec {
        let deployment: Deployment = self.store.get(namespace, deployment).await.unwrap();
        deployment.spec.unwrap().template
    }

    /// Config checksum label of a Deployment's pod template.
    pub async fn checksum(&self, namespace: &str, deployment: &str, label: &str) -> String {
        let deployment: Deployment = self.store.get(namespace, deployment).await.unwrap();
        deployment.spec.unwrap().template.metadata.unwrap().labels.unwrap()[label].clone()
    }
}

pub fn elasticsearch(namespace: &str, name: &str) -> Elasticsearch {
    let mut es = Elasticsearch::new(
        name,
        ElasticsearchSpec {
            version: "7.4.0".to_string(),
            node_sets: vec![NodeSet {
                name: "default".to_string(),
                count: 1,
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    es.metadata.namespace = Some(namespace.to_string());
    es
}

pub fn logstash(namespace: &str, name: &str, es_name: &str, es_namespace: Option<&str>) -> Logstash {
    let mut ls = Logstash::new(
        name,
        LogstashSpec {
            version: "7.4.0".to_string(),
            count: 1,
            elasticsearch_ref: ObjectSelector {
                name: es_name.to_string(),
                namespace: es_namespace.map(str::to_string),
            },
            ..Default::default()
        },
    );
    ls.metadata.namespace = Some(namespace.to_string());
    ls
}

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}
