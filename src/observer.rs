// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Elasticsearch cluster health observation.
//!
//! The Elasticsearch driver asks a [`ClusterHealthObserver`] for the health of
//! a cluster once all its node sets are rolled out. An unreachable cluster is
//! reported as `None` and recorded as unknown health.

use crate::constants::{ELASTIC_USER_NAME, ES_HEALTH_TIMEOUT_SECS};
use crate::crd::ElasticsearchHealth;
use crate::watches::ObjectKey;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Basic auth credentials of an Elasticsearch user.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl BasicAuth {
    /// Credentials of the `elastic` superuser.
    #[must_use]
    pub fn elastic(password: &str) -> Self {
        Self {
            username: ELASTIC_USER_NAME.to_string(),
            password: password.to_string(),
        }
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of Elasticsearch cluster health.
#[async_trait]
pub trait ClusterHealthObserver: Send + Sync {
    /// Health of the cluster `es` reachable at `url`, or `None` if it cannot be queried.
    ///
    /// # Arguments
    ///
    /// * `es` - Namespace and name of the cluster
    /// * `url` - Base URL of the cluster HTTP service
    /// * `credentials` - User to authenticate as
    /// * `ca` - PEM CA to trust for an `https` URL
    async fn cluster_health(
        &self,
        es: &ObjectKey,
        url: &str,
        credentials: &BasicAuth,
        ca: Option<&[u8]>,
    ) -> Option<ElasticsearchHealth>;
}

#[derive(Deserialize)]
struct HealthResponse {
    status: ElasticsearchHealth,
}

/// Observer calling `GET {url}/_cluster/health`.
#[derive(Debug, Clone)]
pub struct HttpClusterHealthObserver {
    timeout: Duration,
}

impl Default for HttpClusterHealthObserver {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(ES_HEALTH_TIMEOUT_SECS),
        }
    }
}

impl HttpClusterHealthObserver {
    /// Observer with the default request timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer with a custom request timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client(&self, ca: Option<&[u8]>) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout).no_proxy();
        if let Some(pem) = ca {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        builder.build()
    }
}

/// `{url}/_cluster/health`, keeping any path prefix of `url`.
///
/// # Errors
///
/// Returns an error if `url` is not an absolute URL.
pub fn health_endpoint(url: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("_cluster/health")
}

#[async_trait]
impl ClusterHealthObserver for HttpClusterHealthObserver {
    async fn cluster_health(
        &self,
        es: &ObjectKey,
        url: &str,
        credentials: &BasicAuth,
        ca: Option<&[u8]>,
    ) -> Option<ElasticsearchHealth> {
        let client = match self.client(ca) {
            Ok(client) => client,
            Err(e) => {
                warn!(cluster = %es, error = %e, "Failed to build Elasticsearch client");
                return None;
            }
        };
        let endpoint = match health_endpoint(url) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(cluster = %es, url = %url, error = %e, "Invalid Elasticsearch URL");
                return None;
            }
        };
        let response = client
            .get(endpoint)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match response {
            Ok(response) => match response.json::<HealthResponse>().await {
                Ok(body) => Some(body.status),
                Err(e) => {
                    debug!(cluster = %es, error = %e, "Unexpected cluster health response");
                    None
                }
            },
            Err(e) => {
                debug!(cluster = %es, error = %e, "Elasticsearch cluster not reachable");
                None
            }
        }
    }
}

/// Observer returning preset health values, keyed by cluster.
#[derive(Debug, Default)]
pub struct StaticHealthObserver {
    health: Mutex<BTreeMap<ObjectKey, ElasticsearchHealth>>,
}

impl StaticHealthObserver {
    /// Observer that never reaches any cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `health` for `es` from now on.
    pub fn set(&self, es: ObjectKey, health: ElasticsearchHealth) {
        self.health
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(es, health);
    }
}

#[async_trait]
impl ClusterHealthObserver for StaticHealthObserver {
    async fn cluster_health(
        &self,
        es: &ObjectKey,
        _url: &str,
        _credentials: &BasicAuth,
        _ca: Option<&[u8]>,
    ) -> Option<ElasticsearchHealth> {
        self.health
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(es)
            .copied()
    }
}

#[cfg(test)]
#[path = "observer_tests.rs"]
mod observer_tests;
