// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Elasticsearch users created for associations.
//!
//! Each dependent gets its own Elasticsearch user named
//! `{namespace}-{name}-{product}-user`. Two secrets describe it:
//!
//! - the clear-text auth secret `{name}-{short}-es-auth` next to the
//!   dependent, read by the product to authenticate
//! - the user secret `{user}` next to the Elasticsearch cluster, holding the
//!   password hash and roles the cluster aggregates into its file realm

use super::Associated;
use crate::constants::{PASSWORD_LENGTH, PASSWORD_SALT_LENGTH};
use crate::errors::{OperatorError, Result};
use crate::labels::{ELASTICSEARCH_CLUSTER_NAME_LABEL, TYPE_LABEL, USER_TYPE};
use crate::reconcilers::finalizers::Finalizer;
use crate::reconcilers::resources::reconcile_secret;
use crate::store::{controller_reference, delete_if_exists, get_if_exists, ObjectStore};
use crate::watches::ObjectKey;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::info;

/// Prefix of salted SHA-256 password hashes.
const SSHA256_PREFIX: &str = "{SSHA256}";

/// User secret key holding the user name.
pub const USER_NAME_KEY: &str = "name";

/// User secret key holding the password hash.
pub const PASSWORD_HASH_KEY: &str = "passwordHash";

/// User secret key holding the comma separated roles.
pub const USER_ROLES_KEY: &str = "userRoles";

/// Name of the Elasticsearch user of a dependent.
#[must_use]
pub fn user_name(namespace: &str, name: &str, product: &str) -> String {
    format!("{namespace}-{name}-{product}-user")
}

/// A random alphanumeric password.
#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

fn ssha256(password: &str, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    let mut bytes = hasher.finalize().to_vec();
    bytes.extend_from_slice(salt);
    format!("{SSHA256_PREFIX}{}", STANDARD.encode(bytes))
}

/// `{SSHA256}` hash of `password` with a random salt.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let salt: [u8; PASSWORD_SALT_LENGTH] = rand::thread_rng().gen();
    ssha256(password, &salt)
}

/// Whether `hash` is a `{SSHA256}` hash of `password`.
#[must_use]
pub fn verify_password(hash: &str, password: &str) -> bool {
    let Some(encoded) = hash.strip_prefix(SSHA256_PREFIX) else {
        return false;
    };
    let Ok(bytes) = STANDARD.decode(encoded) else {
        return false;
    };
    let digest_len = Sha256::output_size();
    if bytes.len() <= digest_len {
        return false;
    }
    ssha256(password, &bytes[digest_len..]) == hash
}

/// Credentials of the Elasticsearch user of one dependent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserCredentials {
    /// User name, also the key of the password in the auth secret
    pub user_name: String,
    /// Name of the clear-text auth secret in the dependent's namespace
    pub auth_secret_name: String,
}

fn password_from(secret: Option<&Secret>, key: &str) -> Option<String> {
    secret
        .and_then(|s| s.data.as_ref())
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .filter(|p| !p.is_empty())
}

/// Reconcile the auth secret and the Elasticsearch user secret of `resource`.
///
/// The stored password is reused when present. The password hash is only
/// recomputed when it no longer matches the password.
///
/// # Arguments
///
/// * `store` - Object store
/// * `resource` - The dependent resource
/// * `es` - Namespace and name of the referenced Elasticsearch cluster
///
/// # Errors
///
/// Returns any store error.
pub async fn reconcile_es_user<K, S>(store: &S, resource: &K, es: &ObjectKey) -> Result<UserCredentials>
where
    K: Associated,
    S: ObjectStore + ?Sized,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let user = user_name(&namespace, &name, K::PRODUCT);
    let auth_secret_name = K::NAMER.es_auth_secret(&name);
    let association_labels = K::LABELS.pair_selector(&name, &namespace);

    let existing_auth = get_if_exists::<Secret, _>(store, &namespace, &auth_secret_name).await?;
    let password =
        password_from(existing_auth.as_ref(), &user).unwrap_or_else(generate_password);

    let auth_secret = Secret {
        metadata: ObjectMeta {
            name: Some(auth_secret_name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(association_labels.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            user.clone(),
            ByteString(password.clone().into_bytes()),
        )])),
        ..Default::default()
    };
    let owner = controller_reference(resource)?;
    reconcile_secret(store, auth_secret, Some(&owner)).await?;

    let existing_user = get_if_exists::<Secret, _>(store, &es.namespace, &user).await?;
    let password_hash = existing_user
        .as_ref()
        .and_then(|s| password_from(Some(s), PASSWORD_HASH_KEY))
        .filter(|hash| verify_password(hash, &password))
        .unwrap_or_else(|| {
            info!(namespace = %es.namespace, user = %user, "Hashing password of association user");
            hash_password(&password)
        });

    let mut user_labels = association_labels;
    user_labels.insert(TYPE_LABEL.to_string(), USER_TYPE.to_string());
    user_labels.insert(
        ELASTICSEARCH_CLUSTER_NAME_LABEL.to_string(),
        es.name.clone(),
    );
    let user_secret = Secret {
        metadata: ObjectMeta {
            name: Some(user.clone()),
            namespace: Some(es.namespace.clone()),
            labels: Some(user_labels),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (USER_NAME_KEY.to_string(), ByteString(user.clone().into_bytes())),
            (
                PASSWORD_HASH_KEY.to_string(),
                ByteString(password_hash.into_bytes()),
            ),
            (
                USER_ROLES_KEY.to_string(),
                ByteString(K::USER_ROLE.as_bytes().to_vec()),
            ),
        ])),
        ..Default::default()
    };
    // cross-namespace: garbage collected through the association labels, not an owner reference
    reconcile_secret(store, user_secret, None).await?;

    Ok(UserCredentials {
        user_name: user,
        auth_secret_name,
    })
}

/// Finalizer deleting every secret created for one dependent, in any namespace.
pub struct UserFinalizer<'a, S: ?Sized> {
    store: &'a S,
    name: String,
    selector: BTreeMap<String, String>,
}

impl<'a, S: ObjectStore + ?Sized> UserFinalizer<'a, S> {
    /// Finalizer `name` for the dependent identified by `key`.
    #[must_use]
    pub fn new<K: Associated>(store: &'a S, name: String, key: &ObjectKey) -> Self {
        Self {
            store,
            name,
            selector: K::LABELS.pair_selector(&key.name, &key.namespace),
        }
    }
}

#[async_trait]
impl<S: ObjectStore + ?Sized> Finalizer for UserFinalizer<'_, S> {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn finalize(&self) -> Result<()> {
        let secrets: Vec<Secret> = self.store.list(None, &self.selector).await?;
        for secret in secrets {
            let namespace = secret.namespace().unwrap_or_default();
            let name = secret.name_any();
            delete_if_exists::<Secret, _>(self.store, &namespace, &name).await?;
            info!(namespace = %namespace, name = %name, "Deleted association secret");
        }
        Ok(())
    }
}

/// Password stored for `user` in an auth secret.
///
/// # Errors
///
/// Returns an association error if the secret does not hold the key.
pub fn auth_password(secret: &Secret, user: &str) -> Result<String> {
    password_from(Some(secret), user).ok_or_else(|| {
        OperatorError::Association(format!(
            "secret {} has no password for {user}",
            secret.name_any()
        ))
    })
}

#[cfg(test)]
#[path = "user_tests.rs"]
mod user_tests;
