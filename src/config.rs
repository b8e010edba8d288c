// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator command line and configuration file.
//!
//! Flags set the defaults. An optional YAML file passed with `--config`
//! overrides any flag it sets:
//!
//! ```yaml
//! namespace: elastic-system
//! metricsAddr: 0.0.0.0:9090
//! caCertValidityHours: 8760
//! caCertRotateBeforeHours: 24
//! certValidityHours: 8760
//! certRotateBeforeHours: 24
//! ```

use crate::certificates::RotationParams;
use crate::constants::{
    DEFAULT_CA_VALIDITY_HOURS, DEFAULT_CERT_VALIDITY_HOURS, DEFAULT_METRICS_ADDR,
    DEFAULT_ROTATE_BEFORE_HOURS,
};
use crate::errors::{OperatorError, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Kubernetes operator for the Elastic Stack.
#[derive(Parser, Debug)]
#[command(name = "elastic-operator", version, about)]
pub struct Cli {
    /// Subcommand, `run` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Operator settings
    #[command(flatten)]
    pub run: RunArgs,
}

/// Operator subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the controllers (default)
    Run,
    /// Print shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Settings of the `run` subcommand.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Only watch resources in this namespace
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Listen address of the metrics and health server
    #[arg(long, default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: String,

    /// Validity of self-signed CA certificates, in hours
    #[arg(long, default_value_t = DEFAULT_CA_VALIDITY_HOURS)]
    pub ca_cert_validity_hours: i64,

    /// Rotate CA certificates this many hours before they expire
    #[arg(long, default_value_t = DEFAULT_ROTATE_BEFORE_HOURS)]
    pub ca_cert_rotate_before_hours: i64,

    /// Validity of issued certificates, in hours
    #[arg(long, default_value_t = DEFAULT_CERT_VALIDITY_HOURS)]
    pub cert_validity_hours: i64,

    /// Rotate issued certificates this many hours before they expire
    #[arg(long, default_value_t = DEFAULT_ROTATE_BEFORE_HOURS)]
    pub cert_rotate_before_hours: i64,

    /// YAML file overriding the flags above
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Contents of the configuration file. Every field is optional.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OperatorConfig {
    /// Only watch resources in this namespace
    pub namespace: Option<String>,
    /// Listen address of the metrics and health server
    pub metrics_addr: Option<String>,
    /// Validity of self-signed CA certificates, in hours
    pub ca_cert_validity_hours: Option<i64>,
    /// Rotate CA certificates this many hours before they expire
    pub ca_cert_rotate_before_hours: Option<i64>,
    /// Validity of issued certificates, in hours
    pub cert_validity_hours: Option<i64>,
    /// Rotate issued certificates this many hours before they expire
    pub cert_rotate_before_hours: Option<i64>,
}

impl OperatorConfig {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on invalid YAML or unknown fields.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Read and parse a YAML file.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the file cannot be read, or a
    /// configuration error if it cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OperatorError::Validation(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }
}

/// Resolved operator parameters shared by all controllers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorParams {
    /// Only watch resources in this namespace
    pub namespace: Option<String>,
    /// Listen address of the metrics and health server
    pub metrics_addr: String,
    /// Rotation of self-signed CAs
    pub ca_rotation: RotationParams,
    /// Rotation of issued certificates
    pub cert_rotation: RotationParams,
}

impl Default for OperatorParams {
    fn default() -> Self {
        Self {
            namespace: None,
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
            ca_rotation: RotationParams::default_ca(),
            cert_rotation: RotationParams::default_cert(),
        }
    }
}

impl OperatorParams {
    /// Check that every rotation window fits inside its validity.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        validate_rotation("CA certificate", &self.ca_rotation)?;
        validate_rotation("certificate", &self.cert_rotation)
    }
}

fn validate_rotation(what: &str, rotation: &RotationParams) -> Result<()> {
    if rotation.validity <= chrono::Duration::zero() {
        return Err(OperatorError::Validation(format!(
            "{what} validity must be positive"
        )));
    }
    if rotation.rotate_before < chrono::Duration::zero()
        || rotation.rotate_before >= rotation.validity
    {
        return Err(OperatorError::Validation(format!(
            "{what} rotate-before ({}h) must be lower than its validity ({}h)",
            rotation.rotate_before.num_hours(),
            rotation.validity.num_hours()
        )));
    }
    Ok(())
}

impl RunArgs {
    /// Apply the configuration file over the flags and validate the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the values are invalid.
    pub fn resolve(&self) -> Result<OperatorParams> {
        let file = match &self.config {
            Some(path) => OperatorConfig::from_file(path)?,
            None => OperatorConfig::default(),
        };
        let params = OperatorParams {
            namespace: file.namespace.or_else(|| self.namespace.clone()),
            metrics_addr: file
                .metrics_addr
                .unwrap_or_else(|| self.metrics_addr.clone()),
            ca_rotation: RotationParams::from_hours(
                file.ca_cert_validity_hours
                    .unwrap_or(self.ca_cert_validity_hours),
                file.ca_cert_rotate_before_hours
                    .unwrap_or(self.ca_cert_rotate_before_hours),
            ),
            cert_rotation: RotationParams::from_hours(
                file.cert_validity_hours.unwrap_or(self.cert_validity_hours),
                file.cert_rotate_before_hours
                    .unwrap_or(self.cert_rotate_before_hours),
            ),
        };
        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
