// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Elastic Operator - Elastic Stack on Kubernetes
//!
//! A Kubernetes operator written in Rust that runs Elasticsearch, Kibana,
//! APM Server and Logstash from Custom Resource Definitions (CRDs).
//!
//! ## Overview
//!
//! This library provides the core functionality of the operator:
//!
//! - Custom Resource Definitions for the four products
//! - Reconciliation of each product into Services, Secrets and workloads
//! - Associations wiring Kibana, APM Server and Logstash to an Elasticsearch
//!   cluster with a dedicated user and the cluster CA
//! - Self-signed HTTP certificates with automatic rotation
//! - Secure settings loaded into product keystores
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for each resource type
//! - [`context`] - Shared context of the controllers
//! - [`store`] - Object store abstraction over the Kubernetes API
//! - [`certificates`] - CA and HTTP certificate management
//! - [`settings`] - Layered product configuration files
//! - [`watches`] - Dynamic watches between resources
//!
//! ## Example
//!
//! ```rust,no_run
//! use elastic_operator::crd::{Logstash, LogstashSpec, ObjectSelector};
//!
//! let ls = Logstash::new(
//!     "ls1",
//!     LogstashSpec {
//!         version: "7.4.0".to_string(),
//!         count: 1,
//!         elasticsearch_ref: ObjectSelector {
//!             name: "es1".to_string(),
//!             namespace: None,
//!         },
//!         ..Default::default()
//!     },
//! );
//! ```
//!
//! ## Features
//!
//! - **Idempotent** - A pass with nothing to change performs no writes
//! - **Rolling restarts** - Pods restart when their configuration checksum changes
//! - **Status Tracking** - Full status subresources with health and conditions

pub mod certificates;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod events;
pub mod keystore;
pub mod labels;
pub mod metrics;
pub mod name;
pub mod observer;
pub mod reconcilers;
pub mod settings;
pub mod status_reasons;
pub mod store;
pub mod watches;
pub mod workloads;
