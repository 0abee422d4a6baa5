// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deckhand Cluster - Kubernetes and Helm plane adapter.
//!
//! The adapter is a pure plane client: no database access, no task
//! awareness. It provides:
//! - Helm child-process management with timeouts and captured output
//! - the chart repository index cache
//! - typed Kubernetes API access with per-user bearer tokens
//! - authorisation for the namespace-scoped cluster proxy
//! - the tool deployment status machine

#![warn(missing_docs)]

pub mod deployment;
pub mod error;
pub mod helm;
pub mod index;
pub mod kube;
pub mod proxy;

pub use deployment::{DeploymentStatus, DeploymentWatch, IDLED_LABEL};
pub use error::{HelmError, HelmResult, KubeError, KubeResult};
pub use helm::{Helm, HelmConfig, HelmProcess, ProcessState};
pub use index::{ChartEntry, ChartIndex};
pub use kube::{Deployment, KubeClient, KubeConfig, Pod};
pub use proxy::{ProxyUser, authorize, has_access_token};
