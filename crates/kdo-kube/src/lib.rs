//! Kubernetes integration for kdo
//!
//! - [`KubeCluster`]: the `Cluster` capability over a live API server
//! - [`Orchestrator`]: resolves, renders and applies chart trees
//! - [`Watcher`]: pull-style, cancellable iteration over a watch
//! - [`rollout`]: readiness checks run after apply

pub mod client;
pub mod error;
pub mod orchestrator;
pub mod rollout;
pub mod watch;

pub use client::KubeCluster;
pub use error::{KubeError, Result};
pub use orchestrator::{AppliedChart, ApplyOptions, ApplyReport, Orchestrator, releases};
pub use watch::{WatchIter, WatchState, Watcher};
