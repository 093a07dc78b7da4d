//! kdo core - Object streams, charts, jewels and the cluster capability
//!
//! This crate provides the foundational types used throughout kdo:
//! - `Object` / `ObjectStream`: manifests and the lazy stream that carries them
//! - `Chart`: a loaded chart tree with values, methods and jewels
//! - `Jewel`: a named secret resolved through a pluggable backend
//! - `Cluster`: what a render or apply pass may ask of a cluster
//! - `Options`: per-call configuration of cluster operations

pub mod annotations;
pub mod chart;
pub mod cluster;
pub mod context;
pub mod error;
pub mod files;
pub mod jewel;
pub mod method;
pub mod object;
pub mod options;
pub mod release;
pub mod stream;
pub mod value;
pub mod values;

pub use chart::{Chart, ChartManifest, JewelSpec, ReadinessCheck};
pub use cluster::{Cluster, ClusterScope, FailureRule, InMemoryCluster, Tool};
pub use context::TemplateContext;
pub use error::{CoreError, Result};
pub use files::{ChartFiles, FileEntry};
pub use jewel::{Jewel, JewelBackend, JewelKey, JewelStore, JewelValue};
pub use method::{
    ChartMethod, MethodCall, MethodOutput, MethodSignature, OverlayInput, TemplateBuiltins,
};
pub use object::Object;
pub use options::{Options, PatchType};
pub use release::{ReleaseInfo, ReleaseRecord};
pub use stream::{FnConsumer, ObjectConsumer, ObjectSource, ObjectStream};
pub use value::{MethodRef, ScriptValue};
pub use values::{Values, parse_set_values};
