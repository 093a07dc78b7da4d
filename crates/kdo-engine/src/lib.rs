//! kdo Engine - renders charts into object streams
//!
//! This crate provides:
//! - MiniJinja per-file templates with Kubernetes filters and source-mapped errors
//! - A declarative overlay pass over sorted file sets
//! - Jewel resolution and the built-in prompt and generated backends
//! - The extension registry charts bind methods, values and backends from
//! - `ChartRenderer`, which merges all of it into one stream per chart tree

pub mod backends;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod filters;
pub mod functions;
pub mod loader;
pub mod objects;
pub mod overlay;
pub mod renderer;
pub mod vault;

pub use backends::{
    ClusterJewelStore, GeneratedBackend, LineReader, PromptBackend, ScriptedReader, SharedReader,
};
pub use engine::{RenderedFile, TemplateEngine};
pub use error::{EngineError, TemplateError, TemplateErrorKind};
pub use extensions::{EXTENSION_PREFIX, Extensions, Module};
pub use loader::ChartLoader;
pub use overlay::{OverlayEngine, OverlayFile, YamlOverlay};
pub use renderer::{ChartRenderer, invoke_method};
pub use vault::Vault;
