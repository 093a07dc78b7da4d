//! Chart methods and the built-in template backends they can use
//!
//! A chart's `template` method produces its objects. Which arguments a
//! method receives is decided by its [`MethodSignature`], never by guessing
//! from how many parameters it has.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::chart::Chart;
use crate::cluster::Cluster;
use crate::error::Result;
use crate::stream::ObjectStream;
use crate::value::ScriptValue;

/// Optional inputs a method accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodSignature {
    /// Receives the live cluster handle
    pub cluster: bool,
    /// Receives the template file filter
    pub glob: bool,
}

impl MethodSignature {
    pub const PLAIN: Self = Self {
        cluster: false,
        glob: false,
    };
    pub const FULL: Self = Self {
        cluster: true,
        glob: true,
    };
}

/// Arguments of one method invocation
pub struct MethodCall<'a> {
    pub chart: &'a Chart,
    /// Bound only when the signature accepts it
    pub cluster: Option<Arc<dyn Cluster>>,
    /// Bound only when the signature accepts it and a filter was given
    pub glob: Option<String>,
    /// Positional arguments from the caller
    pub args: Vec<ScriptValue>,
    pub builtins: &'a dyn TemplateBuiltins,
}

impl MethodCall<'_> {
    pub fn arg(&self, index: usize) -> Option<&ScriptValue> {
        self.args.get(index)
    }
}

/// What a method produced
pub enum MethodOutput {
    Value(ScriptValue),
    Stream(ObjectStream),
}

impl MethodOutput {
    pub fn into_stream(self) -> ObjectStream {
        match self {
            MethodOutput::Value(value) => value.into_stream(),
            MethodOutput::Stream(stream) => stream,
        }
    }
}

impl fmt::Debug for MethodOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodOutput::Value(value) => f.debug_tuple("Value").field(value).finish(),
            MethodOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[async_trait]
pub trait ChartMethod: Send + Sync {
    fn signature(&self) -> MethodSignature {
        MethodSignature::FULL
    }

    async fn call(&self, call: MethodCall<'_>) -> Result<MethodOutput>;
}

/// One input of an overlay pass
pub enum OverlayInput {
    /// File or directory relative to the chart root
    Path(PathBuf),
    /// Files of `dir`, rendered with `bindings` as their context
    Injected { dir: PathBuf, bindings: JsonValue },
    /// Objects materialized as a document file
    Stream(ObjectStream),
    /// Data materialized as a document file
    Value(ScriptValue),
}

impl fmt::Debug for OverlayInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayInput::Path(path) => f.debug_tuple("Path").field(path).finish(),
            OverlayInput::Injected { dir, .. } => {
                f.debug_struct("Injected").field("dir", dir).finish_non_exhaustive()
            }
            OverlayInput::Stream(_) => f.write_str("Stream(..)"),
            OverlayInput::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

/// Rendering backends available to every chart method
#[async_trait]
pub trait TemplateBuiltins: Send + Sync {
    /// Render each file of `dir` (relative to the chart root) as a template
    async fn legacy(
        &self,
        chart: &Chart,
        dir: &str,
        glob: Option<&str>,
        cluster: Option<Arc<dyn Cluster>>,
    ) -> Result<ObjectStream>;

    /// Render `inputs` as one overlay file set
    async fn overlay(
        &self,
        chart: &Chart,
        inputs: Vec<OverlayInput>,
        cluster: Option<Arc<dyn Cluster>>,
    ) -> Result<ObjectStream>;

    /// What a chart renders when it declares no `template` method
    async fn default_template(
        &self,
        chart: &Chart,
        glob: Option<&str>,
        cluster: Option<Arc<dyn Cluster>>,
    ) -> Result<ObjectStream>;
}
