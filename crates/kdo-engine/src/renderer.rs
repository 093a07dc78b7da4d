//! Chart rendering
//!
//! A chart renders to one [`ObjectStream`]: every sub-chart's output,
//! depth-first in declared order, then the chart's own jewels, then the
//! output of its `template` method. Nothing is rendered until the stream is
//! drained.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kdo_core::chart::{OVERLAY_DIR, TEMPLATE_METHOD, TEMPLATES_DIR};
use kdo_core::context::Capabilities;
use kdo_core::{
    Chart, ChartFiles, Cluster, CoreError, MethodCall, MethodOutput, Object, ObjectStream,
    OverlayInput, Result, ScriptValue, TemplateBuiltins, TemplateContext,
};
use minijinja::Value;
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;

use crate::engine::TemplateEngine;
use crate::error::EngineError;
use crate::objects::{ApiVersions, ChartObject, FilesObject, K8sObject, MethodsObject};
use crate::overlay::{Bindings, OverlayEngine, OverlaySet, YamlOverlay};
use crate::vault::Vault;

/// Renders charts through per-file templates, overlays and chart methods
#[derive(Clone)]
pub struct ChartRenderer {
    engine: TemplateEngine,
    overlay: Arc<dyn OverlayEngine>,
    vault: Vault,
    capabilities: Capabilities,
    glob: Option<String>,
}

impl Default for ChartRenderer {
    fn default() -> Self {
        let engine = TemplateEngine::default();
        Self {
            overlay: Arc::new(YamlOverlay::new(engine.clone())),
            engine,
            vault: Vault::default(),
            capabilities: Capabilities::default(),
            glob: None,
        }
    }
}

impl std::fmt::Debug for ChartRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartRenderer")
            .field("engine", &self.engine)
            .field("capabilities", &self.capabilities)
            .field("glob", &self.glob)
            .finish_non_exhaustive()
    }
}

impl ChartRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, engine: TemplateEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_overlay_engine(mut self, overlay: Arc<dyn OverlayEngine>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_vault(mut self, vault: Vault) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Only render template files matching `glob`
    pub fn with_glob(mut self, glob: Option<String>) -> Self {
        self.glob = glob;
        self
    }

    /// The whole chart tree: sub-charts first, each scoped to its own
    /// namespace, then the chart itself
    pub fn template(&self, chart: &Chart, cluster: Arc<dyn Cluster>) -> ObjectStream {
        let mut streams = Vec::with_capacity(chart.subcharts.len() + 1);
        for sub in &chart.subcharts {
            let scoped = cluster.for_sub_chart(
                &sub.namespace,
                sub.name(),
                sub.version(),
                sub.subcharts.len(),
            );
            streams.push(self.template(sub, scoped));
        }
        streams.push(self.template_own(chart, cluster));
        ObjectStream::concat(streams)
    }

    /// The chart's jewels followed by its `template` method output
    pub fn template_own(&self, chart: &Chart, cluster: Arc<dyn Cluster>) -> ObjectStream {
        let jewels = self.vault.stream(chart, cluster.clone());

        let renderer = self.clone();
        let chart = Arc::new(chart.clone());
        let rendered = ObjectStream::deferred(move || async move {
            tracing::debug!(chart = chart.name(), namespace = %chart.namespace, "rendering chart");
            let output = invoke_method(
                &chart,
                TEMPLATE_METHOD,
                Vec::new(),
                renderer.glob.clone(),
                Some(cluster),
                &renderer,
            )
            .await
            .map_err(|err| err.in_chart(chart.name()))?;
            Ok::<_, CoreError>(output.into_stream())
        });

        ObjectStream::concat(vec![jewels, rendered])
    }

    fn template_context(
        &self,
        chart: &Chart,
        cluster: Option<Arc<dyn Cluster>>,
        handle: &Handle,
    ) -> Result<Value> {
        let shared = Arc::new(chart.clone());
        let ctx = TemplateContext::for_chart(chart).with_capabilities(self.capabilities.clone());

        let mut capabilities = BTreeMap::new();
        capabilities.insert(
            "apiVersions",
            Value::from_object(ApiVersions(ctx.capabilities.api_versions.clone())),
        );
        capabilities.insert(
            "kubeVersion",
            Value::from_serialize(&ctx.capabilities.kube_version),
        );

        let mut context = BTreeMap::new();
        context.insert("values", Value::from_serialize(&ctx.values));
        context.insert("release", Value::from_serialize(&ctx.release));
        context.insert("chart", Value::from_serialize(&ctx.chart));
        context.insert("template", Value::from_serialize(&ctx.template));
        context.insert("capabilities", Value::from_iter(capabilities));
        context.insert(
            "files",
            Value::from_object(FilesObject::new(ChartFiles::new(&chart.root)?)),
        );
        context.insert(
            "methods",
            Value::from_object(self.methods_object(&shared, cluster.clone(), handle)),
        );
        context.insert(
            "self",
            Value::from_object(ChartObject::new(
                shared.clone(),
                self.methods_object(&shared, cluster.clone(), handle),
            )),
        );
        if let Some(cluster) = cluster {
            context.insert("k8s", Value::from_object(K8sObject::new(cluster, handle.clone())));
        }
        Ok(Value::from_iter(context))
    }

    fn methods_object(
        &self,
        chart: &Arc<Chart>,
        cluster: Option<Arc<dyn Cluster>>,
        handle: &Handle,
    ) -> MethodsObject {
        MethodsObject::new(chart.clone(), Arc::new(self.clone()), cluster, handle.clone())
    }
}

/// Invoke the method `name` of `chart`, binding only the inputs its
/// signature accepts. A chart without a `template` method renders through
/// the built-in one.
pub async fn invoke_method(
    chart: &Chart,
    name: &str,
    args: Vec<ScriptValue>,
    glob: Option<String>,
    cluster: Option<Arc<dyn Cluster>>,
    builtins: &dyn TemplateBuiltins,
) -> Result<MethodOutput> {
    let Some(method) = chart.method(name) else {
        if name == TEMPLATE_METHOD {
            let stream = builtins
                .default_template(chart, glob.as_deref(), cluster)
                .await?;
            return Ok(MethodOutput::Stream(stream));
        }
        return Err(CoreError::Resolution {
            reference: format!("{}.{}", chart.name(), name),
            message: "no such method".to_string(),
        });
    };

    let signature = method.signature();
    tracing::debug!(chart = chart.name(), method = name, ?signature, "invoking chart method");
    method
        .call(MethodCall {
            chart,
            cluster: cluster.filter(|_| signature.cluster),
            glob: glob.filter(|_| signature.glob),
            args,
            builtins,
        })
        .await
}

fn join_error(chart: &Chart, err: tokio::task::JoinError) -> CoreError {
    CoreError::Render {
        chart: chart.name().to_string(),
        message: format!("render task failed: {}", err),
    }
}

#[async_trait]
impl TemplateBuiltins for ChartRenderer {
    async fn legacy(
        &self,
        chart: &Chart,
        dir: &str,
        glob: Option<&str>,
        cluster: Option<Arc<dyn Cluster>>,
    ) -> Result<ObjectStream> {
        let handle = Handle::current();
        let context = self.template_context(chart, cluster, &handle)?;
        let engine = self.engine.clone();
        let path = chart.path(dir);
        let glob = glob.map(str::to_string);

        let files = tokio::task::spawn_blocking(move || {
            engine.render_dir(&path, glob.as_deref(), &context)
        })
        .await
        .map_err(|e| join_error(chart, e))?
        .map_err(|e| e.into_core(chart.name()))?;

        let mut objects: Vec<Object> = Vec::new();
        for file in &files {
            objects.extend(file.objects().map_err(|e| e.into_core(chart.name()))?);
        }
        tracing::debug!(
            chart = chart.name(),
            dir,
            files = files.len(),
            objects = objects.len(),
            "rendered templates"
        );
        Ok(ObjectStream::from_objects(objects))
    }

    async fn overlay(
        &self,
        chart: &Chart,
        inputs: Vec<OverlayInput>,
        cluster: Option<Arc<dyn Cluster>>,
    ) -> Result<ObjectStream> {
        let into_core = |e: EngineError| e.into_core(chart.name());
        let handle = Handle::current();
        let shared = Arc::new(chart.clone());
        let mut set = OverlaySet::new().map_err(into_core)?;

        for input in inputs {
            match input {
                OverlayInput::Path(path) => {
                    set.add_path(&chart.root, &path, None).map_err(into_core)?;
                }
                OverlayInput::Injected { dir, bindings } => {
                    let mut context = Bindings::new();
                    match bindings {
                        JsonValue::Object(map) => {
                            for (key, value) in map {
                                context.insert(key, Value::from_serialize(&value));
                            }
                        }
                        JsonValue::Null => {}
                        other => {
                            return Err(CoreError::Render {
                                chart: chart.name().to_string(),
                                message: format!("overlay bindings must be a mapping, got {}", other),
                            });
                        }
                    }
                    context.insert(
                        "self".to_string(),
                        Value::from_object(ChartObject::new(
                            shared.clone(),
                            self.methods_object(&shared, cluster.clone(), &handle),
                        )),
                    );
                    if let Some(cluster) = &cluster {
                        context.insert(
                            "k8s".to_string(),
                            Value::from_object(K8sObject::new(cluster.clone(), handle.clone())),
                        );
                    }
                    let id = set.add_context(context);
                    set.add_path(&chart.root, &dir, Some(&id)).map_err(into_core)?;
                }
                OverlayInput::Stream(stream) => {
                    let yaml = stream.encode().await?;
                    set.materialize(&yaml).map_err(into_core)?;
                }
                OverlayInput::Value(value) => {
                    let yaml = value.into_stream().encode().await?;
                    set.materialize(&yaml).map_err(into_core)?;
                }
            }
        }

        let overlay = self.overlay.clone();
        let yaml = tokio::task::spawn_blocking(move || set.render(overlay.as_ref()))
            .await
            .map_err(|e| join_error(chart, e))?
            .map_err(into_core)?;
        Ok(ObjectStream::decode(yaml))
    }

    async fn default_template(
        &self,
        chart: &Chart,
        glob: Option<&str>,
        cluster: Option<Arc<dyn Cluster>>,
    ) -> Result<ObjectStream> {
        let legacy = self.legacy(chart, TEMPLATES_DIR, glob, cluster.clone()).await?;
        if !chart.path(OVERLAY_DIR).is_dir() {
            return Ok(legacy);
        }

        let bindings = serde_json::json!({ "values": chart.values.inner() });
        let overlay = self
            .overlay(
                chart,
                vec![OverlayInput::Injected {
                    dir: PathBuf::from(OVERLAY_DIR),
                    bindings,
                }],
                cluster,
            )
            .await?;
        Ok(ObjectStream::concat(vec![legacy, overlay]))
    }
}
