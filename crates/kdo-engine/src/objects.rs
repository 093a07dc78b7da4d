//! Objects exposed to templates
//!
//! Templates see charts, chart methods, the cluster handle and chart files
//! through these MiniJinja objects. Each one resolves attributes from a
//! fixed table, so templates only reach what is listed here:
//!
//! | object | attributes | methods |
//! |---|---|---|
//! | `self` | `name`, `version`, `namespace`, `values`, `jewels`, `methods` | |
//! | `methods` | one entry per bound method | `<name>(args...)` |
//! | `k8s` | `host`, `tool`, `namespace` | `get(kind, name)`, `list(kind, selector?)`, `patch(kind, name, patch, patch_type?)`, `delete(kind, name)`, `rollout_status(kind, name)`, `wait(kind, name, condition)` |
//! | `files` | | `get`, `exists`, `glob`, `lines` |
//! | `capabilities.apiVersions` | | `has(version)` |
//!
//! Every `k8s` method also takes the cluster options as keyword arguments
//! (`namespace`, `namespaced`, `ignore_not_found`, `timeout`).
//!
//! Template rendering runs on a blocking thread; calls that need the
//! cluster or a scripted method drive their futures through the runtime
//! handle captured when the object was built.

use std::sync::Arc;

use kdo_core::{
    Chart, ChartFiles, Cluster, CoreError, MethodOutput, Options, PatchType, ScriptValue,
    TemplateBuiltins,
};
use minijinja::value::{Enumerator, Kwargs, Object, ObjectRepr, Value, from_args};
use minijinja::{Error, ErrorKind, State};
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;

use crate::renderer::invoke_method;

fn to_template_error(err: CoreError) -> Error {
    Error::new(ErrorKind::InvalidOperation, err.to_string())
}

fn to_json(value: &Value) -> Result<JsonValue, Error> {
    serde_json::to_value(value).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Bound chart methods, callable as `methods.<name>()`
pub struct MethodsObject {
    chart: Arc<Chart>,
    builtins: Arc<dyn TemplateBuiltins>,
    cluster: Option<Arc<dyn Cluster>>,
    handle: Handle,
}

impl MethodsObject {
    pub fn new(
        chart: Arc<Chart>,
        builtins: Arc<dyn TemplateBuiltins>,
        cluster: Option<Arc<dyn Cluster>>,
        handle: Handle,
    ) -> Self {
        Self {
            chart,
            builtins,
            cluster,
            handle,
        }
    }
}

impl std::fmt::Debug for MethodsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodsObject")
            .field("chart", &self.chart.name())
            .finish_non_exhaustive()
    }
}

impl Object for MethodsObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        let names: Vec<Value> = self.chart.methods.keys().map(|k| Value::from(k.as_str())).collect();
        Enumerator::Values(names)
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        if self.chart.method(method).is_none() {
            return Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("chart '{}' has no method '{}'", self.chart.name(), method),
            ));
        }

        let args = args
            .iter()
            .map(|arg| to_json(arg).map(ScriptValue::from))
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .handle
            .block_on(invoke_method(
                &self.chart,
                method,
                args,
                None,
                self.cluster.clone(),
                self.builtins.as_ref(),
            ))
            .map_err(to_template_error)?;

        match output {
            MethodOutput::Value(value) => {
                let json = value.to_json().map_err(to_template_error)?;
                Ok(Value::from_serialize(&json))
            }
            MethodOutput::Stream(stream) => {
                let yaml = self.handle.block_on(stream.encode()).map_err(to_template_error)?;
                Ok(Value::from(yaml))
            }
        }
    }
}

/// The chart a template or overlay belongs to (`self`)
#[derive(Debug)]
pub struct ChartObject {
    chart: Arc<Chart>,
    methods: Value,
}

impl ChartObject {
    pub fn new(chart: Arc<Chart>, methods: MethodsObject) -> Self {
        Self {
            chart,
            methods: Value::from_object(methods),
        }
    }
}

impl Object for ChartObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "name" => Some(Value::from(self.chart.name())),
            "version" => Some(Value::from(self.chart.version().to_string())),
            "namespace" => Some(Value::from(self.chart.namespace.as_str())),
            "values" => Some(Value::from_serialize(self.chart.values.inner())),
            "jewels" => Some(Value::from_serialize(self.chart.jewel_values())),
            "methods" => Some(self.methods.clone()),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["name", "version", "namespace", "values", "jewels", "methods"])
    }
}

/// The live cluster handle (`k8s`)
pub struct K8sObject {
    cluster: Arc<dyn Cluster>,
    handle: Handle,
}

impl K8sObject {
    pub fn new(cluster: Arc<dyn Cluster>, handle: Handle) -> Self {
        Self { cluster, handle }
    }

    fn options(kwargs: Kwargs) -> Result<Options, Error> {
        let json = to_json(&Value::from(kwargs))?;
        Options::from_kwargs(&json).map_err(to_template_error)
    }

    /// Split `patch_type` off the keyword arguments
    fn patch_options(kwargs: Kwargs) -> Result<(PatchType, Options), Error> {
        let patch_type = match kwargs.get::<Option<&str>>("patch_type")? {
            Some(name) => name.parse().map_err(to_template_error)?,
            None => PatchType::default(),
        };
        let mut json = to_json(&Value::from(kwargs))?;
        if let Some(map) = json.as_object_mut() {
            map.remove("patch_type");
        }
        let options = Options::from_kwargs(&json).map_err(to_template_error)?;
        Ok((patch_type, options))
    }

    fn run<T>(&self, call: impl std::future::Future<Output = kdo_core::Result<T>>) -> Result<T, Error> {
        self.handle.block_on(call).map_err(to_template_error)
    }
}

impl std::fmt::Debug for K8sObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sObject")
            .field("host", &self.cluster.host())
            .field("namespace", &self.cluster.namespace())
            .finish_non_exhaustive()
    }
}

impl Object for K8sObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "host" => Some(Value::from(self.cluster.host())),
            "tool" => Some(Value::from(self.cluster.tool().as_str())),
            "namespace" => Some(Value::from(self.cluster.namespace())),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["host", "tool", "namespace"])
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "get" => {
                let (kind, name, kwargs): (&str, &str, Kwargs) = from_args(args)?;
                let options = Self::options(kwargs)?;
                let object = self.run(self.cluster.get(kind, name, &options))?;
                Ok(object.map_or(Value::from(()), |o| Value::from_serialize(o.body())))
            }
            "list" => {
                let (kind, selector, kwargs): (&str, Option<&str>, Kwargs) = from_args(args)?;
                let options = Self::options(kwargs)?;
                let objects = self.run(self.cluster.list(kind, selector, &options))?;
                Ok(Value::from_serialize(
                    objects.iter().map(|o| o.body()).collect::<Vec<_>>(),
                ))
            }
            "patch" => {
                let (kind, name, patch, kwargs): (&str, &str, Value, Kwargs) = from_args(args)?;
                let (patch_type, options) = Self::patch_options(kwargs)?;
                let patch = to_json(&patch)?;
                let object = self.run(self.cluster.patch(kind, name, &patch, patch_type, &options))?;
                Ok(object.map_or(Value::from(()), |o| Value::from_serialize(o.body())))
            }
            "delete" => {
                let (kind, name, kwargs): (&str, &str, Kwargs) = from_args(args)?;
                let options = Self::options(kwargs)?;
                self.run(self.cluster.delete(kind, name, &options))?;
                Ok(Value::from(()))
            }
            "rollout_status" => {
                let (kind, name, kwargs): (&str, &str, Kwargs) = from_args(args)?;
                let options = Self::options(kwargs)?;
                self.run(self.cluster.rollout_status(kind, name, &options))?;
                Ok(Value::from(()))
            }
            "wait" => {
                let (kind, name, condition, kwargs): (&str, &str, &str, Kwargs) = from_args(args)?;
                let options = Self::options(kwargs)?;
                self.run(self.cluster.wait(kind, name, condition, &options))?;
                Ok(Value::from(()))
            }
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!(
                    "k8s has no method '{}'. Available methods: get, list, patch, delete, rollout_status, wait",
                    method
                ),
            )),
        }
    }
}

/// Sandboxed chart files (`files`)
#[derive(Debug)]
pub struct FilesObject {
    files: ChartFiles,
}

impl FilesObject {
    pub fn new(files: ChartFiles) -> Self {
        Self { files }
    }
}

fn path_arg(args: &[Value], method: &str) -> Result<String, Error> {
    args.first()
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("files.{}() requires a path string argument", method),
            )
        })
}

impl Object for FilesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        let path = path_arg(args, method)?;
        match method {
            "get" => self
                .files
                .get(&path)
                .map(Value::from)
                .map_err(to_template_error),
            "exists" => Ok(Value::from(self.files.exists(&path))),
            "lines" => self
                .files
                .lines(&path)
                .map(Value::from)
                .map_err(to_template_error),
            "glob" => self
                .files
                .glob(&path)
                .map(|entries| Value::from_serialize(&entries))
                .map_err(to_template_error),
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!(
                    "files has no method '{}'. Available methods: get, exists, glob, lines",
                    method
                ),
            )),
        }
    }
}

/// `capabilities.apiVersions`, a list with a `has` method
#[derive(Debug)]
pub struct ApiVersions(pub Vec<String>);

impl Object for ApiVersions {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Seq
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let index = key.as_usize()?;
        self.0.get(index).map(|v| Value::from(v.as_str()))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Seq(self.0.len())
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "has" => {
                let (version,): (&str,) = from_args(args)?;
                Ok(Value::from(self.0.iter().any(|v| v == version)))
            }
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("apiVersions has no method '{}'", method),
            )),
        }
    }
}
