//! Extension modules
//!
//! A host embedding kdo registers modules under `@extension:<name>`. A
//! module exposes chart methods, plain values and jewel backend factories.
//! Charts refer to them from `Chart.yaml`:
//!
//! ```yaml
//! methods:
//!   template: { module: "@extension:shop", member: render }
//! jewels:
//!   - name: api
//!     backend: "@extension:vault.token"
//! ```
//!
//! and from `values.yaml`, where a string `@extension:<module>.<member>` is
//! replaced by the member value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use kdo_core::{ChartMethod, CoreError, JewelBackend, JewelSpec, MethodRef, Result, ScriptValue};
use serde_json::Value as JsonValue;

use crate::backends::{GeneratedBackend, PromptBackend, SharedReader, terminal_reader};

pub const EXTENSION_PREFIX: &str = "@extension:";

/// Builds a jewel backend from its declaration
pub type BackendFactory = Arc<dyn Fn(&JewelSpec) -> Result<Arc<dyn JewelBackend>> + Send + Sync>;

/// Members of one extension module
#[derive(Clone, Default)]
pub struct Module {
    methods: IndexMap<String, Arc<dyn ChartMethod>>,
    values: IndexMap<String, ScriptValue>,
    backends: IndexMap<String, BackendFactory>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, name: &str, method: impl ChartMethod + 'static) -> Self {
        self.methods.insert(name.to_string(), Arc::new(method));
        self
    }

    pub fn with_value(mut self, name: &str, value: impl Into<ScriptValue>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn with_backend<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&JewelSpec) -> Result<Arc<dyn JewelBackend>> + Send + Sync + 'static,
    {
        self.backends.insert(name.to_string(), Arc::new(factory));
        self
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("values", &self.values)
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry of extension modules and built-in backends
#[derive(Clone)]
pub struct Extensions {
    modules: BTreeMap<String, Module>,
    prompt_input: SharedReader,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            modules: BTreeMap::new(),
            prompt_input: terminal_reader(),
        }
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("modules", &self.modules)
            .finish_non_exhaustive()
    }
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` as `@extension:<name>`
    pub fn register(mut self, name: &str, module: Module) -> Self {
        let name = name.strip_prefix(EXTENSION_PREFIX).unwrap_or(name);
        self.modules.insert(name.to_string(), module);
        self
    }

    /// Where prompt jewels read their answers
    pub fn with_prompt_input(mut self, input: SharedReader) -> Self {
        self.prompt_input = input;
        self
    }

    pub fn module(&self, id: &str) -> Result<&Module> {
        let name = id.strip_prefix(EXTENSION_PREFIX).ok_or_else(|| CoreError::Resolution {
            reference: id.to_string(),
            message: format!("module identifiers start with '{}'", EXTENSION_PREFIX),
        })?;
        self.modules.get(name).ok_or_else(|| CoreError::Resolution {
            reference: id.to_string(),
            message: format!("unknown module '{}'", id),
        })
    }

    pub fn method(&self, reference: &MethodRef) -> Result<Arc<dyn ChartMethod>> {
        self.module(&reference.module)?
            .methods
            .get(&reference.member)
            .cloned()
            .ok_or_else(|| missing_member(reference, "method"))
    }

    pub fn value(&self, reference: &MethodRef) -> Result<&ScriptValue> {
        self.module(&reference.module)?
            .values
            .get(&reference.member)
            .ok_or_else(|| missing_member(reference, "value"))
    }

    /// Backend of a declared jewel: `prompt`, `generated`, or an
    /// `@extension:<module>.<member>` factory
    pub fn backend(&self, spec: &JewelSpec) -> Result<Arc<dyn JewelBackend>> {
        match spec.backend_name() {
            "prompt" => Ok(Arc::new(PromptBackend::new(spec, self.prompt_input.clone())?)),
            "generated" => Ok(Arc::new(GeneratedBackend::new(spec)?)),
            other => {
                let reference = parse_reference(other).ok_or_else(|| CoreError::SecretBackend {
                    jewel: spec.name.clone(),
                    message: format!("unknown backend '{}'", other),
                })?;
                let factory = self
                    .module(&reference.module)?
                    .backends
                    .get(&reference.member)
                    .ok_or_else(|| missing_member(&reference, "backend"))?;
                factory(spec)
            }
        }
    }

    /// Replace every `@extension:<module>.<member>` string in `values`
    pub fn resolve_values(&self, values: &mut JsonValue) -> Result<()> {
        match values {
            JsonValue::String(s) => {
                if let Some(reference) = parse_reference(s) {
                    *values = self.value(&reference)?.to_json()?;
                }
            }
            JsonValue::Array(items) => {
                for item in items {
                    self.resolve_values(item)?;
                }
            }
            JsonValue::Object(map) => {
                for item in map.values_mut() {
                    self.resolve_values(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Parse `@extension:<module>.<member>`
pub fn parse_reference(s: &str) -> Option<MethodRef> {
    let rest = s.strip_prefix(EXTENSION_PREFIX)?;
    let (module, member) = rest.rsplit_once('.')?;
    if module.is_empty() || member.is_empty() {
        return None;
    }
    Some(MethodRef {
        module: format!("{}{}", EXTENSION_PREFIX, module),
        member: member.to_string(),
    })
}

fn missing_member(reference: &MethodRef, what: &str) -> CoreError {
    CoreError::Resolution {
        reference: reference.to_string(),
        message: format!("module has no {} '{}'", what, reference.member),
    }
}
