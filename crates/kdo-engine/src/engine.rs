//! Per-file template rendering based on MiniJinja

use std::path::Path;

use kdo_core::Object;
use minijinja::{Environment, Value};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;
use crate::functions;

/// Filters registered in every environment
pub const FILTERS: &[&str] = &[
    "toyaml",
    "tojson",
    "b64encode",
    "b64decode",
    "quote",
    "nindent",
    "indent",
    "required",
    "sha256",
    "trunc",
    "trimprefix",
    "trimsuffix",
    "merge",
];

/// Files never rendered as manifests
const NOTES_FILE: &str = "NOTES.txt";

/// One template file and what it rendered to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// Path relative to the rendered directory
    pub name: String,
    pub content: String,
}

impl RenderedFile {
    /// Objects of the rendered output, in document order
    pub fn objects(&self) -> Result<Vec<Object>> {
        parse_documents(&self.name, &self.content)
    }
}

/// The template engine
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    strict_mode: bool,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TemplateEngine {
    /// `strict_mode` fails on undefined variables
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    /// A MiniJinja environment with every kdo filter and function
    pub fn environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);
        env.add_filter("merge", filters::merge);

        env.add_function("fail", functions::fail);
        env.add_function("dict", functions::dict);
        env.add_function("list", functions::list);
        env.add_function("get", functions::get);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);
        env.add_function("tostring", functions::tostring);
        env.add_function("toint", functions::toint);
        env.add_function("printf", functions::printf);

        env
    }

    /// Render a single template string
    pub fn render_string(&self, template: &str, name: &str, context: &Value) -> Result<String> {
        let mut env = self.environment();
        env.add_template_owned(name.to_string(), template.to_string())
            .map_err(|e| TemplateError::from_minijinja(e, name, template))?;
        let tmpl = env
            .get_template(name)
            .map_err(|e| TemplateError::from_minijinja(e, name, template))?;
        Ok(tmpl
            .render(context)
            .map_err(|e| TemplateError::from_minijinja(e, name, template))?)
    }

    /// Render every file of `dir` in sorted path order.
    ///
    /// Every file is loaded so `include` and `import` can reach helpers;
    /// files whose name starts with `_` and `NOTES.txt` are not rendered.
    /// With `glob`, only matching paths (relative to `dir`) are rendered.
    /// Outputs that are empty after trimming are dropped.
    pub fn render_dir(
        &self,
        dir: &Path,
        glob: Option<&str>,
        context: &Value,
    ) -> Result<Vec<RenderedFile>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let filter = glob
            .map(|pattern| {
                glob::Pattern::new(pattern).map_err(|e| {
                    EngineError::Template(TemplateError::simple(format!(
                        "invalid glob pattern '{}': {}",
                        pattern, e
                    )))
                })
            })
            .transpose()?;

        let mut sources = Vec::new();
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| EngineError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let content = std::fs::read_to_string(entry.path())?;
            sources.push((name, content));
        }

        let mut env = self.environment();
        for (name, content) in &sources {
            env.add_template_owned(name.clone(), content.clone())
                .map_err(|e| TemplateError::from_minijinja(e, name, content))?;
        }

        let mut rendered = Vec::new();
        for (name, content) in &sources {
            let file_name = name.rsplit('/').next().unwrap_or(name);
            if file_name.starts_with('_') || file_name == NOTES_FILE {
                continue;
            }
            if let Some(filter) = &filter
                && !filter.matches(name)
            {
                continue;
            }

            let tmpl = env
                .get_template(name)
                .map_err(|e| TemplateError::from_minijinja(e, name, content))?;
            let output = tmpl
                .render(context)
                .map_err(|e| TemplateError::from_minijinja(e, name, content))?;

            let trimmed = output.trim();
            if trimmed.is_empty() || trimmed == "---" {
                continue;
            }
            rendered.push(RenderedFile {
                name: name.clone(),
                content: output,
            });
        }

        Ok(rendered)
    }
}

/// Objects of a multi-document YAML text. Empty documents are skipped.
pub fn parse_documents(name: &str, content: &str) -> Result<Vec<Object>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = JsonValue::deserialize(document)
            .map_err(|e| TemplateError::yaml(name, content, &e))?;
        if value.is_null() {
            continue;
        }
        objects.push(Object::from_value(value)?);
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn context() -> Value {
        minijinja::context! {
            values => Value::from_serialize(serde_json::json!({
                "replicas": 3,
                "image": {"repository": "nginx", "tag": "1.25"},
            })),
            release => Value::from_serialize(serde_json::json!({"name": "web", "namespace": "web"})),
        }
    }

    #[test]
    fn test_render_simple() {
        let engine = TemplateEngine::default();
        let result = engine
            .render_string("replicas: {{ values.replicas }}", "t.yaml", &context())
            .unwrap();
        assert_eq!(result, "replicas: 3");
    }

    #[test]
    fn test_render_with_filters() {
        let engine = TemplateEngine::default();
        let result = engine
            .render_string("image: {{ values.image | toyaml | nindent(2) }}", "t.yaml", &context())
            .unwrap();
        assert!(result.contains("\n  repository: nginx"));
    }

    #[test]
    fn test_undefined_is_an_error() {
        let engine = TemplateEngine::default();
        let err = engine
            .render_string("v: {{ values.missing.key }}", "t.yaml", &context())
            .unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }

    #[test]
    fn test_render_dir_order_helpers_and_glob() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("_helpers.tpl"), "{% macro name() %}{{ release.name }}-app{% endmacro %}").unwrap();
        fs::write(
            root.join("b-service.yaml"),
            "{% import '_helpers.tpl' as h %}kind: Service\nmetadata:\n  name: {{ h.name() }}\n",
        )
        .unwrap();
        fs::write(root.join("a-config.yaml"), "kind: ConfigMap\nmetadata:\n  name: cfg\n").unwrap();
        fs::write(root.join("sub/c.yaml"), "{% if false %}kind: x{% endif %}").unwrap();
        fs::write(root.join("NOTES.txt"), "{{ undefined_thing }}").unwrap();

        let engine = TemplateEngine::default();
        let files = engine.render_dir(root, None, &context()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a-config.yaml", "b-service.yaml"]);

        let objects = files[1].objects().unwrap();
        assert_eq!(objects[0].name(), "web-app");

        let only = engine.render_dir(root, Some("b-*"), &context()).unwrap();
        assert_eq!(only.len(), 1);
    }

    #[test]
    fn test_parse_documents_reports_bad_yaml() {
        let err = parse_documents("x.yaml", "kind: A\nmetadata:\n  name: a\n---\nkind: [unclosed\n").unwrap_err();
        match err {
            EngineError::Template(t) => assert_eq!(t.kind(), crate::error::TemplateErrorKind::YamlParseError),
            other => panic!("unexpected {:?}", other),
        }
    }
}
