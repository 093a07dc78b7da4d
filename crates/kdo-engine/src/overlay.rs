//! Declarative overlay rendering
//!
//! An overlay pass takes one sorted file set. Each file may start with a
//! `#@kdo:context <id>` header naming the injected context it is rendered
//! with. Inputs that are not files on disk (object streams, script values)
//! are first written to a private temporary directory, which is removed
//! when the [`OverlaySet`] is dropped, whatever the outcome.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use kdo_core::annotations;
use kdo_core::stream::encode_objects;
use kdo_core::values::deep_merge;
use minijinja::Value;
use tempfile::TempDir;

use crate::engine::{TemplateEngine, parse_documents};
use crate::error::{EngineError, Result};

/// Header directive binding a file to an injected context
pub const CONTEXT_DIRECTIVE: &str = "#@kdo:context";

/// Named bindings visible to the files of one injected set
pub type Bindings = BTreeMap<String, Value>;

/// Injected contexts of a pass, by id
pub type OverlayContexts = BTreeMap<String, Bindings>;

/// One file of an overlay pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayFile {
    /// Sort key and display name
    pub relative: String,
    /// Location on disk
    pub path: PathBuf,
    /// Context header prepended when the file is read
    pub context: Option<String>,
}

impl OverlayFile {
    /// File content with its context header, if any
    pub fn source(&self) -> Result<String> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(match &self.context {
            Some(id) => format!("{} {}\n{}", CONTEXT_DIRECTIVE, id, content),
            None => content,
        })
    }
}

/// Split a leading context header from the body
pub fn split_header(source: &str) -> (Option<&str>, &str) {
    if let Some(rest) = source.strip_prefix(CONTEXT_DIRECTIVE) {
        let (line, body) = rest.split_once('\n').unwrap_or((rest, ""));
        let id = line.trim();
        if !id.is_empty() {
            return (Some(id), body);
        }
    }
    (None, source)
}

/// Renders a sorted file set into multi-document YAML
pub trait OverlayEngine: Send + Sync {
    fn render(&self, files: &[OverlayFile], contexts: &OverlayContexts) -> Result<String>;
}

/// Default overlay engine.
///
/// A file whose context has bindings is rendered as a template with those
/// bindings first. Documents are then collected in file order; a document
/// annotated `kdo.io/overlay: merge` is deep-merged into the last earlier
/// document of the same kind and name and does not appear itself.
#[derive(Debug, Clone, Default)]
pub struct YamlOverlay {
    engine: TemplateEngine,
}

impl YamlOverlay {
    pub fn new(engine: TemplateEngine) -> Self {
        Self { engine }
    }
}

impl OverlayEngine for YamlOverlay {
    fn render(&self, files: &[OverlayFile], contexts: &OverlayContexts) -> Result<String> {
        let mut documents: Vec<kdo_core::Object> = Vec::new();

        for file in files {
            let source = file.source()?;
            let (context, body) = split_header(&source);

            let rendered = match context {
                Some(id) => {
                    let bindings = contexts.get(id).ok_or_else(|| EngineError::Overlay {
                        file: file.relative.clone(),
                        message: format!("unknown context '{}'", id),
                    })?;
                    if bindings.is_empty() {
                        body.to_string()
                    } else {
                        let ctx = Value::from_iter(bindings.clone());
                        self.engine.render_string(body, &file.relative, &ctx)?
                    }
                }
                None => body.to_string(),
            };

            for document in parse_documents(&file.relative, &rendered)? {
                let is_merge = document.annotation(annotations::OVERLAY) == Some("merge");
                let document = document.without_annotation(annotations::OVERLAY);
                if !is_merge {
                    documents.push(document);
                    continue;
                }

                let target = documents
                    .iter()
                    .rposition(|d| d.kind() == document.kind() && d.name() == document.name())
                    .ok_or_else(|| EngineError::Overlay {
                        file: file.relative.clone(),
                        message: format!("no document to merge {} into", document),
                    })?;
                let mut merged = documents[target].body().clone();
                deep_merge(&mut merged, document.body());
                documents[target] = kdo_core::Object::from_value(merged)?;
            }
        }

        Ok(encode_objects(&documents)?)
    }
}

/// The file set of one overlay pass, with the temporary directory holding
/// materialized inputs
#[derive(Debug)]
pub struct OverlaySet {
    workdir: TempDir,
    files: Vec<OverlayFile>,
    contexts: OverlayContexts,
    materialized: usize,
}

impl OverlaySet {
    pub fn new() -> Result<Self> {
        let workdir = tempfile::Builder::new().prefix("kdo-overlay").tempdir()?;
        Ok(Self {
            workdir,
            files: Vec::new(),
            contexts: OverlayContexts::new(),
            materialized: 0,
        })
    }

    /// Directory holding materialized inputs
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn files(&self) -> &[OverlayFile] {
        &self.files
    }

    /// Register bindings and return the id files refer to them by
    pub fn add_context(&mut self, bindings: Bindings) -> String {
        let id = format!("ctx{}", self.contexts.len());
        self.contexts.insert(id.clone(), bindings);
        id
    }

    /// Add `relative` (a file or every file below a directory) from `root`
    pub fn add_path(&mut self, root: &Path, relative: &Path, context: Option<&str>) -> Result<()> {
        let full = root.join(relative);
        if !full.exists() {
            return Err(EngineError::Overlay {
                file: relative.display().to_string(),
                message: "no such file or directory".to_string(),
            });
        }

        for entry in walkdir::WalkDir::new(&full) {
            let entry = entry.map_err(|e| EngineError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let display = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            self.files.push(OverlayFile {
                relative: display,
                path: entry.into_path(),
                context: context.map(str::to_string),
            });
        }
        Ok(())
    }

    /// Write `yaml` to a new file of the work directory. The file carries
    /// its own header pointing at an empty context, so it is taken as data.
    pub fn materialize(&mut self, yaml: &str) -> Result<()> {
        let id = self.add_context(Bindings::new());
        let name = format!("{:03}-input.yml", self.materialized);
        self.materialized += 1;

        let path = self.workdir.path().join(&name);
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "{} {}", CONTEXT_DIRECTIVE, id)?;
        file.write_all(yaml.as_bytes())?;

        self.files.push(OverlayFile {
            relative: name,
            path,
            context: None,
        });
        Ok(())
    }

    /// Sort the file set by path and render it
    pub fn render(mut self, engine: &dyn OverlayEngine) -> Result<String> {
        self.files.sort_by(|a, b| a.relative.cmp(&b.relative));
        tracing::debug!(
            files = ?self.files.iter().map(|f| f.relative.as_str()).collect::<Vec<_>>(),
            "overlay file set"
        );
        engine.render(&self.files, &self.contexts)
    }
}
