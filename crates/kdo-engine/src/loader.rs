//! Loading chart trees from disk

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use kdo_core::chart::{VALUES_FILE, subchart_dirs};
use kdo_core::{Chart, ChartManifest, CoreError, Jewel, Result, Values};

use crate::extensions::Extensions;

/// Loads a chart directory with its sub-charts, binding methods and jewel
/// backends from the registered extensions
#[derive(Debug, Clone, Default)]
pub struct ChartLoader {
    extensions: Extensions,
}

impl ChartLoader {
    pub fn new(extensions: Extensions) -> Self {
        Self { extensions }
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Load the chart at `dir`.
    ///
    /// The root namespace is `namespace` when given, else the manifest's,
    /// else the chart name. A sub-chart uses its declared namespace, else
    /// `<owner>-<name>` where `<owner>` is its owner's chart-derived
    /// namespace, so the override never moves sub-charts. Two charts of the
    /// tree landing in one namespace is an error. `overrides` are merged
    /// over the root chart's `values.yaml`.
    pub fn load(&self, dir: &Path, namespace: Option<&str>, overrides: &Values) -> Result<Chart> {
        let manifest = ChartManifest::load(dir)?;
        let mut values = Values::from_file_or_default(dir.join(VALUES_FILE))?;
        values.merge(overrides);

        let derived = manifest.default_namespace().to_string();
        let namespace = namespace.map_or_else(|| derived.clone(), str::to_string);
        let chart = self.load_tree(dir, manifest, namespace, &derived, values)?;
        check_namespaces(&chart)?;
        Ok(chart)
    }

    fn load_tree(
        &self,
        dir: &Path,
        manifest: ChartManifest,
        namespace: String,
        derived: &str,
        mut values: Values,
    ) -> Result<Chart> {
        let name = manifest.name.clone();
        let attributed = |err: kdo_core::CoreError| err.in_chart(name.as_str());

        self.extensions
            .resolve_values(&mut values.0)
            .map_err(attributed)?;

        let mut subcharts = Vec::new();
        for sub_dir in subchart_dirs(dir, &manifest).map_err(attributed)? {
            let sub_manifest = ChartManifest::load(&sub_dir).map_err(attributed)?;
            let defaults = Values::from_file_or_default(sub_dir.join(VALUES_FILE)).map_err(attributed)?;
            let sub_values = Values::for_subchart(defaults, &values, &sub_manifest.name);
            let sub_namespace = sub_manifest.subchart_namespace(derived);
            subcharts.push(self.load_tree(
                &sub_dir,
                sub_manifest,
                sub_namespace.clone(),
                &sub_namespace,
                sub_values,
            )?);
        }

        let mut methods = IndexMap::new();
        for (method, reference) in &manifest.methods {
            let bound = self.extensions.method(reference).map_err(attributed)?;
            methods.insert(method.clone(), bound);
        }

        let jewels = manifest
            .jewels
            .iter()
            .map(|spec| {
                let backend = self.extensions.backend(spec)?;
                Ok(Jewel::new(&manifest.name, &spec.name, backend))
            })
            .collect::<Result<Vec<_>>>()
            .map_err(attributed)?;

        tracing::debug!(
            chart = %manifest.name,
            namespace = %namespace,
            subcharts = subcharts.len(),
            methods = methods.len(),
            jewels = jewels.len(),
            "loaded chart"
        );

        Ok(Chart {
            root: dir.to_path_buf(),
            manifest,
            namespace,
            values,
            subcharts,
            methods,
            jewels,
        })
    }
}

/// Every chart of a tree must own its namespace
fn check_namespaces(root: &Chart) -> Result<()> {
    let mut owners: HashMap<&str, &Chart> = HashMap::new();
    for chart in root.walk() {
        if let Some(other) = owners.insert(chart.namespace.as_str(), chart) {
            return Err(CoreError::InvalidChart {
                path: root.root.display().to_string(),
                message: format!(
                    "charts '{}' and '{}' both target namespace '{}'",
                    other.name(),
                    chart.name(),
                    chart.namespace
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::Module;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("Chart.yaml"),
            "name: shop\nversion: 1.2.0\njewels:\n  - name: db\n    length: 12\n",
        );
        write(
            &root.join("values.yaml"),
            "replicas: 1\ngreeting: \"@extension:message.message\"\nglobal:\n  registry: docker.io\ncache:\n  memory: 2Gi\n",
        );
        write(
            &root.join("charts/cache/Chart.yaml"),
            "name: cache\nversion: 0.1.0\nnamespace: cache-system\n",
        );
        write(&root.join("charts/cache/values.yaml"), "memory: 1Gi\nport: 6379\n");
        write(&root.join("charts/queue/Chart.yaml"), "name: queue\nversion: 0.2.0\n");
        dir
    }

    fn loader() -> ChartLoader {
        ChartLoader::new(
            Extensions::new().register("message", Module::new().with_value("message", "hello world")),
        )
    }

    #[test]
    fn test_load_tree() {
        let dir = fixture();
        let overrides = Values::from_yaml("replicas: 3\n").unwrap();
        let chart = loader().load(dir.path(), None, &overrides).unwrap();

        assert_eq!(chart.namespace, "shop");
        assert_eq!(chart.values.get("replicas").unwrap(), 3);
        assert_eq!(chart.values.get("greeting").unwrap().as_str(), Some("hello world"));
        assert_eq!(chart.jewels[0].secret_name(), "shop-db");

        let names: Vec<_> = chart.subcharts.iter().map(Chart::name).collect();
        assert_eq!(names, vec!["cache", "queue"]);

        let cache = &chart.subcharts[0];
        assert_eq!(cache.namespace, "cache-system");
        assert_eq!(cache.values.get("memory").unwrap().as_str(), Some("2Gi"));
        assert_eq!(cache.values.get("port").unwrap(), 6379);
        assert_eq!(cache.values.get("global.registry").unwrap().as_str(), Some("docker.io"));
        assert_eq!(chart.subcharts[1].namespace, "shop-queue");
    }

    #[test]
    fn test_shared_subchart_names_get_distinct_namespaces() {
        let dir = fixture();
        let root = dir.path();
        write(&root.join("charts/billing/Chart.yaml"), "name: billing\nversion: 1.0.0\n");
        write(
            &root.join("charts/billing/charts/postgres/Chart.yaml"),
            "name: postgres\nversion: 15.0.0\n",
        );
        write(
            &root.join("charts/queue/charts/postgres/Chart.yaml"),
            "name: postgres\nversion: 15.0.0\n",
        );

        let chart = loader().load(root, Some("staging"), &Values::new()).unwrap();
        let placed: Vec<_> = chart
            .walk()
            .iter()
            .map(|c| (c.name().to_string(), c.namespace.clone()))
            .collect();
        assert_eq!(
            placed,
            vec![
                ("postgres".to_string(), "shop-billing-postgres".to_string()),
                ("billing".to_string(), "shop-billing".to_string()),
                ("cache".to_string(), "cache-system".to_string()),
                ("postgres".to_string(), "shop-queue-postgres".to_string()),
                ("queue".to_string(), "shop-queue".to_string()),
                ("shop".to_string(), "staging".to_string()),
            ]
        );
    }

    #[test]
    fn test_namespace_clash_is_rejected() {
        let dir = fixture();
        write(
            &dir.path().join("charts/queue/Chart.yaml"),
            "name: queue\nversion: 0.2.0\nnamespace: cache-system\n",
        );
        let err = loader().load(dir.path(), None, &Values::new()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidChart { .. }));
        assert!(err.to_string().contains("cache-system"));
    }

    #[test]
    fn test_namespace_override_applies_to_root_only() {
        let dir = fixture();
        let chart = loader().load(dir.path(), Some("staging"), &Values::new()).unwrap();
        assert_eq!(chart.namespace, "staging");
        assert_eq!(chart.subcharts[0].namespace, "cache-system");
    }

    #[test]
    fn test_unknown_method_module_is_attributed() {
        let dir = fixture();
        write(
            &dir.path().join("charts/queue/Chart.yaml"),
            "name: queue\nversion: 0.2.0\nmethods:\n  template:\n    module: \"@extension:missing\"\n    member: render\n",
        );
        let err = loader().load(dir.path(), None, &Values::new()).unwrap_err();
        assert_eq!(err.chart(), Some("queue"));
    }
}
