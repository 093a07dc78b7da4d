//! Chart apply orchestration
//!
//! A chart tree is applied depth-first: every sub-chart, in declared order,
//! is rendered and applied to its own namespace before its owner. Each chart
//! then has its rollouts verified and its release record written. The first
//! failure stops the pass; whatever was applied before stays applied.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures::future::BoxFuture;
use kdo_core::{
    Chart, Cluster, Object, ObjectStream, Options, ReleaseRecord, Result, Values,
};
use kdo_engine::{ChartLoader, ChartRenderer};
use kdo_repo::Resolver;
use semver::Version;

use crate::rollout;

/// Options for one apply pass
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Namespace of the root chart; sub-charts keep their own
    pub namespace: Option<String>,
    /// Overrides merged over the root chart's values
    pub values: Values,
    /// Options passed to every cluster call
    pub options: Options,
}

/// What one chart of the tree contributed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChart {
    pub name: String,
    pub namespace: String,
    pub objects: usize,
    pub rollouts: usize,
}

/// Charts applied by a pass, in apply order
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub charts: Vec<AppliedChart>,
}

impl ApplyReport {
    pub fn objects(&self) -> usize {
        self.charts.iter().map(|c| c.objects).sum()
    }
}

/// Resolves, renders and applies charts
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    resolver: Resolver,
    loader: ChartLoader,
    renderer: ChartRenderer,
}

impl Orchestrator {
    pub fn new(loader: ChartLoader) -> Self {
        Self {
            loader,
            ..Self::default()
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_renderer(mut self, renderer: ChartRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn loader(&self) -> &ChartLoader {
        &self.loader
    }

    /// Render a loaded tree without applying it; `cluster` serves reads
    pub fn template(&self, chart: &Chart, cluster: Arc<dyn Cluster>) -> ObjectStream {
        self.renderer.template(chart, cluster)
    }

    /// Resolve `reference`, load it and apply the whole tree
    pub async fn apply(
        &self,
        reference: &str,
        cluster: Arc<dyn Cluster>,
        options: &ApplyOptions,
    ) -> Result<ApplyReport> {
        let resolved = self.resolver.resolve(reference).await?;
        let chart = self
            .loader
            .load(&resolved.path, options.namespace.as_deref(), &options.values)?;
        let version = resolved.version.clone();
        tracing::info!(
            reference,
            chart = chart.name(),
            genus = %resolved.genus,
            namespace = %chart.namespace,
            "applying chart tree"
        );
        self.apply_chart(&chart, &resolved.genus, version, cluster, &options.options)
            .await
    }

    /// Apply a loaded chart tree. `version` overrides the root chart's
    /// version in its release record.
    pub async fn apply_chart(
        &self,
        chart: &Chart,
        genus: &str,
        version: Option<Version>,
        cluster: Arc<dyn Cluster>,
        options: &Options,
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        self.apply_tree(chart, genus, version, cluster, options, &mut report)
            .await?;
        Ok(report)
    }

    fn apply_tree<'a>(
        &'a self,
        chart: &'a Chart,
        genus: &'a str,
        version: Option<Version>,
        cluster: Arc<dyn Cluster>,
        options: &'a Options,
        report: &'a mut ApplyReport,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let scoped = cluster.for_sub_chart(
                &chart.namespace,
                chart.name(),
                chart.version(),
                chart.subcharts.len(),
            );

            for sub in &chart.subcharts {
                self.apply_tree(sub, sub.name(), None, scoped.clone(), options, report)
                    .await?;
            }

            let applied = self
                .apply_own(chart, genus, version, scoped, options)
                .await
                .map_err(|e| e.in_chart(chart.name()))?;
            report.charts.push(applied);
            Ok(())
        })
    }

    async fn apply_own(
        &self,
        chart: &Chart,
        genus: &str,
        version: Option<Version>,
        cluster: Arc<dyn Cluster>,
        options: &Options,
    ) -> Result<AppliedChart> {
        let seen: Arc<Mutex<Vec<Object>>> = Arc::default();
        let sink = seen.clone();
        let stream = self
            .renderer
            .template_own(chart, cluster.clone())
            .inspect(move |object| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(object.clone());
            });

        tracing::info!(chart = chart.name(), namespace = %chart.namespace, "applying objects");
        cluster.apply(stream, options).await?;
        let applied = std::mem::take(&mut *seen.lock().unwrap_or_else(PoisonError::into_inner));

        let rollouts = rollout::verify(chart, cluster.as_ref(), &applied, options).await?;

        let record = ReleaseRecord {
            name: chart.name().to_string(),
            genus: genus.to_string(),
            namespace: chart.namespace.clone(),
            version: Some(version.unwrap_or_else(|| chart.version().clone())),
            subcharts: chart.subcharts.iter().map(|s| s.name().to_string()).collect(),
            updated_at: Utc::now(),
        };
        cluster
            .apply(
                ObjectStream::from_objects(vec![record.to_object()]),
                &Options::new(),
            )
            .await?;

        tracing::debug!(
            chart = chart.name(),
            objects = applied.len(),
            rollouts,
            "chart applied"
        );
        Ok(AppliedChart {
            name: chart.name().to_string(),
            namespace: chart.namespace.clone(),
            objects: applied.len(),
            rollouts,
        })
    }
}

/// Release records of applied charts, in `namespace` or across all
/// namespaces
pub async fn releases(cluster: &dyn Cluster, namespace: Option<&str>) -> Result<Vec<ReleaseRecord>> {
    let options = match namespace {
        Some(ns) => Options::new().in_namespace(ns),
        None => Options::new().cluster_scoped(),
    };
    let objects = cluster
        .list("ConfigMap", Some(&ReleaseRecord::selector()), &options)
        .await?;

    let mut records = Vec::new();
    for object in objects
        .iter()
        .filter(|o| o.name().starts_with(ReleaseRecord::PREFIX))
    {
        match ReleaseRecord::from_object(object) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(object = %object.id(), error = %e, "skipping malformed release record"),
        }
    }
    records.sort_by(|a, b| (&a.genus, &a.namespace).cmp(&(&b.genus, &b.namespace)));
    Ok(records)
}
