//! Template command - render a chart tree without a cluster

use std::io::Write;
use std::sync::Arc;

use kdo_core::{Cluster, InMemoryCluster};
use kdo_kube::Orchestrator;

use crate::ValuesArgs;
use crate::error::Result;

/// Render against an empty in-memory cluster and print the objects as
/// multi-document YAML
pub async fn run(
    orchestrator: &Orchestrator,
    reference: &str,
    namespace: Option<&str>,
    values: &ValuesArgs,
) -> Result<()> {
    let overrides = values.load()?;
    let resolved = orchestrator.resolver().resolve(reference).await?;
    let chart = orchestrator
        .loader()
        .load(&resolved.path, namespace, &overrides)?;
    tracing::info!(chart = chart.name(), namespace = %chart.namespace, "rendering");

    let cluster: Arc<dyn Cluster> = Arc::new(InMemoryCluster::new(&chart.namespace));
    let scoped = cluster.for_sub_chart(
        &chart.namespace,
        chart.name(),
        chart.version(),
        chart.subcharts.len(),
    );
    let rendered = orchestrator.template(&chart, scoped).encode().await?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(kdo_core::CoreError::from)?;
    Ok(())
}
