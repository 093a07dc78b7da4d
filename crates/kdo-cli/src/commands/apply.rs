//! Apply command - resolve, render and apply a chart tree

use std::sync::Arc;
use std::time::Duration;

use console::style;
use kdo_core::{Cluster, Options, Tool};
use kdo_kube::{ApplyOptions, ApplyReport, KubeCluster, Orchestrator};

use crate::ValuesArgs;
use crate::error::{CliError, Result};

#[derive(Debug)]
pub struct ApplyArgs {
    pub reference: String,
    pub namespace: Option<String>,
    pub values: ValuesArgs,
    pub ignore_not_found: bool,
    pub cluster_scoped: bool,
    pub timeout: u64,
    pub tool: String,
}

impl ApplyArgs {
    /// Options passed to every cluster call
    pub fn options(&self) -> Options {
        let mut options = Options::new().with_timeout(Duration::from_secs(self.timeout));
        if self.ignore_not_found {
            options = options.ignoring_not_found();
        }
        if self.cluster_scoped {
            options = options.cluster_scoped();
        }
        options
    }

    pub fn tool(&self) -> Result<Tool> {
        self.tool.parse().map_err(|e: kdo_core::CoreError| {
            CliError::usage_with_help(e.to_string(), "use --tool server-side or --tool replace")
        })
    }
}

pub async fn run(orchestrator: &Orchestrator, args: &ApplyArgs) -> Result<()> {
    let tool = args.tool()?;
    let options = ApplyOptions {
        namespace: args.namespace.clone(),
        values: args.values.load()?,
        options: args.options(),
    };

    let cluster = KubeCluster::connect(args.namespace.as_deref())
        .await
        .map_err(CliError::connection)?;
    println!(
        "{} Applying {} to {} ({})",
        style("→").cyan(),
        style(&args.reference).bold(),
        cluster.host(),
        tool
    );
    let cluster: Arc<dyn Cluster> = Arc::new(cluster).with_tool(tool);

    let report = orchestrator.apply(&args.reference, cluster, &options).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ApplyReport) {
    for chart in &report.charts {
        let rollouts = match chart.rollouts {
            0 => String::new(),
            n => format!(", {} rollout(s) complete", n),
        };
        println!(
            "  {} {} in {} ({} object(s){})",
            style("✓").green(),
            style(&chart.name).bold(),
            chart.namespace,
            chart.objects,
            rollouts
        );
    }
    println!(
        "{} Applied {} chart(s), {} object(s)",
        style("✓").green().bold(),
        report.charts.len(),
        report.objects()
    );
}
