//! List command - list applied charts

use console::style;
use kdo_core::ReleaseRecord;
use kdo_kube::KubeCluster;

use crate::error::{CliError, Result};

const HEADERS: [&str; 3] = ["GENUS", "NAMESPACE", "VERSION"];

/// Print the release records in `namespace`, or in every namespace
pub async fn run(namespace: Option<&str>) -> Result<()> {
    let cluster = KubeCluster::connect(namespace)
        .await
        .map_err(CliError::connection)?;
    let records = kdo_kube::releases(&cluster, namespace).await?;

    if records.is_empty() {
        match namespace {
            Some(ns) => println!("No charts applied in namespace {}", ns),
            None => println!("No charts applied"),
        }
        return Ok(());
    }

    let table = render_table(&records);
    let mut lines = table.lines();
    if let Some(header) = lines.next() {
        println!("{}", style(header).bold());
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

/// Columns padded to their widest cell
pub fn render_table(records: &[ReleaseRecord]) -> String {
    let rows: Vec<[String; 3]> = records
        .iter()
        .map(|r| {
            [
                r.genus.clone(),
                r.namespace.clone(),
                r.version
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let format_row = |cells: [&str; 3]| {
        format!(
            "{:<w0$}  {:<w1$}  {}",
            cells[0],
            cells[1],
            cells[2],
            w0 = widths[0],
            w1 = widths[1]
        )
    };

    let mut out = format_row(HEADERS);
    out.push('\n');
    for row in &rows {
        out.push_str(&format_row([&row[0], &row[1], &row[2]]));
        out.push('\n');
    }
    out
}
