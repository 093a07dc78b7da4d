//! Snapshot of a fixture chart rendered end to end

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use kdo_core::{InMemoryCluster, Values};
use kdo_engine::{ChartLoader, ChartRenderer, Extensions, LineReader, ScriptedReader};
use serde_json::Value as JsonValue;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn create_test_chart() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(
        &root.join("Chart.yaml"),
        r#"name: shop
version: 1.0.0
jewels:
  - name: admin
    type: password
    description: Admin password
"#,
    );
    write(
        &root.join("values.yaml"),
        "mode: fast\nhost: shop.example.com\n",
    );
    write(&root.join("files/motd.txt"), "hello from shop\n");
    write(
        &root.join("templates/configmap.yaml"),
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ chart.name }}-settings
data:
  greeting: {{ files.get('files/motd.txt') | trim | quote }}
  mode: {{ values.mode }}
  release: {{ release.name }}-{{ release.namespace }}
"#,
    );
    write(
        &root.join("overlay-templates/route.yaml"),
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: routes
data:
  host: "{{ values.host }}"
  namespace: "{{ self.namespace }}"
"#,
    );
    write(
        &root.join("overlay-templates/z-tls.yaml"),
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: routes
  annotations:
    kdo.io/overlay: merge
data:
  tls: enabled
"#,
    );
    write(
        &root.join("charts/cache/Chart.yaml"),
        "name: cache\nversion: 0.3.0\n",
    );
    write(
        &root.join("charts/cache/templates/service.yaml"),
        r#"apiVersion: v1
kind: Service
metadata:
  name: {{ chart.name }}
spec:
  type: ClusterIP
"#,
    );
    dir
}

/// Keys in sorted order at every level, whatever map order serde_json uses
fn sorted(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            JsonValue::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), sorted(&map[k])))
                    .collect(),
            )
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[tokio::test]
async fn test_render_fixture_chart() {
    let chart_dir = create_test_chart();
    let answers: Box<dyn LineReader> = Box::new(ScriptedReader(Cursor::new("hunter2\n")));
    let extensions = Extensions::new().with_prompt_input(Arc::new(Mutex::new(answers)));

    let chart = ChartLoader::new(extensions)
        .load(chart_dir.path(), None, &Values::new())
        .unwrap();
    let objects = ChartRenderer::new()
        .template(&chart, Arc::new(InMemoryCluster::new("shop")))
        .collect()
        .await
        .unwrap();

    let rendered = objects
        .iter()
        .map(|o| serde_yaml::to_string(&sorted(o.body())).unwrap())
        .collect::<Vec<_>>()
        .join("---\n");

    insta::assert_snapshot!("shop_chart", rendered);
}
