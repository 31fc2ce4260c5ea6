#![allow(dead_code)]
//! Shared helpers for the integration suites.

pub mod fs_watch;
pub mod mock_robot;

use std::path::{Path, PathBuf};

/// A minimal alert-group payload with one firing alert.
pub fn sample_payload() -> serde_json::Value {
    serde_json::json!({
        "version": "4",
        "receiver": "ops",
        "status": "firing",
        "groupLabels": {"alertname": "HighLatency"},
        "commonLabels": {"alertname": "HighLatency", "severity": "page"},
        "commonAnnotations": {"summary": "p99 above 2s"},
        "externalURL": "http://alertmanager.local",
        "alerts": [
            {
                "status": "firing",
                "labels": {"alertname": "HighLatency", "instance": "api-1"},
                "annotations": {"description": "p99 is 2.4s"},
                "startsAt": "2024-01-01T00:00:00Z",
                "generatorURL": "http://prometheus.local/graph"
            }
        ]
    })
}

/// Writes `content` to `name` inside `dir` and returns the full path.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
