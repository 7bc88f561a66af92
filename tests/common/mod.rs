use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use biwatch::config::WorkspacesConfig;
use biwatch::notifier::Notifier;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Notifier that keeps every message; clones share the list.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

/// Workspace settings pointing both the authority and the API at `base`.
#[allow(dead_code)]
pub fn workspaces_config(base: &str) -> WorkspacesConfig {
    WorkspacesConfig {
        tenant_id: "tenant-1".to_string(),
        client_id: "client-1".to_string(),
        client_secret: "s3cret".to_string(),
        authority_base: base.to_string(),
        api_base: format!("{}/v1.0/myorg", base),
        request_timeout_secs: 5,
        ..WorkspacesConfig::default()
    }
}
