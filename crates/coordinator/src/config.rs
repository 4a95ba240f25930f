//! Coordinator configuration

use std::path::PathBuf;

/// Configuration for the transaction coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name used in logs and crash reports
    pub name: String,

    /// Directory for the id counter and the transaction log
    pub data_dir: PathBuf,
}

impl CoordinatorConfig {
    /// Create a new config with the given data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "coordinator".to_string(),
            data_dir: data_dir.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
