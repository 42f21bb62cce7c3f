//! Driver configuration loaded from a TOML file.
//!
//! ```toml
//! memory_limit = 20971520
//! check = false
//!
//! [heap]
//! chunk_size = 4096
//! initial_size = 4096
//! check_invariants = false
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tagheap::{HeapConfig, DEFAULT_MEMORY_LIMIT};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Largest size in bytes the simulated memory may grow to.
    pub memory_limit: u64,
    /// Run the heap checker after every operation and fail the trace on a violation.
    pub check: bool,
    pub heap: HeapConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            check: false,
            heap: HeapConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load the configuration from the given file, or the defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => return Ok(Self::default()),
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        log::debug!("loaded config {:?}", config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(DriverConfig::parse("").unwrap(), DriverConfig::default());
        assert_eq!(DriverConfig::load(None).unwrap(), DriverConfig::default());
    }

    #[test]
    fn parse_partial() {
        let config = DriverConfig::parse(
            r#"
            memory_limit = 65536

            [heap]
            chunk_size = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.memory_limit, 65536);
        assert!(!config.check);
        assert_eq!(config.heap.chunk_size, 1024);
        assert_eq!(config.heap.initial_size, HeapConfig::default().initial_size);
    }

    #[test]
    fn unknown_key() {
        assert!(DriverConfig::parse("memory = 10").is_err());
    }

    #[test]
    fn missing_file() {
        let err = DriverConfig::load(Some(Path::new("/nonexistent/tagheap.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read"));
    }
}
