//! Configuration for a distributed store.
//!
//! Configuration is assembled from three layers:
//! - Default values (embedded in binary)
//! - Configuration files (TOML format)
//! - Environment variable overrides (prefix: `SLICE__`)
//!
//! # Environment Variables
//!
//! - `SLICE__EXECUTOR__WORKER_THREADS=8`
//! - `SLICE__TRANSACTION__MODE=naive`
//! - `SLICE__LENIENT=true`
//! - `SLICE__POLICY__DISTRIBUTION=hash`
//! - `SLICE__LOGGING__LEVEL=debug`
//! - `SLICE__LOGGING__JSON=1`
//!
//! # Example
//!
//! ```toml
//! lenient = false
//!
//! [[slices]]
//! name = "East"
//! master = true
//! settings = { url = "db://east" }
//!
//! [[slices]]
//! name = "West"
//! settings = { url = "db://west" }
//!
//! [policy]
//! distribution = "round-robin"
//!
//! [transaction]
//! mode = "auto"
//! ```

use crate::slice::{Slice, RESERVED_SLICE_NAME};
use crate::transaction::TransactionMode;
use serde::{Deserialize, Serialize};
use slice_core::SliceName;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
///
/// Every variant is fatal: nothing here is retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no slices configured")]
    NoSlices,

    #[error("slice name must not be empty")]
    BlankSliceName,

    #[error("slice name '{0}' is configured more than once")]
    DuplicateSlice(SliceName),

    #[error("slice name '{0}' is reserved")]
    ReservedSliceName(SliceName),

    #[error("slices '{first}' and '{second}' are both flagged as master")]
    MultipleMasters { first: SliceName, second: SliceName },

    #[error("executor.worker_threads must be greater than zero")]
    InvalidWorkerThreads,

    #[error("unknown distribution policy '{0}'")]
    UnknownPolicy(String),

    #[error("distribution policy {policy} returned slice '{slice}', expected one of [{}]", join_names(.active))]
    PolicyViolation {
        policy: String,
        slice: SliceName,
        active: Vec<SliceName>,
    },

    #[error("slice '{slice}' does not support XA but transaction mode requires two-phase commit")]
    NotXaCapable { slice: SliceName },

    #[error("master slice '{0}' is not available")]
    MasterUnavailable(SliceName),
}

fn join_names(names: &[SliceName]) -> String {
    names
        .iter()
        .map(SliceName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Root configuration
// =============================================================================

/// Root configuration of a distributed store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceStoreConfig {
    /// Leave slices that fail to connect inactive instead of failing `open`.
    pub lenient: bool,
    /// Slices in enumeration order
    pub slices: Vec<SliceDefinition>,
    /// Placement policy selection
    pub policy: PolicyConfig,
    /// Worker pool sizing
    pub executor: ExecutorConfig,
    /// Transaction coordination
    pub transaction: TransactionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl SliceStoreConfig {
    /// Loads configuration from an optional file path with environment variable overrides.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (SLICE__*)
    /// 2. Configuration file (if provided)
    /// 3. Built-in defaults
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(file_path) = path {
            if Path::new(file_path).exists() {
                let contents = std::fs::read_to_string(file_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Applies `SLICE__*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides read through `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("SLICE__EXECUTOR__WORKER_THREADS") {
            if let Ok(v) = val.parse() {
                self.executor.worker_threads = Some(v);
            }
        }
        if let Some(val) = lookup("SLICE__TRANSACTION__MODE") {
            if let Ok(mode) = val.parse() {
                self.transaction.mode = mode;
            }
        }
        if let Some(val) = lookup("SLICE__LENIENT") {
            self.lenient = parse_flag(&val);
        }
        if let Some(val) = lookup("SLICE__POLICY__DISTRIBUTION") {
            self.policy.distribution = val;
        }
        if let Some(val) = lookup("SLICE__LOGGING__LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("SLICE__LOGGING__JSON") {
            self.logging.json = parse_flag(&val);
        }
    }

    /// Serializes the configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Appends a slice definition.
    pub fn with_slice(mut self, slice: SliceDefinition) -> Self {
        self.slices.push(slice);
        self
    }

    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn with_distribution(mut self, policy: impl Into<String>) -> Self {
        self.policy.distribution = policy.into();
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.executor.worker_threads = Some(threads);
        self
    }

    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction.mode = mode;
        self
    }

    /// Checks the slice list and executor settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slices.is_empty() {
            return Err(ConfigError::NoSlices);
        }

        let mut seen = HashSet::new();
        let mut master: Option<&SliceName> = None;
        for def in &self.slices {
            validate_slice_name(&def.name)?;
            if !seen.insert(&def.name) {
                return Err(ConfigError::DuplicateSlice(def.name.clone()));
            }
            if def.master {
                if let Some(first) = master {
                    return Err(ConfigError::MultipleMasters {
                        first: first.clone(),
                        second: def.name.clone(),
                    });
                }
                master = Some(&def.name);
            }
        }

        if self.executor.worker_threads == Some(0) {
            return Err(ConfigError::InvalidWorkerThreads);
        }
        Ok(())
    }

    /// Index of the master slice: the flagged one, or the first.
    pub fn master_index(&self) -> usize {
        self.slices.iter().position(|s| s.master).unwrap_or(0)
    }

    /// Builds slice handles in enumeration order with the master resolved.
    pub fn slices(&self) -> Vec<Slice> {
        let master = self.master_index();
        self.slices
            .iter()
            .enumerate()
            .map(|(i, def)| def.to_slice(i == master))
            .collect()
    }
}

/// Rejects blank and reserved slice names.
pub fn validate_slice_name(name: &SliceName) -> Result<(), ConfigError> {
    if name.is_blank() {
        return Err(ConfigError::BlankSliceName);
    }
    if name.as_str().eq_ignore_ascii_case(RESERVED_SLICE_NAME) {
        return Err(ConfigError::ReservedSliceName(name.clone()));
    }
    Ok(())
}

fn parse_flag(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

// =============================================================================
// Sections
// =============================================================================

/// One configured slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceDefinition {
    pub name: SliceName,
    #[serde(default)]
    pub master: bool,
    /// Opaque connection settings
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl SliceDefinition {
    pub fn new(name: impl Into<SliceName>) -> Self {
        Self {
            name: name.into(),
            master: false,
            settings: BTreeMap::new(),
        }
    }

    /// Flags this slice as master.
    pub fn master(mut self) -> Self {
        self.master = true;
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Creates the immutable handle.
    pub fn to_slice(&self, master: bool) -> Slice {
        Slice::new(self.name.clone(), self.settings.clone(), master)
    }
}

/// Placement policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Registered policy name (`round-robin`, `hash`, `type-affinity`, ...)
    pub distribution: String,
    /// Type name to slice, read by the `type-affinity` policy
    pub affinity: BTreeMap<String, SliceName>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            distribution: "round-robin".to_string(),
            affinity: BTreeMap::new(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Pool size (None = one thread per configured slice)
    pub worker_threads: Option<usize>,
}

/// Transaction configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub mode: TransactionMode,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Use JSON format for log output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn two_slices() -> SliceStoreConfig {
        SliceStoreConfig::default()
            .with_slice(SliceDefinition::new("A"))
            .with_slice(SliceDefinition::new("B"))
    }

    #[test]
    fn test_default_config() {
        let config = SliceStoreConfig::default();
        assert!(!config.lenient);
        assert!(config.slices.is_empty());
        assert_eq!(config.policy.distribution, "round-robin");
        assert_eq!(config.transaction.mode, TransactionMode::Auto);
        assert!(config.executor.worker_threads.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_master_defaults_to_first() {
        let config = two_slices();
        config.validate().unwrap();
        let slices = config.slices();
        assert!(slices[0].is_master());
        assert!(!slices[1].is_master());
    }

    #[test]
    fn test_flagged_master() {
        let config = SliceStoreConfig::default()
            .with_slice(SliceDefinition::new("A"))
            .with_slice(SliceDefinition::new("B").master());
        config.validate().unwrap();
        assert_eq!(config.master_index(), 1);
        assert!(config.slices()[1].is_master());
    }

    #[test]
    fn test_validate_rejects_bad_slices() {
        assert!(matches!(
            SliceStoreConfig::default().validate(),
            Err(ConfigError::NoSlices)
        ));

        let dup = two_slices().with_slice(SliceDefinition::new("A"));
        assert!(matches!(dup.validate(), Err(ConfigError::DuplicateSlice(n)) if n.as_str() == "A"));

        let reserved = two_slices().with_slice(SliceDefinition::new("default"));
        assert!(matches!(
            reserved.validate(),
            Err(ConfigError::ReservedSliceName(_))
        ));

        let blank = two_slices().with_slice(SliceDefinition::new(" "));
        assert!(matches!(blank.validate(), Err(ConfigError::BlankSliceName)));

        let masters = SliceStoreConfig::default()
            .with_slice(SliceDefinition::new("A").master())
            .with_slice(SliceDefinition::new("B").master());
        assert!(matches!(
            masters.validate(),
            Err(ConfigError::MultipleMasters { .. })
        ));

        let zero = two_slices().with_worker_threads(0);
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::InvalidWorkerThreads)
        ));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SLICE__EXECUTOR__WORKER_THREADS", "6"),
            ("SLICE__TRANSACTION__MODE", "naive"),
            ("SLICE__LENIENT", "1"),
            ("SLICE__POLICY__DISTRIBUTION", "hash"),
            ("SLICE__LOGGING__JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = two_slices();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.executor.worker_threads, Some(6));
        assert_eq!(config.transaction.mode, TransactionMode::Naive);
        assert!(config.lenient);
        assert_eq!(config.policy.distribution, "hash");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_bad_override_is_ignored() {
        let mut config = two_slices();
        config.apply_overrides(|key| match key {
            "SLICE__EXECUTOR__WORKER_THREADS" => Some("many".to_string()),
            "SLICE__TRANSACTION__MODE" => Some("eventual".to_string()),
            _ => None,
        });
        assert!(config.executor.worker_threads.is_none());
        assert_eq!(config.transaction.mode, TransactionMode::Auto);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            lenient = true

            [[slices]]
            name = "East"
            settings = { url = "db://east" }

            [[slices]]
            name = "West"
            master = true

            [policy]
            distribution = "type-affinity"
            affinity = { Invoice = "West" }

            [executor]
            worker_threads = 4

            [transaction]
            mode = "xa"
        "#;

        let config: SliceStoreConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert!(config.lenient);
        assert_eq!(config.slices.len(), 2);
        assert_eq!(config.slices[0].settings.get("url").map(String::as_str), Some("db://east"));
        assert_eq!(config.master_index(), 1);
        assert_eq!(config.policy.affinity.get("Invoice"), Some(&SliceName::new("West")));
        assert_eq!(config.executor.worker_threads, Some(4));
        assert_eq!(config.transaction.mode, TransactionMode::Xa);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = two_slices().with_transaction_mode(TransactionMode::Naive);
        let toml_str = config.to_toml().unwrap();
        assert!(toml_str.contains("[[slices]]"));
        assert!(toml_str.contains("[transaction]"));

        let parsed: SliceStoreConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.slices, config.slices);
        assert_eq!(parsed.transaction.mode, TransactionMode::Naive);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[slices]]\nname = \"Only\"\n").unwrap();

        let path = file.path().to_str().unwrap();
        let config = SliceStoreConfig::load(Some(path)).unwrap();
        assert_eq!(config.slices.len(), 1);
        assert_eq!(config.slices[0].name.as_str(), "Only");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = SliceStoreConfig::load(path.to_str()).unwrap();
        assert!(config.slices.is_empty());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "slices = 3").unwrap();
        let result = SliceStoreConfig::load(file.path().to_str());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_policy_violation_message() {
        let err = ConfigError::PolicyViolation {
            policy: "FixedPolicy".to_string(),
            slice: SliceName::new("Z"),
            active: vec![SliceName::new("A"), SliceName::new("B")],
        };
        let msg = err.to_string();
        assert!(msg.contains("FixedPolicy"));
        assert!(msg.contains("'Z'"));
        assert!(msg.contains("[A, B]"));
    }
}
