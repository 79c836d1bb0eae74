//! Runtime configuration.
//!
//! [`RuntimeConfig`] deserializes with defaults for every field and can be
//! read from the environment:
//!
//! - `METAGRAPH_REPOSITORY`: repository key deltas lock on (default: "default")
//! - `METAGRAPH_CACHE_DIR`: where the compiled backend caches emitted source
//! - `METAGRAPH_MAX_CALL_DEPTH`: nesting limit for both backends (default: 256)
//! - `METAGRAPH_BACKEND`: `interpreter` or `compiled` (default: interpreter)

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use metagraph_codegen::CompileOptions;
use metagraph_exec::InterpreterConfig;

use crate::error::RuntimeError;

/// Which execution backend runs a function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Interpreter,
    Compiled,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Interpreter => f.write_str("interpreter"),
            BackendKind::Compiled => f.write_str("compiled"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interpreter" | "interpreted" => Ok(BackendKind::Interpreter),
            "compiled" | "compiler" | "vm" => Ok(BackendKind::Compiled),
            other => Err(RuntimeError::config(
                "METAGRAPH_BACKEND",
                format!("unknown backend '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Key of the repository lock every delta takes.
    pub repository: String,
    pub cache_dir: Option<PathBuf>,
    pub max_call_depth: usize,
    /// Backend used by [`Runtime::run`](crate::Runtime::run).
    pub backend: BackendKind,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            repository: "default".to_string(),
            cache_dir: None,
            max_call_depth: 256,
            backend: BackendKind::Interpreter,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RuntimeError> {
        let mut config = RuntimeConfig::default();
        if let Some(repository) = lookup("METAGRAPH_REPOSITORY") {
            config.repository = repository;
        }
        if let Some(dir) = lookup("METAGRAPH_CACHE_DIR").filter(|d| !d.is_empty()) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(depth) = lookup("METAGRAPH_MAX_CALL_DEPTH") {
            config.max_call_depth = depth
                .trim()
                .parse()
                .map_err(|e| RuntimeError::config("METAGRAPH_MAX_CALL_DEPTH", format!("{e}")))?;
        }
        if let Some(backend) = lookup("METAGRAPH_BACKEND") {
            config.backend = backend.parse()?;
        }
        Ok(config)
    }

    pub fn interpreter_config(&self) -> InterpreterConfig {
        InterpreterConfig {
            max_call_depth: self.max_call_depth,
            ..InterpreterConfig::default()
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            cache_dir: self.cache_dir.clone(),
            max_call_depth: self.max_call_depth,
            ..CompileOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn environment_overrides_every_field() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("METAGRAPH_REPOSITORY", "models"),
            ("METAGRAPH_CACHE_DIR", "/tmp/mg"),
            ("METAGRAPH_MAX_CALL_DEPTH", "64"),
            ("METAGRAPH_BACKEND", "Compiled"),
        ]))
        .unwrap();
        assert_eq!(config.repository, "models");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/mg")));
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.backend, BackendKind::Compiled);
        assert_eq!(config.compile_options().max_call_depth, 64);
        assert_eq!(config.interpreter_config().max_call_depth, 64);
    }

    #[test]
    fn bad_values_are_config_errors() {
        let err = RuntimeConfig::from_lookup(lookup(&[("METAGRAPH_MAX_CALL_DEPTH", "deep")]))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Config { ref key, .. } if key == "METAGRAPH_MAX_CALL_DEPTH"));
        let err = RuntimeConfig::from_lookup(lookup(&[("METAGRAPH_BACKEND", "jit")])).unwrap_err();
        assert!(err.to_string().contains("jit"));
    }

    #[test]
    fn json_fills_missing_fields() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"backend": "compiled"}"#).unwrap();
        assert_eq!(config.backend, BackendKind::Compiled);
        assert_eq!(config.max_call_depth, 256);
        assert_eq!(config.repository, "default");
    }
}
