use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{error::EngineError, resource::ResourceLimits};

/// Settings for one playground: where scripts live and how they are recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundConfig {
    /// Directory that absolute imports are resolved against.
    pub root_path: PathBuf,
    /// Extension of module files, without the dot.
    pub source_extension: String,
    /// File stem marking a directory as a package.
    pub package_marker: String,
    /// Top-level name of the curated capability namespace.
    pub api_namespace: String,
    pub limits: ResourceLimits,
    /// Upper bound on ticks for `run_until_idle` when the host passes none.
    pub max_ticks_per_run: usize,
    /// Round-robin passes over the ready sandboxes within one tick; the clock does not move
    /// between them.
    pub max_rounds_per_tick: usize,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            source_extension: "py".to_owned(),
            package_marker: "__init__".to_owned(),
            api_namespace: "robot_war".to_owned(),
            limits: ResourceLimits::default(),
            max_ticks_per_run: 1_000_000,
            max_rounds_per_tick: 1_000,
        }
    }
}

impl PlaygroundConfig {
    #[must_use]
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON; omitted fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(text)?)
    }

    #[must_use]
    pub fn with_source_extension(mut self, extension: impl Into<String>) -> Self {
        self.source_extension = extension.into();
        self
    }

    #[must_use]
    pub fn with_package_marker(mut self, marker: impl Into<String>) -> Self {
        self.package_marker = marker.into();
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_max_rounds_per_tick(mut self, rounds: usize) -> Self {
        self.max_rounds_per_tick = rounds.max(1);
        self
    }

    /// Path of a file module `name` inside `dir`.
    #[must_use]
    pub(crate) fn module_file(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.{}", self.source_extension))
    }

    /// Path of the package marker file of package `name` inside `dir`.
    #[must_use]
    pub(crate) fn package_file(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(name)
            .join(format!("{}.{}", self.package_marker, self.source_extension))
    }

    /// True when `path` is a package marker file.
    #[must_use]
    pub(crate) fn is_package_file(&self, path: &Path) -> bool {
        path.file_stem().is_some_and(|stem| stem == self.package_marker.as_str())
    }
}
