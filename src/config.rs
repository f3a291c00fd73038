use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::health::HealthConfig;

pub const CONFIG_FILE: &str = "covtrack.toml";
pub const DEFAULT_DB_NAME: &str = ".covtrack.db";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub project: Project,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize)]
pub struct Project {
    pub name: String,
    /// `owner/name`, defaults to the project name
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    /// SQLite file; `~` and `$VARS` are expanded
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    DEFAULT_DB_NAME.to_string()
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: Project {
                name: "default".to_string(),
                slug: None,
            },
            storage: Storage::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            anyhow::bail!("Project name cannot be empty");
        }

        if self.health.recent_builds == 0 {
            anyhow::bail!("health.recent_builds must be greater than 0");
        }

        let threshold = self.health.fails_often_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!(
                "health.fails_often_threshold must be between 0 and 1, got {}",
                threshold
            );
        }

        Ok(())
    }

    pub fn project_slug(&self) -> String {
        self.project
            .slug
            .clone()
            .unwrap_or_else(|| self.project.name.clone())
    }

    /// Database location, relative paths resolved against `base_dir`
    pub fn database_path(&self, base_dir: &Path) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.storage.database)
            .with_context(|| format!("Could not expand database path: {}", self.storage.database))?;
        let path = PathBuf::from(expanded.as_ref());

        Ok(if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        })
    }
}
