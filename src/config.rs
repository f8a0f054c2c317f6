use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::MergeError;

#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    pub description: Option<String>,
    pub priority: PriorityList,
    #[serde(default)]
    pub null_values: NullValues,
}

/// Fold order of the providers. Earlier entries win quality ties.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PriorityList {
    pub name: String,
    pub version: String,
    pub providers: Vec<ProviderConfig>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub input_dir: PathBuf,
    pub url: Option<String>,
    pub bibcode: Option<String>,
    pub access: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct NullValues {
    #[serde(default = "default_canonical")]
    pub canonical: String,
    #[serde(default = "default_tokens")]
    pub tokens: Vec<String>,
}

fn default_canonical() -> String {
    "?".to_string()
}

fn default_tokens() -> Vec<String> {
    vec!["N".to_string(), "N/A".to_string()]
}

impl Default for NullValues {
    fn default() -> Self {
        Self { canonical: default_canonical(), tokens: default_tokens() }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open run configuration file: {}", path.display()))?;
        let config: RunConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse run configuration YAML from {}", path.display()))?;
        config
            .priority
            .validate()
            .with_context(|| format!("Invalid priority list in {}", path.display()))?;
        Ok(config)
    }
}

impl PriorityList {
    pub fn validate(&self) -> std::result::Result<(), MergeError> {
        if self.providers.is_empty() {
            return Err(MergeError::EmptyPriority);
        }
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(MergeError::DuplicateProvider(provider.name.clone()));
            }
        }
        Ok(())
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name.as_str())
    }

    /// SHA-256 over the version and the ordered provider names. Changes
    /// whenever the tie-break order does.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        for name in self.provider_names() {
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
        }
        format!("sha256-{}", hex::encode(hasher.finalize()))
    }
}
