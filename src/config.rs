//! Configuration management for fakerfs
//!
//! The configuration file lists the synthetic files to overlay. Entries can
//! inherit from named templates and nest under `directory` entries; both
//! are resolved here so the overlay only ever sees a flat, ordered list of
//! `(path, handler kind, handler config)` triples.

use crate::error::{Error, Result};
use crate::handler::HandlerKind;
use serde::Deserialize;
use serde_yaml::Mapping;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Entry type that groups other entries instead of naming a handler
pub const DIRECTORY_TYPE: &str = "directory";

/// Environment variable overriding the global cache default
pub const CACHE_ENV: &str = "FAKERFS_CACHE";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default snapshot caching for entries that do not set `cache`
    #[serde(default)]
    pub cache: bool,

    /// Owner reported for synthetic nodes (defaults to the mounting user)
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,

    /// Named entries other entries can inherit from
    #[serde(default)]
    pub templates: HashMap<String, ConfigEntry>,

    /// Synthetic files and directories, relative to the mount root
    #[serde(default)]
    pub files: Vec<ConfigEntry>,
}

/// One configured file or directory
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigEntry {
    #[serde(default)]
    pub path: Option<String>,

    /// Handler kind, or `directory`
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub template: Option<String>,

    /// Children of a `directory` entry
    #[serde(default)]
    pub contents: Option<Vec<ConfigEntry>>,

    /// Handler configuration
    #[serde(default)]
    pub config: Option<Mapping>,

    #[serde(default)]
    pub cache: Option<bool>,
}

/// A synthetic file ready to be instantiated
#[derive(Debug, Clone, PartialEq)]
pub struct FlatEntry {
    /// Slash-separated path relative to the mount root
    pub path: String,
    pub kind: HandlerKind,
    pub config: Mapping,
    pub cache: bool,
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config = Self::parse(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from YAML text
    pub fn parse(content: &str) -> Result<Self> {
        // An empty document deserializes as null
        if content.trim().is_empty() {
            return Ok(Config::default());
        }

        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(cache) = std::env::var(CACHE_ENV) {
            match cache.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.cache = true,
                "0" | "false" | "no" | "off" => self.cache = false,
                _ => {}
            }
        }
    }

    /// Check template references up front so errors name the template
    pub fn validate(&self) -> Result<()> {
        for (name, template) in &self.templates {
            if let Some(parent) = &template.template {
                if !self.templates.contains_key(parent) {
                    return Err(Error::InvalidConfig(format!(
                        "template {:?} inherits unknown template {:?}",
                        name, parent
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve an entry's template chain into a standalone entry.
    ///
    /// Fields set on the entry win; `config` maps are merged key by key.
    pub fn resolve(&self, entry: &ConfigEntry) -> Result<ConfigEntry> {
        let mut resolved = entry.clone();
        let mut seen = HashSet::new();

        while let Some(name) = resolved.template.take() {
            if !seen.insert(name.clone()) {
                return Err(Error::InvalidConfig(format!(
                    "template {:?} inherits from itself",
                    name
                )));
            }
            let parent = self.templates.get(&name).ok_or_else(|| {
                Error::InvalidConfig(format!("unknown template {:?}", name))
            })?;

            if resolved.path.is_none() {
                resolved.path = parent.path.clone();
            }
            if resolved.kind.is_none() {
                resolved.kind = parent.kind.clone();
            }
            if resolved.contents.is_none() {
                resolved.contents = parent.contents.clone();
            }
            if resolved.cache.is_none() {
                resolved.cache = parent.cache;
            }
            if let Some(inherited) = &parent.config {
                let config = resolved.config.get_or_insert_with(Mapping::new);
                for (key, value) in inherited {
                    if !config.contains_key(key) {
                        config.insert(key.clone(), value.clone());
                    }
                }
            }
            resolved.template = parent.template.clone();
        }

        Ok(resolved)
    }

    /// Every synthetic file, in configuration order
    pub fn flatten(&self) -> Result<Vec<FlatEntry>> {
        let mut flat = Vec::new();
        self.flatten_into(Path::new(""), &self.files, &mut flat)?;
        Ok(flat)
    }

    fn flatten_into(&self, prefix: &Path, entries: &[ConfigEntry], flat: &mut Vec<FlatEntry>) -> Result<()> {
        for entry in entries {
            let entry = self.resolve(entry)?;
            let path = match &entry.path {
                Some(path) => join(prefix, path),
                None => {
                    return Err(Error::InvalidConfig(format!(
                        "entry under {:?} has no path",
                        display(prefix)
                    )))
                }
            };

            let kind = entry.kind.as_deref().ok_or_else(|| {
                Error::InvalidConfig(format!("entry {:?} has no type", display(&path)))
            })?;

            if kind == DIRECTORY_TYPE {
                if entry.config.is_some() {
                    return Err(Error::InvalidConfig(format!(
                        "directory {:?} cannot carry handler config",
                        display(&path)
                    )));
                }
                let contents = entry.contents.unwrap_or_default();
                self.flatten_into(&path, &contents, flat)?;
                continue;
            }

            if entry.contents.is_some() {
                return Err(Error::InvalidConfig(format!(
                    "{} entry {:?} cannot have contents",
                    kind,
                    display(&path)
                )));
            }

            let kind: HandlerKind = kind
                .parse()
                .map_err(|e| Error::InvalidConfig(format!("entry {:?}: {}", display(&path), e)))?;

            flat.push(FlatEntry {
                path: display(&path),
                kind,
                config: entry.config.unwrap_or_default(),
                cache: entry.cache.unwrap_or(self.cache),
            });
        }
        Ok(())
    }
}

fn join(prefix: &Path, path: &str) -> PathBuf {
    prefix.join(path.trim_start_matches('/'))
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
