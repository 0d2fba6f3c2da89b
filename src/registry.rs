//! Durable list of service definitions.
//!
//! The registry is pure data: an ordered list of `{name, command}` records
//! persisted as pretty-printed JSON under a single `services` key. Every
//! mutation writes the whole document to a temporary file in the same
//! directory and renames it into place, so a crash mid-save never leaves a
//! truncated registry behind.

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::RegistryError;

/// A named, user-defined shell command intended to run as a long-lived
/// background process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Unique key among definitions.
    pub name: String,
    /// Shell command line used to launch the service.
    pub command: String,
}

/// On-disk document shape.
#[derive(Debug, Serialize, Deserialize, Default)]
struct RegistryFile {
    services: Vec<ServiceDefinition>,
}

/// Ordered collection of service definitions bound to a backing file.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    services: Vec<ServiceDefinition>,
}

impl Registry {
    /// Default registry location under the user's data directory.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(format!("{home}/.local/share/svcmgr/services.json"))
    }

    /// Loads the registry from `path`. A missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        if !path.exists() {
            debug!("Registry file {path:?} absent; starting empty");
            return Ok(Self {
                path,
                services: Vec::new(),
            });
        }

        let contents = fs::read_to_string(&path)?;
        let file: RegistryFile = serde_json::from_str(&contents)?;
        Ok(Self {
            path,
            services: file.services,
        })
    }

    /// Saves the current definitions with a write-then-replace.
    fn save(&self) -> Result<(), RegistryError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let document = serde_json::to_string_pretty(&RegistryFile {
            services: self.services.clone(),
        })?;

        let tmp = NamedTempFile::new_in(parent)?;
        fs::write(tmp.path(), document)?;
        tmp.persist(&self.path)?;
        Ok(())
    }

    /// Adds a definition and persists. Names must be unique; a duplicate is
    /// rejected rather than silently shadowing the existing entry.
    pub fn add(&mut self, name: &str, command: &str) -> Result<(), RegistryError> {
        if self.get(name).is_some() {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }

        self.services.push(ServiceDefinition {
            name: name.to_string(),
            command: command.to_string(),
        });
        self.save()
    }

    /// Replaces the command of an existing definition and persists.
    pub fn update_command(
        &mut self,
        name: &str,
        command: &str,
    ) -> Result<(), RegistryError> {
        let service = self
            .services
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| RegistryError::UnknownService(name.to_string()))?;

        service.command = command.to_string();
        self.save()
    }

    /// Removes a definition and persists.
    pub fn remove(&mut self, name: &str) -> Result<(), RegistryError> {
        let before = self.services.len();
        self.services.retain(|s| s.name != name);
        if self.services.len() == before {
            return Err(RegistryError::UnknownService(name.to_string()));
        }
        self.save()
    }

    /// Looks up a definition by name.
    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    /// All definitions in insertion order.
    pub fn definitions(&self) -> &[ServiceDefinition] {
        &self.services
    }
}
