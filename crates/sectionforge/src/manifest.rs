//! The dependency manifest (`package.json`), read and written through the sandbox.

use crate::sandbox::Sandbox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The parts of a package manifest dependency repair cares about. Every
/// other field is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "devDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl PackageManifest {
    /// Whether `package` is declared as a regular or dev dependency.
    pub fn declares(&self, package: &str) -> bool {
        self.dependencies.contains_key(package) || self.dev_dependencies.contains_key(package)
    }

    /// Packages from `packages` that are not declared, sorted and deduplicated.
    pub fn missing<'a>(&self, packages: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut missing: Vec<String> = packages
            .into_iter()
            .filter(|p| !self.declares(p))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Declare `package` at `version`.
    pub fn add(&mut self, package: impl Into<String>, version: impl Into<String>) {
        self.dependencies.insert(package.into(), version.into());
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("invalid package manifest: {e}"))
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("serialize manifest: {e}"))
    }

    /// Load from the sandbox. A missing file yields an empty manifest.
    pub async fn load(sandbox: &dyn Sandbox, path: &str) -> Result<Self, String> {
        match sandbox.read_file(path).await {
            Some(json) => Self::from_json(&json),
            None => Ok(Self::default()),
        }
    }

    pub async fn save(&self, sandbox: &dyn Sandbox, path: &str) -> Result<(), String> {
        let json = self.to_json()?;
        if sandbox.write_file(path, &json).await {
            Ok(())
        } else {
            Err(format!("failed to write {path}"))
        }
    }
}
