//! Module descriptors and descriptor manifests.

#[cfg(feature = "serde")]
use std::path::Path;

use crate::error::{Error, Result};
use crate::version::Version;

/// Whether a module may be replaced while the host keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SwapPolicy {
    /// Module can be hot swapped.
    RuntimeSwappable,
    /// Replacing the module needs a host restart.
    #[default]
    RestartRequired,
}

impl SwapPolicy {
    /// Get the policy name as written in manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuntimeSwappable => "runtime-swappable",
            Self::RestartRequired => "restart-required",
        }
    }
}

impl std::fmt::Display for SwapPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static metadata a module declares about itself.
///
/// Descriptors are immutable inputs to validation. Runtime metadata such as
/// the enabled flag or the hot-swap generation lives in the host registry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct ModuleDescriptor {
    /// Unique module id within a batch.
    pub id: String,

    /// Informational category, e.g. "render".
    #[cfg_attr(feature = "serde", serde(default))]
    pub category: String,

    /// Version of the module itself.
    #[cfg_attr(feature = "serde", serde(default))]
    pub module_version: Version,

    /// Host API version this module requires.
    pub required_api_version: Version,

    /// Hot swap policy.
    #[cfg_attr(feature = "serde", serde(default))]
    pub swap_policy: SwapPolicy,

    /// Ids that must be present in the same batch.
    #[cfg_attr(feature = "serde", serde(default))]
    pub dependencies: Vec<String>,

    /// Ids that must not be present in the same batch.
    #[cfg_attr(feature = "serde", serde(default))]
    pub conflicts: Vec<String>,
}

impl ModuleDescriptor {
    /// Create a descriptor with no relationships and the default policy.
    pub fn new(id: impl Into<String>, required_api_version: Version) -> Self {
        Self {
            id: id.into(),
            category: String::new(),
            module_version: Version::default(),
            required_api_version,
            swap_policy: SwapPolicy::default(),
            dependencies: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Check if this module declares a dependency on `module_id`.
    pub fn depends_on(&self, module_id: &str) -> bool {
        self.dependencies.iter().any(|d| d == module_id)
    }

    /// Check if this module declares a conflict with `module_id`.
    pub fn conflicts_with(&self, module_id: &str) -> bool {
        self.conflicts.iter().any(|c| c == module_id)
    }

    /// Check the descriptor's own fields.
    ///
    /// Relationships between descriptors are checked by
    /// [`ModuleManager::validate`](crate::ModuleManager::validate).
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::invalid_descriptor("module id must not be empty"));
        }

        if let Some(dep) = self.dependencies.iter().find(|d| d.trim().is_empty()) {
            return Err(Error::invalid_descriptor(format!(
                "module '{}' declares an empty dependency id '{}'",
                self.id, dep
            )));
        }

        if let Some(conflict) = self.conflicts.iter().find(|c| c.trim().is_empty()) {
            return Err(Error::invalid_descriptor(format!(
                "module '{}' declares an empty conflict id '{}'",
                self.id, conflict
            )));
        }

        Ok(())
    }
}

/// Builder for creating descriptors.
pub struct DescriptorBuilder {
    descriptor: ModuleDescriptor,
}

impl DescriptorBuilder {
    /// Create a builder requiring the given host API version.
    pub fn new(id: impl Into<String>, required_api_version: Version) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(id, required_api_version),
        }
    }

    /// Set the category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.descriptor.category = category.into();
        self
    }

    /// Set the module version.
    pub fn module_version(mut self, version: Version) -> Self {
        self.descriptor.module_version = version;
        self
    }

    /// Set the required host API version.
    pub fn required_api_version(mut self, version: Version) -> Self {
        self.descriptor.required_api_version = version;
        self
    }

    /// Set the swap policy.
    pub fn swap_policy(mut self, policy: SwapPolicy) -> Self {
        self.descriptor.swap_policy = policy;
        self
    }

    /// Mark the module as runtime swappable.
    pub fn swappable(self) -> Self {
        self.swap_policy(SwapPolicy::RuntimeSwappable)
    }

    /// Add a dependency.
    pub fn dependency(mut self, id: impl Into<String>) -> Self {
        self.descriptor.dependencies.push(id.into());
        self
    }

    /// Add dependencies.
    pub fn dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add a conflict.
    pub fn conflict(mut self, id: impl Into<String>) -> Self {
        self.descriptor.conflicts.push(id.into());
        self
    }

    /// Add conflicts.
    pub fn conflicts<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.conflicts.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Build and check the descriptor.
    pub fn build(self) -> Result<ModuleDescriptor> {
        self.descriptor.validate()?;
        Ok(self.descriptor)
    }

    /// Build without checking.
    pub fn build_unchecked(self) -> ModuleDescriptor {
        self.descriptor
    }
}

/// An ordered list of descriptors read from a manifest file.
///
/// TOML manifests use one `[[module]]` table per descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleManifest {
    /// Descriptors in declaration order.
    #[cfg_attr(feature = "serde", serde(rename = "module", default))]
    pub modules: Vec<ModuleDescriptor>,
}

impl ModuleManifest {
    /// Create a manifest from descriptors.
    pub fn new(modules: Vec<ModuleDescriptor>) -> Self {
        Self { modules }
    }

    /// Load a manifest from a TOML or JSON file, picked by extension.
    #[cfg(feature = "serde")]
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content)?,
            _ => Self::from_toml(&content)?,
        };

        tracing::debug!(
            "Read {} module descriptors from {}",
            manifest.modules.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Parse a manifest from a TOML string.
    #[cfg(feature = "serde")]
    pub fn from_toml(content: &str) -> Result<Self> {
        let manifest: Self =
            toml::from_str(content).map_err(|e| Error::ManifestParse(e.to_string()))?;
        manifest.check_entries()?;
        Ok(manifest)
    }

    /// Parse a manifest from a JSON string.
    #[cfg(feature = "serde")]
    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(content).map_err(|e| Error::ManifestParse(e.to_string()))?;
        manifest.check_entries()?;
        Ok(manifest)
    }

    /// Serialize to a TOML string.
    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ManifestParse(e.to_string()))
    }

    /// Serialize to a JSON string.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::ManifestParse(e.to_string()))
    }

    /// Find a descriptor by id (first declaration wins).
    pub fn get(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.id == id)
    }

    #[cfg(feature = "serde")]
    fn check_entries(&self) -> Result<()> {
        for module in &self.modules {
            module.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = DescriptorBuilder::new("engine.lighting.basic", Version::new(1, 0, 0))
            .category("render")
            .module_version(Version::new(1, 0, 0))
            .swappable()
            .dependency("engine.render.mesh")
            .conflict("engine.lighting.legacy")
            .build()
            .unwrap();

        assert_eq!(descriptor.id, "engine.lighting.basic");
        assert_eq!(descriptor.swap_policy, SwapPolicy::RuntimeSwappable);
        assert!(descriptor.depends_on("engine.render.mesh"));
        assert!(!descriptor.depends_on("engine.lighting.legacy"));
        assert!(descriptor.conflicts_with("engine.lighting.legacy"));
    }

    #[test]
    fn test_default_swap_policy_requires_restart() {
        let descriptor = ModuleDescriptor::new("m", Version::new(1, 0, 0));
        assert_eq!(descriptor.swap_policy, SwapPolicy::RestartRequired);
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(DescriptorBuilder::new("", Version::new(1, 0, 0)).build().is_err());
        assert!(DescriptorBuilder::new("m", Version::new(1, 0, 0))
            .dependency(" ")
            .build()
            .is_err());
        assert!(DescriptorBuilder::new("m", Version::new(1, 0, 0))
            .conflict("")
            .build()
            .is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_manifest_toml() {
        let toml = r#"
[[module]]
id = "engine.render.mesh"
category = "render"
module-version = { major = 1, minor = 0, patch = 0 }
required-api-version = { major = 1, minor = 0, patch = 0 }
swap-policy = "runtime-swappable"

[[module]]
id = "engine.lighting.basic"
category = "render"
required-api-version = { major = 1, minor = 0, patch = 0 }
dependencies = ["engine.render.mesh"]
"#;

        let manifest = ModuleManifest::from_toml(toml).unwrap();
        assert_eq!(manifest.modules.len(), 2);
        assert_eq!(manifest.modules[0].id, "engine.render.mesh");
        assert_eq!(manifest.modules[0].swap_policy, SwapPolicy::RuntimeSwappable);

        let lighting = manifest.get("engine.lighting.basic").unwrap();
        assert_eq!(lighting.swap_policy, SwapPolicy::RestartRequired);
        assert_eq!(lighting.module_version, Version::default());
        assert!(lighting.depends_on("engine.render.mesh"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_manifest_rejects_empty_id() {
        let toml = r#"
[[module]]
id = ""
required-api-version = { major = 1, minor = 0, patch = 0 }
"#;
        assert!(matches!(
            ModuleManifest::from_toml(toml),
            Err(Error::InvalidDescriptor(_))
        ));
    }
}
