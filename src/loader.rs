//! Module unit loading and instantiation.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::abi::{ModuleEntryPoints, MODULE_API_VERSION};
use crate::descriptor::ModuleDescriptor;
#[cfg(feature = "dynamic")]
use crate::descriptor::ModuleManifest;
use crate::error::{Error, Result};
use crate::instance::ModuleInstance;
use crate::version::Version;

/// Configuration for the module loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Module ABI version the host provides.
    pub host_abi_version: Version,
    /// Base path for resolving relative library paths.
    pub base_path: Option<PathBuf>,
    /// Require the full compatibility rule rather than a major match.
    pub strict_abi_check: bool,
    /// File extension of module libraries, without the dot.
    pub library_extension: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            host_abi_version: MODULE_API_VERSION,
            base_path: None,
            strict_abi_check: true,
            library_extension: std::env::consts::DLL_EXTENSION.to_string(),
        }
    }
}

impl LoaderConfig {
    /// Create a new loader configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host ABI version.
    pub fn with_host_abi_version(mut self, version: Version) -> Self {
        self.host_abi_version = version;
        self
    }

    /// Set the base path.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Set strict ABI checking.
    pub fn with_strict_abi_check(mut self, strict: bool) -> Self {
        self.strict_abi_check = strict;
        self
    }

    /// Set the library extension.
    pub fn with_library_extension(mut self, extension: impl Into<String>) -> Self {
        self.library_extension = extension.into();
        self
    }
}

/// Where a unit's entry points come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOrigin {
    /// Linked into the host binary.
    Static,
    /// Resolved from a dynamic library.
    Library(PathBuf),
}

/// A descriptor paired with the entry points that create its instances.
#[derive(Clone)]
pub struct ModuleUnit {
    descriptor: ModuleDescriptor,
    entry_points: ModuleEntryPoints,
    origin: UnitOrigin,
    library: Option<Arc<dyn Any + Send + Sync>>,
}

impl ModuleUnit {
    /// Pair a descriptor with entry points linked into the host.
    ///
    /// Use [`module_entry_points!`](crate::module_entry_points) to build the
    /// entry points for a module type.
    pub fn new(descriptor: ModuleDescriptor, entry_points: ModuleEntryPoints) -> Self {
        Self {
            descriptor,
            entry_points,
            origin: UnitOrigin::Static,
            library: None,
        }
    }

    /// Get the descriptor.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Get the module id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Get the entry points.
    pub fn entry_points(&self) -> &ModuleEntryPoints {
        &self.entry_points
    }

    /// Get the origin.
    pub fn origin(&self) -> &UnitOrigin {
        &self.origin
    }
}

impl std::fmt::Debug for ModuleUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleUnit")
            .field("id", &self.descriptor.id)
            .field("origin", &self.origin)
            .field("abi_version", &self.entry_points.api_version())
            .finish()
    }
}

/// Creates module instances from units after checking their ABI version.
pub struct ModuleLoader {
    config: LoaderConfig,
}

impl ModuleLoader {
    /// Create a new module loader.
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Get the loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Check the ABI version a unit reports against the host.
    pub fn check_abi(&self, unit: &ModuleUnit) -> Result<()> {
        let built = unit.entry_points.api_version();
        let host = self.config.host_abi_version;

        let compatible = if self.config.strict_abi_check {
            built.is_compatible_with(&host)
        } else {
            built.major == host.major
        };

        if compatible {
            Ok(())
        } else {
            tracing::warn!(
                "Refusing module {}: built against ABI {}, host provides {}",
                unit.id(),
                built,
                host
            );
            Err(Error::abi_version_mismatch(
                unit.id(),
                built.to_string(),
                host.to_string(),
            ))
        }
    }

    /// Create a new instance of a unit.
    ///
    /// The ABI version is checked first; an incompatible unit's
    /// `create_module` is never called.
    pub fn instantiate(&self, unit: &ModuleUnit, generation: u32) -> Result<ModuleInstance> {
        self.check_abi(unit)?;

        // SAFETY: the ABI version was checked above.
        let module = unsafe { unit.entry_points.create(unit.library.clone()) }
            .ok_or_else(|| Error::load_failed(format!("'{}' returned no instance", unit.id())))?;

        tracing::debug!("Created module {} (generation {})", unit.id(), generation);

        Ok(ModuleInstance::new(unit.id(), generation, module))
    }

    /// Path of the library file for a module named `name`.
    ///
    /// Adds the platform library prefix and the configured extension, then
    /// resolves against the base path.
    pub fn library_path(&self, name: &str) -> PathBuf {
        let file = format!(
            "{}{}.{}",
            std::env::consts::DLL_PREFIX,
            name,
            self.config.library_extension
        );
        self.resolve_path(Path::new(&file))
    }

    /// Open a module library and resolve its entry points.
    ///
    /// A library that cannot be opened fails with [`Error::LoadFailed`]; a
    /// missing entry point fails with [`Error::SymbolNotFound`]. The library
    /// stays mapped for as long as the unit or any of its instances lives.
    #[cfg(feature = "dynamic")]
    pub fn load_library(
        &self,
        path: impl AsRef<Path>,
        descriptor: ModuleDescriptor,
    ) -> Result<ModuleUnit> {
        use crate::abi::{
            CreateModuleFn, DestroyModuleFn, QueryModuleApiVersionFn, CREATE_MODULE_SYMBOL,
            DESTROY_MODULE_SYMBOL, QUERY_MODULE_API_VERSION_SYMBOL,
        };

        let path = self.resolve_path(path.as_ref());
        tracing::debug!("Loading module library {}", path.display());

        // SAFETY: running a library's initialisers is inherent to loading it.
        let library = unsafe { libloading::Library::new(&path) }
            .map_err(|e| Error::load_failed(format!("{}: {}", path.display(), e)))?;

        let library_name = path.display().to_string();

        // SAFETY: the symbol types match the signatures `export_module!`
        // generates.
        let entry_points = unsafe {
            let create = *library
                .get::<CreateModuleFn>(CREATE_MODULE_SYMBOL.as_bytes())
                .map_err(|_| Error::symbol_not_found(&library_name, CREATE_MODULE_SYMBOL))?;
            let destroy = *library
                .get::<DestroyModuleFn>(DESTROY_MODULE_SYMBOL.as_bytes())
                .map_err(|_| Error::symbol_not_found(&library_name, DESTROY_MODULE_SYMBOL))?;
            let query = *library
                .get::<QueryModuleApiVersionFn>(QUERY_MODULE_API_VERSION_SYMBOL.as_bytes())
                .map_err(|_| {
                    Error::symbol_not_found(&library_name, QUERY_MODULE_API_VERSION_SYMBOL)
                })?;
            ModuleEntryPoints::new(create, destroy, query)
        };

        tracing::info!(
            "Loaded module library {} for {} (ABI {})",
            path.display(),
            descriptor.id,
            entry_points.api_version()
        );

        Ok(ModuleUnit {
            descriptor,
            entry_points,
            origin: UnitOrigin::Library(path),
            library: Some(Arc::new(library)),
        })
    }

    /// Open the library of every module a manifest declares.
    ///
    /// Each module's library is located with [`library_path`](Self::library_path)
    /// using its id. Fails on the first library that cannot be loaded.
    #[cfg(feature = "dynamic")]
    pub fn load_manifest(&self, manifest: &ModuleManifest) -> Result<Vec<ModuleUnit>> {
        manifest
            .modules
            .iter()
            .map(|descriptor| {
                let path = self.library_path(&descriptor.id);
                self.load_library(path, descriptor.clone())
            })
            .collect()
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(ref base) = self.config.base_path {
            base.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;
    use crate::lifecycle::{LifecycleState, Module};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FUTURE_BUILT: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Counted;

    impl Module for Counted {}

    struct FutureModule;

    impl Default for FutureModule {
        fn default() -> Self {
            FUTURE_BUILT.fetch_add(1, Ordering::SeqCst);
            FutureModule
        }
    }

    impl Module for FutureModule {}

    struct Refuses;

    impl Default for Refuses {
        fn default() -> Self {
            panic!("no device");
        }
    }

    impl Module for Refuses {}

    fn descriptor(id: &str) -> ModuleDescriptor {
        DescriptorBuilder::new(id, MODULE_API_VERSION).build_unchecked()
    }

    #[test]
    fn test_loader_config_builder() {
        let config = LoaderConfig::new()
            .with_base_path("/opt/modules")
            .with_strict_abi_check(false)
            .with_library_extension("so");

        assert_eq!(config.base_path, Some(PathBuf::from("/opt/modules")));
        assert!(!config.strict_abi_check);
        assert_eq!(config.library_extension, "so");
        assert_eq!(config.host_abi_version, MODULE_API_VERSION);
    }

    #[test]
    fn test_instantiate() {
        let loader = ModuleLoader::default();
        let unit = ModuleUnit::new(descriptor("engine.render.mesh"), crate::module_entry_points!(Counted));
        assert_eq!(unit.origin(), &UnitOrigin::Static);

        let instance = loader.instantiate(&unit, 3).unwrap();
        assert_eq!(instance.module_id(), "engine.render.mesh");
        assert_eq!(instance.generation(), 3);
        assert_eq!(instance.state(), LifecycleState::Unloaded);
        instance.destroy();
    }

    #[test]
    fn test_abi_mismatch_checked_before_create() {
        let loader = ModuleLoader::default();
        let unit = ModuleUnit::new(
            descriptor("future"),
            crate::module_entry_points!(FutureModule, Version::new(2, 0, 0)),
        );

        match loader.instantiate(&unit, 0) {
            Err(Error::AbiVersionMismatch { module, built, host }) => {
                assert_eq!(module, "future");
                assert_eq!(built, "2.0.0");
                assert_eq!(host, "1.0.0");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(FUTURE_BUILT.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_relaxed_abi_check_matches_major_only() {
        let host = Version::new(1, 4, 0);
        let unit = ModuleUnit::new(
            descriptor("older-minor"),
            crate::module_entry_points!(Counted, Version::new(1, 2, 0)),
        );

        let strict = ModuleLoader::new(LoaderConfig::new().with_host_abi_version(host));
        assert!(strict.check_abi(&unit).is_err());

        let relaxed = ModuleLoader::new(
            LoaderConfig::new()
                .with_host_abi_version(host)
                .with_strict_abi_check(false),
        );
        assert!(relaxed.check_abi(&unit).is_ok());
    }

    #[test]
    fn test_null_instance_is_load_failure() {
        let loader = ModuleLoader::default();
        let unit = ModuleUnit::new(descriptor("refuses"), crate::module_entry_points!(Refuses));

        let err = loader.instantiate(&unit, 0).unwrap_err();
        assert!(err.is_load_error());
        assert!(err.to_string().starts_with("module could not be loaded"));
    }

    #[test]
    fn test_library_path() {
        let loader = ModuleLoader::new(
            LoaderConfig::new()
                .with_base_path("/opt/modules")
                .with_library_extension("so"),
        );

        let path = loader.library_path("lighting");
        assert_eq!(
            path,
            PathBuf::from(format!("/opt/modules/{}lighting.so", std::env::consts::DLL_PREFIX))
        );
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn test_missing_library_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(LoaderConfig::new().with_base_path(dir.path()));

        let err = loader
            .load_library("does-not-exist.so", descriptor("ghost"))
            .unwrap_err();
        assert!(matches!(err, Error::LoadFailed(_)));
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn test_non_library_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        std::fs::write(&path, b"not a shared object").unwrap();

        let err = ModuleLoader::default()
            .load_library(&path, descriptor("garbage"))
            .unwrap_err();
        assert!(matches!(err, Error::LoadFailed(_)));
    }

    #[cfg(feature = "dynamic")]
    #[test]
    fn test_manifest_libraries_resolve_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(LoaderConfig::new().with_base_path(dir.path()));
        let manifest = ModuleManifest::new(vec![descriptor("engine.render.mesh")]);

        match loader.load_manifest(&manifest) {
            Err(Error::LoadFailed(message)) => assert!(message.contains("engine.render.mesh")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
