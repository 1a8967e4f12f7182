//! The binary contract between the host and a module unit.
//!
//! Every unit exposes three entry points:
//!
//! - `create_module` returns a new, heap-owned instance (null on failure);
//! - `destroy_module` releases an instance returned by `create_module`;
//! - `query_module_api_version` reports the module ABI the unit was built
//!   against.
//!
//! Instances cross the boundary as an opaque [`RawModule`] pointer that wraps
//! a `Box<dyn Module>`. Both sides must therefore be built with the same
//! compiler and the same version of this crate; the ABI version query is the
//! host's only defence against a mismatched unit and is checked before
//! `create_module` is ever called.
//!
//! On the host side an instance is held as an [`OwnedModule`]. Destroying it
//! consumes the value, and dropping it runs `destroy_module` exactly once.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::lifecycle::Module;
use crate::version::Version;

/// Module ABI version of this host.
pub const MODULE_API_VERSION: Version = Version::new(1, 0, 0);

/// Symbol name of the create entry point.
pub const CREATE_MODULE_SYMBOL: &str = "create_module";

/// Symbol name of the destroy entry point.
pub const DESTROY_MODULE_SYMBOL: &str = "destroy_module";

/// Symbol name of the ABI version query entry point.
pub const QUERY_MODULE_API_VERSION_SYMBOL: &str = "query_module_api_version";

/// Opaque instance handle passed across the ABI.
#[repr(C)]
pub struct RawModule {
    _private: [u8; 0],
}

/// `create_module` signature.
pub type CreateModuleFn = unsafe extern "C" fn() -> *mut RawModule;

/// `destroy_module` signature.
pub type DestroyModuleFn = unsafe extern "C" fn(module: *mut RawModule);

/// `query_module_api_version` signature.
pub type QueryModuleApiVersionFn = extern "C" fn() -> Version;

/// Construct a module and hand ownership to the caller as a raw pointer.
///
/// Returns null if the constructor panics. Used by the code that
/// [`export_module!`](crate::export_module) generates.
pub fn create_with<M: Module + 'static>(ctor: fn() -> M) -> *mut RawModule {
    match panic::catch_unwind(ctor) {
        Ok(module) => {
            let boxed: Box<dyn Module> = Box::new(module);
            Box::into_raw(Box::new(boxed)) as *mut RawModule
        }
        Err(_) => std::ptr::null_mut(),
    }
}

/// Release a pointer produced by [`create_with`].
///
/// # Safety
///
/// `module` must be null or a pointer returned by [`create_with`] that has
/// not been released yet.
pub unsafe fn destroy_raw(module: *mut RawModule) {
    if module.is_null() {
        return;
    }

    // A panicking Drop must not unwind into the host.
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        drop(Box::from_raw(module as *mut Box<dyn Module>));
    }));
}

/// The three entry points of a module unit.
#[derive(Clone, Copy)]
pub struct ModuleEntryPoints {
    create: CreateModuleFn,
    destroy: DestroyModuleFn,
    query_api_version: QueryModuleApiVersionFn,
}

impl ModuleEntryPoints {
    /// Bundle entry points resolved by a loader or generated in-process.
    pub const fn new(
        create: CreateModuleFn,
        destroy: DestroyModuleFn,
        query_api_version: QueryModuleApiVersionFn,
    ) -> Self {
        Self {
            create,
            destroy,
            query_api_version,
        }
    }

    /// Ask the unit which module ABI it was built against.
    pub fn api_version(&self) -> Version {
        (self.query_api_version)()
    }

    /// Call `create_module`.
    ///
    /// Returns `None` when the unit hands back a null instance. `library`
    /// keeps the code backing the entry points mapped until the instance is
    /// destroyed.
    ///
    /// # Safety
    ///
    /// The caller must have checked [`api_version`](Self::api_version)
    /// against the host ABI.
    pub(crate) unsafe fn create(
        &self,
        library: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Option<OwnedModule> {
        let raw = (self.create)();
        NonNull::new(raw).map(|raw| OwnedModule {
            raw,
            destroy: self.destroy,
            _library: library,
        })
    }
}

impl std::fmt::Debug for ModuleEntryPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntryPoints")
            .field("api_version", &self.api_version())
            .finish()
    }
}

/// A module instance owned by the host.
///
/// Created only through [`ModuleEntryPoints`]; released through the unit's
/// `destroy_module`, either by [`destroy`](Self::destroy) or on drop.
pub struct OwnedModule {
    raw: NonNull<RawModule>,
    destroy: DestroyModuleFn,
    // Dropped after `Drop::drop` has run `destroy`.
    _library: Option<Arc<dyn Any + Send + Sync>>,
}

// SAFETY: `Module: Send`, and the instance is only reachable through
// `&mut self`, so shared references never touch it.
unsafe impl Send for OwnedModule {}
unsafe impl Sync for OwnedModule {}

impl OwnedModule {
    /// Borrow the instance's lifecycle interface.
    pub fn module_mut(&mut self) -> &mut dyn Module {
        // SAFETY: `raw` came from `create_with` on the other side of the
        // boundary and stays valid until `destroy` runs in `Drop`.
        unsafe { &mut **(self.raw.as_ptr() as *mut Box<dyn Module>) }
    }

    /// Release the instance through the unit's destroy entry point.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for OwnedModule {
    fn drop(&mut self) {
        // SAFETY: `raw` was produced by the matching `create` and this is
        // the only place it is released.
        unsafe { (self.destroy)(self.raw.as_ptr()) }
    }
}

impl std::fmt::Debug for OwnedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedModule")
            .field("raw", &self.raw)
            .field("library", &self._library.is_some())
            .finish()
    }
}

/// Export the ABI entry points for a module type from a `cdylib`.
///
/// The type must implement [`Module`](crate::Module) and `Default`. An
/// optional second argument overrides the reported ABI version.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Lighting;
///
/// impl module_host_runtime::Module for Lighting {}
///
/// module_host_runtime::export_module!(Lighting);
/// ```
#[macro_export]
macro_rules! export_module {
    ($module:ty) => {
        $crate::export_module!($module, $crate::MODULE_API_VERSION);
    };
    ($module:ty, $version:expr) => {
        #[no_mangle]
        pub unsafe extern "C" fn create_module() -> *mut $crate::abi::RawModule {
            $crate::abi::create_with::<$module>(<$module as ::std::default::Default>::default)
        }

        #[no_mangle]
        pub unsafe extern "C" fn destroy_module(module: *mut $crate::abi::RawModule) {
            $crate::abi::destroy_raw(module)
        }

        #[no_mangle]
        pub extern "C" fn query_module_api_version() -> $crate::Version {
            $version
        }
    };
}

/// Build [`ModuleEntryPoints`] for a module type linked into the host.
///
/// Same contract as [`export_module!`](crate::export_module) without
/// exporting symbols, so several modules can live in one binary.
#[macro_export]
macro_rules! module_entry_points {
    ($module:ty) => {
        $crate::module_entry_points!($module, $crate::MODULE_API_VERSION)
    };
    ($module:ty, $version:expr) => {{
        unsafe extern "C" fn create() -> *mut $crate::abi::RawModule {
            $crate::abi::create_with::<$module>(<$module as ::std::default::Default>::default)
        }

        unsafe extern "C" fn destroy(module: *mut $crate::abi::RawModule) {
            $crate::abi::destroy_raw(module)
        }

        extern "C" fn query() -> $crate::Version {
            $version
        }

        $crate::abi::ModuleEntryPoints::new(create, destroy, query)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static EVENTS: RefCell<Vec<&'static str>> = RefCell::new(Vec::new());
    }

    fn record(event: &'static str) {
        EVENTS.with(|e| e.borrow_mut().push(event));
    }

    fn take_events() -> Vec<&'static str> {
        EVENTS.with(|e| std::mem::take(&mut *e.borrow_mut()))
    }

    #[derive(Default)]
    struct Probe;

    impl Module for Probe {
        fn on_load(&mut self) -> crate::Result<()> {
            record("load");
            Ok(())
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            record("drop");
        }
    }

    struct Exploding;

    impl Module for Exploding {}

    impl Default for Exploding {
        fn default() -> Self {
            panic!("constructor failure");
        }
    }

    #[test]
    fn test_entry_points_report_version() {
        let entry = crate::module_entry_points!(Probe);
        assert_eq!(entry.api_version(), MODULE_API_VERSION);

        let entry = crate::module_entry_points!(Probe, Version::new(2, 1, 0));
        assert_eq!(entry.api_version(), Version::new(2, 1, 0));
    }

    #[test]
    fn test_owned_module_destroyed_once() {
        take_events();
        let entry = crate::module_entry_points!(Probe);

        let mut module = unsafe { entry.create(None) }.unwrap();
        module.module_mut().on_load().unwrap();
        module.destroy();

        assert_eq!(take_events(), vec!["load", "drop"]);
    }

    #[test]
    fn test_drop_releases_instance() {
        take_events();
        let entry = crate::module_entry_points!(Probe);
        {
            let _module = unsafe { entry.create(None) }.unwrap();
        }
        assert_eq!(take_events(), vec!["drop"]);
    }

    #[test]
    fn test_panicking_constructor_yields_null() {
        let entry = crate::module_entry_points!(Exploding);
        assert!(unsafe { entry.create(None) }.is_none());
    }

    #[test]
    fn test_destroy_null_is_noop() {
        unsafe { destroy_raw(std::ptr::null_mut()) };
    }
}
