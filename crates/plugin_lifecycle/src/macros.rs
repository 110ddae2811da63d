/// Export a plugin catalog from a `cdylib`.
///
/// Generates the two symbols the host's loader looks for:
/// `plugin_abi_version` and `plugin_catalog`.
///
/// # Example
///
/// ```rust,ignore
/// use plugin_lifecycle::{declare_plugins, DeclarationMetadata, PluginDeclaration};
///
/// declare_plugins! {
///     catalog = "vendors",
///     version = env!("CARGO_PKG_VERSION");
///     PluginDeclaration::service::<VendorService>(DeclarationMetadata::service()),
///     PluginDeclaration::module::<VendorRestock>(DeclarationMetadata::module().enabled(true)),
/// }
/// ```
#[macro_export]
macro_rules! declare_plugins {
    (catalog = $name:expr, version = $version:expr; $($declaration:expr),* $(,)?) => {
        /// Plugin ABI this library was built against.
        #[no_mangle]
        pub extern "C" fn plugin_abi_version() -> u32 {
            $crate::PLUGIN_ABI_VERSION
        }

        /// Builds this library's catalog. Returns null if construction
        /// panicked; the host owns the returned box.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn plugin_catalog() -> *mut $crate::Catalog {
            // Panics must not unwind across the FFI boundary.
            match ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                $crate::Catalog::new($name, $version)$(.with($declaration))*
            })) {
                Ok(catalog) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(catalog)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
