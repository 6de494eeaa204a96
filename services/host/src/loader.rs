//! `libloading`-based implementation of [`Loader`] (spec.md §9 design
//! notes, option (b): modules are compiled to native `cdylib`s ahead of
//! time; this crate just `dlopen`s them and calls their exported
//! constructor).

use crate::module::{Loader, LoaderError, Module};
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The symbol every module `cdylib` must export:
/// `#[no_mangle] pub extern "C" fn apphost_module_new() -> *mut dyn Module`.
const CONSTRUCTOR_SYMBOL: &[u8] = b"apphost_module_new";

type ModuleConstructor = unsafe extern "C" fn() -> *mut dyn Module;

/// Loads modules from native shared libraries and keeps every opened
/// `Library` alive for the process lifetime, since a `Module` trait object
/// produced by one remains backed by that library's code.
pub struct DylibLoader {
    keep_alive: Mutex<Vec<Library>>,
}

impl Default for DylibLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DylibLoader {
    pub fn new() -> Self {
        Self {
            keep_alive: Mutex::new(Vec::new()),
        }
    }
}

impl Loader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Module>, LoaderError> {
        let path_str = path.display().to_string();
        // SAFETY: the module's compile step (out of scope here) is
        // responsible for producing a cdylib that upholds the
        // `apphost_module_new` ABI contract documented above.
        let library = unsafe { Library::new(path) }.map_err(|source| LoaderError::Open {
            path: path_str.clone(),
            source,
        })?;

        let constructor: Symbol<ModuleConstructor> = unsafe { library.get(CONSTRUCTOR_SYMBOL) }
            .map_err(|source| LoaderError::MissingSymbol {
                path: path_str.clone(),
                source,
            })?;

        // SAFETY: contract is that the symbol returns a freshly heap
        // allocated trait object the caller now owns.
        let raw = unsafe { constructor() };
        let module = unsafe { Box::from_raw(raw) };

        self.keep_alive.lock().expect("loader mutex poisoned").push(library);
        Ok(module)
    }
}

/// Resolves a module's path from an app's base directory, name, and
/// timestamp: `{base_dir}/{name}.{timestamp}.{so,dll,dylib}` (spec.md §3:
/// the timestamp strictly increases on re-init, so each re-`init` gets its
/// own file instead of overwriting the last one).
pub fn module_path(base_dir: &Path, name: &str, timestamp: u64) -> PathBuf {
    let ext = std::env::consts::DLL_EXTENSION;
    base_dir.join(format!("{name}.{timestamp}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_path_uses_platform_dll_extension_and_timestamp() {
        let path = module_path(Path::new("/apps"), "demo", 42);
        assert_eq!(
            path,
            Path::new("/apps").join(format!("demo.42.{}", std::env::consts::DLL_EXTENSION))
        );
    }
}
