//! Apache module declarations.
//!
//! Loading modules is the job of the surrounding module-management layer;
//! this module only says which modules must be loaded and from which library.

use crate::platform::PlatformProfile;
use std::fmt;
use std::path::PathBuf;

/// A module that must be loaded by Apache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDeclaration {
    /// Name used for bookkeeping (`security`, `security2`, `unique_id_module`).
    pub name: String,
    /// Module identifier passed to `LoadModule`.
    pub id: String,
    /// Shared library file name.
    pub lib: String,
    /// Full library path as written in `LoadModule`.
    pub lib_path: PathBuf,
    /// `mods-available/<name>.load` on platforms using that convention.
    pub load_file: Option<PathBuf>,
}

impl ModuleDeclaration {
    fn new(profile: &PlatformProfile, name: &str, id: &str, lib: &str) -> Self {
        Self {
            name: name.to_string(),
            id: id.to_string(),
            lib: lib.to_string(),
            lib_path: profile.module_lib_dir.join(lib),
            load_file: profile
                .uses_load_files
                .then(|| profile.config_dir.join(format!("{}.load", name))),
        }
    }

    /// The `LoadModule` line for this module.
    pub fn load_directive(&self) -> String {
        format!("LoadModule {} {}", self.id, self.lib_path.display())
    }
}

impl fmt::Display for ModuleDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id, self.lib)
    }
}

/// Modules required by ModSecurity: the engine itself and `unique_id`.
pub fn declare_modules(profile: &PlatformProfile) -> Vec<ModuleDeclaration> {
    vec![
        ModuleDeclaration::new(
            profile,
            profile.module_name(),
            "security2_module",
            "mod_security2.so",
        ),
        ModuleDeclaration::new(
            profile,
            "unique_id_module",
            "unique_id_module",
            "mod_unique_id.so",
        ),
    ]
}
