//! # modsec-provision
//!
//! Desired-state provisioning of ModSecurity for Apache on RedHat and Debian
//! family hosts.
//!
//! The crate works in two stages. [`compile`] resolves the host's platform
//! conventions and turns the parameters into an ordered [`Catalog`] of
//! resources (package, modules, directories, files, rule links). A
//! [`Converger`] then applies the catalog under a filesystem root, creating,
//! repairing, or leaving alone each resource.
//!
//! ## Quick Start
//!
//! ```ignore
//! use modsec_provision::{compile, Converger, OsFacts, SecurityConfig};
//!
//! let facts = OsFacts::new("RedHat", "RedHat", "8");
//! let config = SecurityConfig::from_toml_str("custom_rules = true")?;
//! let catalog = compile(&facts, &config)?;
//!
//! let report = Converger::new("/").apply(&catalog)?;
//! println!("{} resources changed", report.changed());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod converge;
pub mod error;
pub mod module;
pub mod package;
pub mod parser;
pub mod platform;
pub mod render;
pub mod rules;

// Re-export main types at crate root
pub use catalog::{compile, Catalog, Resource};
pub use config::SecurityConfig;
pub use converge::{Converger, Outcome, Report};
pub use error::{Error, Result};
pub use package::{PackageManager, SystemPackageManager};
pub use platform::{resolve, OsFacts, OsFamily, PlatformProfile};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
