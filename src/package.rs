//! OS package management seam.

use crate::error::{Error, Result};
use crate::platform::OsFamily;
use std::process::Command;

/// Queries and installs OS packages.
pub trait PackageManager {
    /// Whether `name` is installed.
    fn is_installed(&self, name: &str) -> Result<bool>;

    /// Install `name`.
    fn install(&mut self, name: &str) -> Result<()>;
}

/// The host's package tool: rpm/yum on RedHat, dpkg/apt-get on Debian.
#[derive(Debug, Clone, Copy)]
pub struct SystemPackageManager {
    family: OsFamily,
}

impl SystemPackageManager {
    /// Package manager for the given OS family.
    pub fn new(family: OsFamily) -> Self {
        Self { family }
    }

    fn run(&self, package: &str, program: &str, args: &[&str]) -> Result<std::process::Output> {
        tracing::debug!(program, ?args, "running package tool");
        Command::new(program)
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .output()
            .map_err(|e| Error::PackageInstall {
                package: package.to_string(),
                message: format!("cannot run {}: {}", program, e),
            })
    }
}

impl PackageManager for SystemPackageManager {
    fn is_installed(&self, name: &str) -> Result<bool> {
        let output = match self.family {
            OsFamily::RedHat => self.run(name, "rpm", &["-q", name])?,
            OsFamily::Debian => {
                self.run(name, "dpkg-query", &["-W", "-f=${Status}", name])?
            }
        };

        Ok(match self.family {
            OsFamily::RedHat => output.status.success(),
            OsFamily::Debian => {
                output.status.success()
                    && String::from_utf8_lossy(&output.stdout).contains("install ok installed")
            }
        })
    }

    fn install(&mut self, name: &str) -> Result<()> {
        let output = match self.family {
            OsFamily::RedHat => self.run(name, "yum", &["install", "-y", name])?,
            OsFamily::Debian => self.run(name, "apt-get", &["install", "-y", name])?,
        };

        if !output.status.success() {
            return Err(Error::PackageInstall {
                package: name.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!(package = name, "installed package");
        Ok(())
    }
}
