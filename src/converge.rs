//! Catalog convergence.
//!
//! Applies each catalog resource under a root directory (`/` in production,
//! a staging directory in tests). Every resource is an "ensure" with three
//! results: created, repaired, or already correct. The first failure aborts
//! the run.

use crate::catalog::{Catalog, Resource};
use crate::error::{Error, Result};
use crate::package::PackageManager;
use crate::rules::ActivatedRuleLink;
use nix::unistd::{chown, Group, User};
use std::fmt;
use std::fs::{self, Metadata};
use std::io::{self, ErrorKind};
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// What converging one resource did (or would do, in dry-run mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Resource was absent and has been created.
    Created,
    /// Resource existed in the wrong state and has been repaired.
    Updated,
    /// Resource was already correct.
    Unchanged,
    /// Package has been installed.
    Installed,
    /// Left to the module-management layer.
    Delegated,
    /// Not applied (no package manager configured).
    Skipped,
}

impl Outcome {
    /// Whether the resource was (or would be) modified.
    pub fn is_change(&self) -> bool {
        matches!(self, Outcome::Created | Outcome::Updated | Outcome::Installed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Installed => "installed",
            Outcome::Delegated => "delegated",
            Outcome::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Outcome for a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Resource label, e.g. `file[/etc/modsecurity/security_crs.conf]`.
    pub resource: String,
    /// What happened.
    pub outcome: Outcome,
}

/// Result of a convergence run.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// One entry per resource, in catalog order.
    pub changes: Vec<Change>,
}

impl Report {
    /// Number of modified resources.
    pub fn changed(&self) -> usize {
        self.changes.iter().filter(|c| c.outcome.is_change()).count()
    }

    /// Whether the run found everything already in place.
    pub fn is_converged(&self) -> bool {
        self.changed() == 0
    }

    /// Outcome recorded for a resource label.
    pub fn outcome_of(&self, resource: &str) -> Option<Outcome> {
        self.changes
            .iter()
            .find(|c| c.resource == resource)
            .map(|c| c.outcome)
    }
}

/// Applies catalogs to a filesystem root.
pub struct Converger<'a> {
    root: PathBuf,
    packages: Option<&'a mut dyn PackageManager>,
    dry_run: bool,
    manage_ownership: bool,
}

impl<'a> Converger<'a> {
    /// Converger writing under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            packages: None,
            dry_run: false,
            manage_ownership: false,
        }
    }

    /// Install declared packages through `packages`.
    pub fn with_packages(mut self, packages: &'a mut dyn PackageManager) -> Self {
        self.packages = Some(packages);
        self
    }

    /// Report what would change without touching anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Apply directory owners and groups (requires privileges).
    pub fn manage_ownership(mut self, manage: bool) -> Self {
        self.manage_ownership = manage;
        self
    }

    /// Converge every resource of the catalog, in order.
    pub fn apply(&mut self, catalog: &Catalog) -> Result<Report> {
        let mut report = Report::default();

        for resource in &catalog.resources {
            let outcome = self.apply_resource(resource)?;
            if outcome.is_change() {
                tracing::info!(%resource, %outcome, dry_run = self.dry_run, "resource changed");
            } else {
                tracing::debug!(%resource, %outcome, "resource in sync");
            }
            report.changes.push(Change {
                resource: resource.to_string(),
                outcome,
            });
        }

        tracing::info!(
            resources = report.changes.len(),
            changed = report.changed(),
            "convergence finished"
        );
        Ok(report)
    }

    fn apply_resource(&mut self, resource: &Resource) -> Result<Outcome> {
        match resource {
            Resource::Package { name } => self.ensure_package(name),
            Resource::Module(module) => {
                tracing::debug!(
                    load = %module.load_directive(),
                    "module load left to module management"
                );
                Ok(Outcome::Delegated)
            }
            Resource::Directory {
                path,
                owner,
                group,
                mode,
            } => self.ensure_directory(path, owner, group, *mode),
            Resource::File {
                path,
                content,
                mode,
            } => self.ensure_file(path, content, *mode),
            Resource::Link(link) => self.ensure_link(link),
        }
    }

    /// Map an absolute catalog path under the root.
    fn staged(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn ensure_package(&mut self, name: &str) -> Result<Outcome> {
        let dry_run = self.dry_run;
        let Some(packages) = self.packages.as_deref_mut() else {
            return Ok(Outcome::Skipped);
        };

        if packages.is_installed(name)? {
            return Ok(Outcome::Unchanged);
        }
        if !dry_run {
            packages.install(name)?;
        }
        Ok(Outcome::Installed)
    }

    fn ensure_directory(
        &self,
        path: &Path,
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<Outcome> {
        let staged = self.staged(path);

        let meta = match fs::symlink_metadata(&staged) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if !self.dry_run {
                    fs::create_dir_all(&staged).map_err(|e| Error::filesystem(path, e))?;
                    set_mode(&staged, path, mode)?;
                }
                self.ensure_ownership(&staged, None, owner, group)?;
                return Ok(Outcome::Created);
            }
            Err(e) => return Err(Error::filesystem(path, e)),
        };

        if !meta.is_dir() {
            return Err(Error::filesystem(
                path,
                io::Error::new(ErrorKind::AlreadyExists, "exists and is not a directory"),
            ));
        }

        let mut changed = false;
        if meta.permissions().mode() & 0o7777 != mode {
            if !self.dry_run {
                set_mode(&staged, path, mode)?;
            }
            changed = true;
        }
        changed |= self.ensure_ownership(&staged, Some(&meta), owner, group)?;

        Ok(if changed {
            Outcome::Updated
        } else {
            Outcome::Unchanged
        })
    }

    fn ensure_file(&self, path: &Path, content: &str, mode: u32) -> Result<Outcome> {
        let staged = self.staged(path);

        // A link at the managed path is replaced, never written through.
        let replace_link = match fs::symlink_metadata(&staged) {
            Ok(meta) if meta.file_type().is_symlink() => true,
            Ok(meta) if meta.is_dir() => {
                return Err(Error::filesystem(
                    path,
                    io::Error::new(ErrorKind::AlreadyExists, "directory in the way of the file"),
                ));
            }
            Ok(_) => false,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(Error::filesystem(path, e)),
        };

        let current = if replace_link {
            None
        } else {
            match fs::read(&staged) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => return Err(Error::filesystem(path, e)),
            }
        };

        let outcome = match &current {
            None if replace_link => {
                tracing::debug!(path = %path.display(), "replacing link with managed file");
                Outcome::Updated
            }
            None => Outcome::Created,
            Some(bytes) if bytes.as_slice() != content.as_bytes() => Outcome::Updated,
            Some(_) => {
                let meta = fs::metadata(&staged).map_err(|e| Error::filesystem(path, e))?;
                if meta.permissions().mode() & 0o7777 == mode {
                    return Ok(Outcome::Unchanged);
                }
                Outcome::Updated
            }
        };

        if self.dry_run {
            return Ok(outcome);
        }

        if let Some(parent) = staged.parent() {
            if !parent.exists() {
                tracing::debug!(dir = %parent.display(), "creating parent directory");
                fs::create_dir_all(parent).map_err(|e| Error::filesystem(path, e))?;
            }
        }
        if replace_link {
            fs::remove_file(&staged).map_err(|e| Error::filesystem(path, e))?;
        }
        fs::write(&staged, content).map_err(|e| Error::filesystem(path, e))?;
        set_mode(&staged, path, mode)?;

        Ok(outcome)
    }

    /// Ensure the link exists and points at its target: create, repair, or
    /// leave alone. Dangling targets are allowed.
    fn ensure_link(&self, link: &ActivatedRuleLink) -> Result<Outcome> {
        let path = link.link_path.as_path();
        let staged = self.staged(path);

        let outcome = match fs::symlink_metadata(&staged) {
            Err(e) if e.kind() == ErrorKind::NotFound => Outcome::Created,
            Err(e) => return Err(Error::filesystem(path, e)),
            Ok(meta) if meta.file_type().is_symlink() => {
                let current = fs::read_link(&staged).map_err(|e| Error::filesystem(path, e))?;
                if current == link.target_path {
                    return Ok(Outcome::Unchanged);
                }
                tracing::debug!(
                    link = %path.display(),
                    from = %current.display(),
                    to = %link.target_path.display(),
                    "repointing link"
                );
                Outcome::Updated
            }
            Ok(meta) if meta.is_dir() => {
                return Err(Error::filesystem(
                    path,
                    io::Error::new(ErrorKind::AlreadyExists, "directory in the way of the link"),
                ));
            }
            Ok(_) => Outcome::Updated,
        };

        if self.dry_run {
            return Ok(outcome);
        }

        if outcome == Outcome::Updated {
            fs::remove_file(&staged).map_err(|e| Error::filesystem(path, e))?;
        }
        symlink(&link.target_path, &staged).map_err(|e| Error::filesystem(path, e))?;

        Ok(outcome)
    }

    /// Returns whether ownership was (or would be) changed.
    fn ensure_ownership(
        &self,
        staged: &Path,
        meta: Option<&Metadata>,
        owner: &str,
        group: &str,
    ) -> Result<bool> {
        if !self.manage_ownership {
            return Ok(false);
        }

        let ownership_error = |message: String| Error::Ownership {
            path: staged.to_path_buf(),
            message,
        };

        let uid = User::from_name(owner)
            .map_err(|e| ownership_error(format!("user lookup for '{}' failed: {}", owner, e)))?
            .ok_or_else(|| ownership_error(format!("no such user '{}'", owner)))?
            .uid;
        let gid = Group::from_name(group)
            .map_err(|e| ownership_error(format!("group lookup for '{}' failed: {}", group, e)))?
            .ok_or_else(|| ownership_error(format!("no such group '{}'", group)))?
            .gid;

        if let Some(meta) = meta {
            if meta.uid() == uid.as_raw() && meta.gid() == gid.as_raw() {
                return Ok(false);
            }
        }

        if !self.dry_run {
            chown(staged, Some(uid), Some(gid))
                .map_err(|e| ownership_error(format!("chown {}:{} failed: {}", owner, group, e)))?;
        }
        Ok(true)
    }
}

fn set_mode(staged: &Path, path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(staged, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::filesystem(path, e))
}
