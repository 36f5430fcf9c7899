//! Desired-state catalog compilation.
//!
//! [`compile`] turns OS facts and parameters into an ordered list of
//! resources. Nothing is touched here; [`crate::converge`] applies the result.

use crate::config::SecurityConfig;
use crate::error::Result;
use crate::module::{declare_modules, ModuleDeclaration};
use crate::platform::{resolve, OsFacts, PlatformProfile};
use crate::render::{render_crs_conf, render_custom_rules, render_security_conf};
use crate::rules::{plan_links, ActivatedRuleLink};
use std::fmt;
use std::path::{Path, PathBuf};

/// Mode of generated files.
pub const FILE_MODE: u32 = 0o644;

/// A single piece of desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// An OS package that must be installed.
    Package {
        /// Package name.
        name: String,
    },
    /// An Apache module that must be loaded (handled by the module layer).
    Module(ModuleDeclaration),
    /// A directory with ownership and mode.
    Directory {
        /// Absolute path.
        path: PathBuf,
        /// Owning user.
        owner: String,
        /// Owning group.
        group: String,
        /// Permission bits.
        mode: u32,
    },
    /// A file with exact content.
    File {
        /// Absolute path.
        path: PathBuf,
        /// Full file content.
        content: String,
        /// Permission bits.
        mode: u32,
    },
    /// An activated rule link.
    Link(ActivatedRuleLink),
}

impl Resource {
    /// Path managed by this resource, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Resource::Directory { path, .. } | Resource::File { path, .. } => Some(path),
            Resource::Link(link) => Some(&link.link_path),
            Resource::Package { .. } | Resource::Module(_) => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Package { name } => write!(f, "package[{}]", name),
            Resource::Module(module) => write!(f, "module[{}]", module.name),
            Resource::Directory { path, .. } => write!(f, "directory[{}]", path.display()),
            Resource::File { path, .. } => write!(f, "file[{}]", path.display()),
            Resource::Link(link) => write!(f, "link[{}]", link.link_path.display()),
        }
    }
}

/// Ordered resources plus anything the caller should be told about.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Profile the catalog was compiled for.
    pub profile: PlatformProfile,
    /// Resources in application order.
    pub resources: Vec<Resource>,
    /// Parameters that were accepted but had no effect.
    pub warnings: Vec<String>,
}

impl Catalog {
    /// Content of the file resource at `path`.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<&str> {
        let path = path.as_ref();
        self.resources.iter().find_map(|r| match r {
            Resource::File { path: p, content, .. } if p == path => Some(content.as_str()),
            _ => None,
        })
    }

    /// The resource managing `path`, if any.
    pub fn resource_at(&self, path: impl AsRef<Path>) -> Option<&Resource> {
        let path = path.as_ref();
        self.resources.iter().find(|r| r.path() == Some(path))
    }

    /// Activated rule links.
    pub fn links(&self) -> impl Iterator<Item = &ActivatedRuleLink> {
        self.resources.iter().filter_map(|r| match r {
            Resource::Link(link) => Some(link),
            _ => None,
        })
    }

    /// Declared packages.
    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().filter_map(|r| match r {
            Resource::Package { name } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Declared modules.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDeclaration> {
        self.resources.iter().filter_map(|r| match r {
            Resource::Module(module) => Some(module),
            _ => None,
        })
    }
}

/// Resolve the platform and compile the catalog.
pub fn compile(facts: &OsFacts, config: &SecurityConfig) -> Result<Catalog> {
    let profile = profile_for(facts, config)?;
    compile_for(profile, config)
}

/// Resolve the platform profile with the parameter overrides applied.
pub fn profile_for(facts: &OsFacts, config: &SecurityConfig) -> Result<PlatformProfile> {
    let mut profile = resolve(facts)?;
    if let Some(version) = config.version {
        profile = profile.with_module_version(version);
    }
    if let Some(dir) = &config.modsec_dir {
        profile = profile.with_modsec_dir(dir);
    }
    if let Some(package) = &config.crs_package {
        profile = profile.with_package_name(package);
    }
    Ok(profile)
}

/// Compile the catalog for an already resolved profile.
///
/// Parameters are validated first; nothing is rendered from invalid input.
pub fn compile_for(profile: PlatformProfile, config: &SecurityConfig) -> Result<Catalog> {
    config.validate()?;

    let mut resources = Vec::new();
    let mut warnings = Vec::new();

    if config.manage_security_crs {
        resources.push(Resource::Package {
            name: profile.package_name.clone(),
        });
    }

    resources.extend(declare_modules(&profile).into_iter().map(Resource::Module));

    resources.push(Resource::Directory {
        path: profile.modsec_dir.clone(),
        owner: profile.owner.clone(),
        group: profile.group.clone(),
        mode: profile.mode,
    });
    resources.push(Resource::Directory {
        path: profile.activated_rules_dir.clone(),
        owner: profile.service_user.clone(),
        group: profile.service_group.clone(),
        mode: profile.mode,
    });
    if config.custom_rules {
        resources.push(Resource::Directory {
            path: profile.custom_rules_dir.clone(),
            owner: profile.service_user.clone(),
            group: profile.service_group.clone(),
            mode: profile.mode,
        });
    }

    let links = plan_links(&profile, config)?;
    if !profile.rule_linking {
        if let Some(rules) = config.activated_rules.as_ref().filter(|r| !r.is_empty()) {
            let message = format!(
                concat!(
                    "activated_rules ({} entries) ignored: ",
                    "{} {} activates Core Rule Set rules through its package"
                ),
                rules.len(),
                profile.os_family,
                profile.os_release_major
            );
            tracing::warn!(entries = rules.len(), "{}", message);
            warnings.push(message);
        }
    }

    resources.push(Resource::File {
        path: profile.config_path(),
        content: render_security_conf(&profile, config, &links)?,
        mode: FILE_MODE,
    });
    if config.manage_security_crs {
        resources.push(Resource::File {
            path: profile.crs_config_path(),
            content: render_crs_conf(&profile, config),
            mode: FILE_MODE,
        });
    }

    resources.extend(links.into_iter().map(Resource::Link));

    if config.custom_rules {
        resources.push(Resource::File {
            path: profile.custom_rules_path(),
            content: render_custom_rules(config),
            mode: FILE_MODE,
        });
    }

    tracing::info!(
        family = %profile.os_family,
        resources = resources.len(),
        warnings = warnings.len(),
        "compiled catalog"
    );

    Ok(Catalog {
        profile,
        resources,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditLogType;
    use crate::platform::ModuleVersion;

    fn redhat8() -> OsFacts {
        OsFacts::new("RedHat", "RedHat", "8")
    }

    #[test]
    fn test_redhat_8_catalog() {
        let catalog = compile(&redhat8(), &SecurityConfig::default()).unwrap();

        assert_eq!(catalog.packages().collect::<Vec<_>>(), vec!["mod_security_crs"]);
        let config = catalog
            .file("/etc/httpd/conf.modules.d/security.conf")
            .unwrap();
        assert!(config.contains("  SecAuditLogParts ABIJDEFHZ\n"));

        match catalog
            .resource_at("/etc/httpd/modsecurity.d/activated_rules")
            .unwrap()
        {
            Resource::Directory { owner, group, .. } => {
                assert_eq!(owner, "apache");
                assert_eq!(group, "apache");
            }
            other => panic!("expected directory, got {}", other),
        }
        match catalog.resource_at("/etc/httpd/modsecurity.d").unwrap() {
            Resource::Directory { owner, group, mode, .. } => {
                assert_eq!(owner, "root");
                assert_eq!(group, "root");
                assert_eq!(*mode, 0o755);
            }
            other => panic!("expected directory, got {}", other),
        }

        assert!(catalog
            .file("/etc/httpd/modsecurity.d/security_crs.conf")
            .is_some());
        let bad_robots = catalog
            .resource_at("/etc/httpd/modsecurity.d/activated_rules/modsecurity_35_bad_robots.data")
            .unwrap();
        assert!(matches!(bad_robots, Resource::Link(_)));
        assert!(catalog.warnings.is_empty());
    }

    #[test]
    fn test_package_precedes_links_and_directories_precede_files() {
        let catalog = compile(&redhat8(), &SecurityConfig::default()).unwrap();
        let first_link = catalog
            .resources
            .iter()
            .position(|r| matches!(r, Resource::Link(_)))
            .unwrap();
        let package = catalog
            .resources
            .iter()
            .position(|r| matches!(r, Resource::Package { .. }))
            .unwrap();
        let last_dir = catalog
            .resources
            .iter()
            .rposition(|r| matches!(r, Resource::Directory { .. }))
            .unwrap();
        let first_file = catalog
            .resources
            .iter()
            .position(|r| matches!(r, Resource::File { .. }))
            .unwrap();
        assert!(package < first_link);
        assert!(last_dir < first_file);
    }

    #[test]
    fn test_unmanaged_crs() {
        let config = SecurityConfig {
            manage_security_crs: false,
            ..Default::default()
        };
        let catalog = compile(&redhat8(), &config).unwrap();
        assert_eq!(catalog.packages().count(), 0);
        assert!(catalog
            .file("/etc/httpd/modsecurity.d/security_crs.conf")
            .is_none());
    }

    #[test]
    fn test_custom_rules_toggle() {
        let catalog = compile(&redhat8(), &SecurityConfig::default()).unwrap();
        assert!(catalog
            .resource_at("/etc/httpd/modsecurity.d/custom_rules/custom_01_rules.conf")
            .is_none());
        assert!(catalog
            .resource_at("/etc/httpd/modsecurity.d/custom_rules")
            .is_none());

        let config = SecurityConfig {
            custom_rules: true,
            custom_rules_set: vec![
                r#"REMOTE_ADDR "^127.0.0.1" "id:199999,phase:1,nolog,allow,ctl:ruleEngine=off""#
                    .to_string(),
            ],
            ..Default::default()
        };
        let catalog = compile(&OsFacts::new("Debian", "Debian", "11"), &config).unwrap();
        match catalog.resource_at("/etc/modsecurity/custom_rules").unwrap() {
            Resource::Directory { owner, group, .. } => {
                assert_eq!(owner, "www-data");
                assert_eq!(group, "www-data");
            }
            other => panic!("expected directory, got {}", other),
        }
        let content = catalog
            .file("/etc/modsecurity/custom_rules/custom_01_rules.conf")
            .unwrap();
        assert!(content.ends_with("\"id:199999,phase:1,nolog,allow,ctl:ruleEngine=off\"\n"));
    }

    #[test]
    fn test_debian_version_2() {
        let config = SecurityConfig {
            version: Some(ModuleVersion::V2),
            ..Default::default()
        };
        let catalog = compile(&OsFacts::new("Debian", "Debian", "10"), &config).unwrap();
        assert!(catalog
            .file("/etc/apache2/mods-available/security2.conf")
            .is_some());
        assert!(catalog.modules().any(|m| m.name == "security2"));
        assert_eq!(catalog.packages().collect::<Vec<_>>(), vec!["modsecurity-crs"]);
    }

    #[test]
    fn test_self_managed_debian_warns_on_activated_rules() {
        let config = SecurityConfig {
            activated_rules: Some(vec!["/tmp/foo/bar.conf".to_string()]),
            ..Default::default()
        };
        let catalog = compile(&OsFacts::new("Debian", "Ubuntu", "20.04"), &config).unwrap();
        assert_eq!(catalog.links().count(), 0);
        assert_eq!(catalog.warnings.len(), 1);
        assert!(catalog.warnings[0].contains("activated_rules"));

        let focal = OsFacts::new("Debian", "Ubuntu", "20.04");
        let catalog = compile(&focal, &SecurityConfig::default()).unwrap();
        assert!(catalog.warnings.is_empty());
    }

    #[test]
    fn test_concurrent_without_storage_dir() {
        let config = SecurityConfig {
            audit_log_type: AuditLogType::Concurrent,
            ..Default::default()
        };
        assert!(compile(&redhat8(), &config).unwrap_err().is_validation());
    }

    #[test]
    fn test_overrides() {
        let config = SecurityConfig {
            modsec_dir: Some(PathBuf::from("/srv/modsec")),
            crs_package: Some("owasp-crs".to_string()),
            ..Default::default()
        };
        let catalog = compile(&redhat8(), &config).unwrap();
        assert_eq!(catalog.packages().collect::<Vec<_>>(), vec!["owasp-crs"]);
        assert!(catalog.file("/srv/modsec/security_crs.conf").is_some());
        assert!(catalog
            .links()
            .all(|l| l.link_path.starts_with("/srv/modsec/activated_rules")));
    }

    #[test]
    fn test_compile_for_validates_parameters() {
        let profile = resolve(&redhat8()).unwrap();
        let config = SecurityConfig {
            default_action: "deny\nSecRuleEngine Off".to_string(),
            ..Default::default()
        };
        let err = compile_for(profile, &config).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Validation { ref field, .. } if field == "secdefaultaction"
        ));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = compile(&redhat8(), &SecurityConfig::default()).unwrap();
        let b = compile(&redhat8(), &SecurityConfig::default()).unwrap();
        assert_eq!(a.resources, b.resources);
    }
}
