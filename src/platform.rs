//! Platform resolution.
//!
//! Every OS-specific decision is made here, once, and captured in a
//! [`PlatformProfile`]. Renderers and the rule activator only ever read the
//! profile; they never look at raw OS facts.

use crate::error::{Error, Result};
use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Supported OS families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    /// RedHat, CentOS, Rocky, Alma, Oracle Linux...
    RedHat,
    /// Debian, Ubuntu and derivatives.
    Debian,
}

impl OsFamily {
    /// Parse a family fact (case-insensitive).
    pub fn from_fact(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "redhat" => Some(Self::RedHat),
            "debian" => Some(Self::Debian),
            _ => None,
        }
    }

    /// Canonical fact spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedHat => "RedHat",
            Self::Debian => "Debian",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ModSecurity module generation requested by the caller.
///
/// Only changes how the Apache module is named (`security` vs `security2`)
/// and, on Debian, the config file name. Both load `mod_security2.so`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ModuleVersion {
    /// `security` module, `security.conf`.
    #[default]
    V1,
    /// `security2` module, `security2.conf` on Debian.
    V2,
}

impl ModuleVersion {
    /// Numeric major version.
    pub fn number(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl TryFrom<u8> for ModuleVersion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(Error::validation(
                "version",
                format!("expected 1 or 2, got {}", other),
            )),
        }
    }
}

impl From<ModuleVersion> for u8 {
    fn from(version: ModuleVersion) -> Self {
        version.number()
    }
}

/// Apache generation, which decides between `Include` and `IncludeOptional`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApacheVersion {
    /// Apache 2.2 (no `IncludeOptional`).
    V2_2,
    /// Apache 2.4.
    V2_4,
}

impl ApacheVersion {
    /// Directive used to include a glob or file that may be absent.
    pub fn include_directive(&self) -> &'static str {
        match self {
            Self::V2_2 => "Include",
            Self::V2_4 => "IncludeOptional",
        }
    }
}

/// Raw OS facts as reported by the fact collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsFacts {
    /// OS family (`RedHat` or `Debian`).
    pub family: String,
    /// Distribution name (`Ubuntu`, `Debian`, `CentOS`...).
    pub name: String,
    /// Major release, e.g. `8` or `22.04`.
    pub release_major: String,
}

impl OsFacts {
    /// Build facts from borrowed strings.
    pub fn new(family: &str, name: &str, release_major: &str) -> Self {
        Self {
            family: family.to_string(),
            name: name.to_string(),
            release_major: release_major.to_string(),
        }
    }

    /// Leading integer of the release fact (`"22.04"` -> 22).
    pub fn release_number(&self) -> Option<u32> {
        let digits: String = self
            .release_major
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }
}

/// Release cut-offs for Debian-family distributions.
struct DebianRelease {
    /// Releases below this ship CRS 2.x `base_rules` that we link ourselves.
    rule_linking_before: u32,
    /// First release shipping Apache 2.4.
    apache24_since: u32,
}

static DEBIAN_RELEASES: phf::Map<&'static str, DebianRelease> = phf_map! {
    "debian" => DebianRelease { rule_linking_before: 9, apache24_since: 8 },
    "ubuntu" => DebianRelease { rule_linking_before: 18, apache24_since: 14 },
};

/// CRS 2.x base rules activated by default on link-managed platforms.
pub const DEFAULT_ACTIVATED_RULES: &[&str] = &[
    "base_rules/modsecurity_35_bad_robots.data",
    "base_rules/modsecurity_35_scanners.data",
    "base_rules/modsecurity_40_generic_attacks.data",
    "base_rules/modsecurity_50_outbound.data",
    "base_rules/modsecurity_50_outbound_malware.data",
    "base_rules/modsecurity_crs_20_protocol_violations.conf",
    "base_rules/modsecurity_crs_21_protocol_anomalies.conf",
    "base_rules/modsecurity_crs_23_request_limits.conf",
    "base_rules/modsecurity_crs_30_http_policy.conf",
    "base_rules/modsecurity_crs_35_bad_robots.conf",
    "base_rules/modsecurity_crs_40_generic_attacks.conf",
    "base_rules/modsecurity_crs_41_sql_injection_attacks.conf",
    "base_rules/modsecurity_crs_41_xss_attacks.conf",
    "base_rules/modsecurity_crs_42_tight_security.conf",
    "base_rules/modsecurity_crs_45_trojans.conf",
    "base_rules/modsecurity_crs_47_common_exceptions.conf",
    "base_rules/modsecurity_crs_49_inbound_blocking.conf",
    "base_rules/modsecurity_crs_50_outbound.conf",
    "base_rules/modsecurity_crs_59_outbound_blocking.conf",
    "base_rules/modsecurity_crs_60_correlation.conf",
];

/// Everything downstream components need to know about the target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    /// OS family.
    pub os_family: OsFamily,
    /// Major OS release.
    pub os_release_major: u32,
    /// Requested module generation.
    pub module_version: ModuleVersion,
    /// Apache generation.
    pub apache_version: ApacheVersion,
    /// Directory holding the main ModSecurity config.
    pub config_dir: PathBuf,
    /// Main config file name.
    pub config_filename: String,
    /// Whether modules are loaded through `mods-available/*.load` files.
    pub uses_load_files: bool,
    /// Directory (or ServerRoot-relative path) holding module libraries.
    pub module_lib_dir: PathBuf,
    /// CRS package name.
    pub package_name: String,
    /// ModSecurity base data directory.
    pub modsec_dir: PathBuf,
    /// Where bundled base rules are found.
    pub base_rules_source_dir: PathBuf,
    /// Whether activated rules are linked by us.
    pub rule_linking: bool,
    /// Directory receiving activated-rule links.
    pub activated_rules_dir: PathBuf,
    /// Directory receiving the custom rule file.
    pub custom_rules_dir: PathBuf,
    /// Apache log directory.
    pub log_dir: PathBuf,
    /// ModSecurity tmp/data/upload directory.
    pub state_dir: PathBuf,
    /// Owner of `modsec_dir`.
    pub owner: String,
    /// Group of `modsec_dir`.
    pub group: String,
    /// Apache service account owning the rule directories.
    pub service_user: String,
    /// Apache service group owning the rule directories.
    pub service_group: String,
    /// Mode of managed directories.
    pub mode: u32,
    /// Activated rules used when the caller does not supply any.
    pub default_activated_rules: &'static [&'static str],
    /// Loader shipped by a package that activates the bundled rules itself.
    pub bundled_rules_include: Option<PathBuf>,
}

/// Resolve the platform profile from OS facts.
pub fn resolve(facts: &OsFacts) -> Result<PlatformProfile> {
    let family = OsFamily::from_fact(&facts.family).ok_or_else(|| Error::UnsupportedPlatform {
        message: format!("unknown OS family '{}'", facts.family),
    })?;
    let release = facts.release_number().ok_or_else(|| Error::UnsupportedPlatform {
        message: format!("unparseable major release '{}'", facts.release_major),
    })?;

    let profile = match family {
        OsFamily::RedHat => redhat_profile(release),
        OsFamily::Debian => debian_profile(&facts.name, release),
    };

    tracing::debug!(
        family = %profile.os_family,
        release = profile.os_release_major,
        rule_linking = profile.rule_linking,
        "resolved platform profile"
    );

    Ok(profile)
}

fn redhat_profile(release: u32) -> PlatformProfile {
    let modsec_dir = PathBuf::from("/etc/httpd/modsecurity.d");
    let config_dir = if release > 6 {
        "/etc/httpd/conf.modules.d"
    } else {
        "/etc/httpd/conf.d"
    };

    PlatformProfile {
        os_family: OsFamily::RedHat,
        os_release_major: release,
        module_version: ModuleVersion::default(),
        apache_version: if release > 6 {
            ApacheVersion::V2_4
        } else {
            ApacheVersion::V2_2
        },
        config_dir: PathBuf::from(config_dir),
        config_filename: "security.conf".to_string(),
        uses_load_files: false,
        module_lib_dir: PathBuf::from("modules"),
        package_name: "mod_security_crs".to_string(),
        base_rules_source_dir: PathBuf::from("/usr/lib/modsecurity.d"),
        rule_linking: true,
        activated_rules_dir: modsec_dir.join("activated_rules"),
        custom_rules_dir: modsec_dir.join("custom_rules"),
        modsec_dir,
        log_dir: PathBuf::from("/var/log/httpd"),
        state_dir: PathBuf::from("/var/lib/mod_security"),
        owner: "root".to_string(),
        group: "root".to_string(),
        service_user: "apache".to_string(),
        service_group: "apache".to_string(),
        mode: 0o755,
        default_activated_rules: DEFAULT_ACTIVATED_RULES,
        bundled_rules_include: None,
    }
}

fn debian_profile(name: &str, release: u32) -> PlatformProfile {
    let modsec_dir = PathBuf::from("/etc/modsecurity");
    let cutoffs = DEBIAN_RELEASES.get(name.to_ascii_lowercase().as_str());

    // Unknown derivatives are treated as current releases.
    let rule_linking = cutoffs.is_some_and(|c| release < c.rule_linking_before);
    let apache24 = cutoffs.map_or(true, |c| release >= c.apache24_since);

    PlatformProfile {
        os_family: OsFamily::Debian,
        os_release_major: release,
        module_version: ModuleVersion::default(),
        apache_version: if apache24 {
            ApacheVersion::V2_4
        } else {
            ApacheVersion::V2_2
        },
        config_dir: PathBuf::from("/etc/apache2/mods-available"),
        config_filename: "security.conf".to_string(),
        uses_load_files: true,
        module_lib_dir: PathBuf::from("/usr/lib/apache2/modules"),
        package_name: "modsecurity-crs".to_string(),
        base_rules_source_dir: PathBuf::from("/usr/share/modsecurity-crs"),
        rule_linking,
        activated_rules_dir: modsec_dir.join("activated_rules"),
        custom_rules_dir: modsec_dir.join("custom_rules"),
        modsec_dir,
        log_dir: PathBuf::from("/var/log/apache2"),
        state_dir: PathBuf::from("/var/cache/modsecurity"),
        owner: "root".to_string(),
        group: "root".to_string(),
        service_user: "www-data".to_string(),
        service_group: "www-data".to_string(),
        mode: 0o755,
        default_activated_rules: if rule_linking {
            DEFAULT_ACTIVATED_RULES
        } else {
            &[]
        },
        bundled_rules_include: if rule_linking {
            None
        } else {
            Some(PathBuf::from("/usr/share/modsecurity-crs/owasp-crs.load"))
        },
    }
}

impl PlatformProfile {
    /// Apply the requested module generation.
    pub fn with_module_version(mut self, version: ModuleVersion) -> Self {
        self.module_version = version;
        if self.os_family == OsFamily::Debian {
            self.config_filename = match version {
                ModuleVersion::V1 => "security.conf".to_string(),
                ModuleVersion::V2 => "security2.conf".to_string(),
            };
        }
        self
    }

    /// Relocate the ModSecurity base directory and its rule subdirectories.
    pub fn with_modsec_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.activated_rules_dir = dir.join("activated_rules");
        self.custom_rules_dir = dir.join("custom_rules");
        self.modsec_dir = dir;
        self
    }

    /// Override the CRS package name.
    pub fn with_package_name(mut self, name: impl Into<String>) -> Self {
        self.package_name = name.into();
        self
    }

    /// Full path of the main config file.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(&self.config_filename)
    }

    /// Full path of the CRS inclusion file (a sibling of the activated-rules directory).
    pub fn crs_config_path(&self) -> PathBuf {
        self.activated_rules_dir
            .parent()
            .unwrap_or(Path::new("/"))
            .join("security_crs.conf")
    }

    /// Full path of the custom rule file.
    pub fn custom_rules_path(&self) -> PathBuf {
        self.custom_rules_dir.join("custom_01_rules.conf")
    }

    /// Apache module name for the requested generation.
    pub fn module_name(&self) -> &'static str {
        match self.module_version {
            ModuleVersion::V1 => "security",
            ModuleVersion::V2 => "security2",
        }
    }
}
