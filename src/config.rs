//! User-tunable ModSecurity parameters.
//!
//! [`SecurityConfig`] is the explicit parameter struct consumed by every
//! component. It can be built in code (`SecurityConfig::default()` and field
//! updates) or loaded from a TOML parameter file whose keys match the field
//! names below.

use crate::error::{Error, Result};
use crate::platform::ModuleVersion;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Valid audit log part letters.
static AUDIT_PARTS_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-KZ]+$").unwrap());

/// Audit log part flags (`SecAuditLogParts`).
///
/// Letters keep the caller's order; each may appear once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AuditLogParts(String);

impl AuditLogParts {
    /// The flags as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AuditLogParts {
    fn default() -> Self {
        Self("ABIJDEFHZ".to_string())
    }
}

impl FromStr for AuditLogParts {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !AUDIT_PARTS_PATTERN.is_match(s) {
            return Err(Error::validation(
                "audit_log_parts",
                format!("'{}' must be a non-empty sequence of letters A-K or Z", s),
            ));
        }

        let mut seen = 0u32;
        for c in s.chars() {
            let bit = 1u32 << (c as u32 - 'A' as u32);
            if seen & bit != 0 {
                return Err(Error::validation(
                    "audit_log_parts",
                    format!("part '{}' listed more than once in '{}'", c, s),
                ));
            }
            seen |= bit;
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for AuditLogParts {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AuditLogParts> for String {
    fn from(parts: AuditLogParts) -> Self {
        parts.0
    }
}

impl fmt::Display for AuditLogParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Audit log storage layout (`SecAuditLogType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuditLogType {
    /// All entries in one file.
    #[default]
    Serial,
    /// One file per transaction under `SecAuditLogStorageDir`.
    Concurrent,
}

impl fmt::Display for AuditLogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => f.write_str("Serial"),
            Self::Concurrent => f.write_str("Concurrent"),
        }
    }
}

/// Rule engine mode (`SecRuleEngine`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RuleEngineMode {
    /// Rules are enabled and will block.
    #[default]
    On,
    /// Rules are enabled but only log.
    DetectionOnly,
    /// Rules are disabled.
    Off,
}

impl fmt::Display for RuleEngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("On"),
            Self::DetectionOnly => f.write_str("DetectionOnly"),
            Self::Off => f.write_str("Off"),
        }
    }
}

/// CRS anomaly scoring settings written to `security_crs.conf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnomalyScoring {
    /// Score added by a critical match.
    pub critical_anomaly_score: u32,
    /// Score added by an error match.
    pub error_anomaly_score: u32,
    /// Score added by a warning match.
    pub warning_anomaly_score: u32,
    /// Score added by a notice match.
    pub notice_anomaly_score: u32,
    /// Inbound score at which requests are blocked.
    pub inbound_anomaly_threshold: u32,
    /// Outbound score at which responses are blocked.
    pub outbound_anomaly_threshold: u32,
    /// Whether anomaly-score blocking is enabled.
    pub anomaly_score_blocking: bool,
    /// CRS paranoia level (1-4).
    pub paranoia_level: u8,
}

impl Default for AnomalyScoring {
    fn default() -> Self {
        Self {
            critical_anomaly_score: 5,
            error_anomaly_score: 4,
            warning_anomaly_score: 3,
            notice_anomaly_score: 2,
            inbound_anomaly_threshold: 5,
            outbound_anomaly_threshold: 4,
            anomaly_score_blocking: false,
            paranoia_level: 1,
        }
    }
}

/// All ModSecurity parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Rules to activate: bundled rule names or absolute paths. `None` means
    /// the platform default list.
    pub activated_rules: Option<Vec<String>>,
    /// `SecAuditLogRelevantStatus` regex.
    pub audit_log_relevant_status: String,
    /// `SecAuditLogParts` flags.
    pub audit_log_parts: AuditLogParts,
    /// `SecAuditLogType`.
    pub audit_log_type: AuditLogType,
    /// `SecAuditLogStorageDir`, required for concurrent logging.
    pub audit_log_storage_dir: Option<PathBuf>,
    /// Actions appended to `phase:2,` in `SecDefaultAction`.
    #[serde(rename = "secdefaultaction")]
    pub default_action: String,
    /// Install the CRS package and write `security_crs.conf`.
    pub manage_security_crs: bool,
    /// Write `custom_01_rules.conf`.
    pub custom_rules: bool,
    /// Raw rule lines for the custom rule file.
    pub custom_rules_set: Vec<String>,
    /// Module generation; platform default when unset.
    pub version: Option<ModuleVersion>,
    /// `SecRuleEngine`.
    #[serde(rename = "secruleengine")]
    pub rule_engine: RuleEngineMode,
    /// `SecDebugLogLevel` (0-9).
    pub debug_log_level: u8,
    /// `SecRequestBodyLimit` in bytes.
    #[serde(rename = "secrequestbodylimit")]
    pub request_body_limit: u64,
    /// `SecRequestBodyNoFilesLimit` in bytes.
    #[serde(rename = "secrequestbodynofileslimit")]
    pub request_body_no_files_limit: u64,
    /// `SecRequestBodyInMemoryLimit` in bytes.
    #[serde(rename = "secrequestbodyinmemorylimit")]
    pub request_body_in_memory_limit: u64,
    /// `SecPcreMatchLimit`.
    #[serde(rename = "secpcrematchlimit")]
    pub pcre_match_limit: u32,
    /// `SecPcreMatchLimitRecursion`.
    #[serde(rename = "secpcrematchlimitrecursion")]
    pub pcre_match_limit_recursion: u32,
    /// CRS anomaly scoring.
    pub anomaly_scoring: AnomalyScoring,
    /// Space-separated HTTP methods the CRS allows.
    pub allowed_methods: String,
    /// `|`-separated request content types the CRS allows.
    pub content_types: String,
    /// File extensions the CRS rejects.
    pub restricted_extensions: String,
    /// Request headers the CRS rejects.
    pub restricted_headers: String,
    /// Override of the platform CRS package name.
    pub crs_package: Option<String>,
    /// Override of the platform ModSecurity base directory.
    pub modsec_dir: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            activated_rules: None,
            audit_log_relevant_status: "^(?:5|4(?!04))".to_string(),
            audit_log_parts: AuditLogParts::default(),
            audit_log_type: AuditLogType::default(),
            audit_log_storage_dir: None,
            default_action: "deny,status:406,nolog,auditlog".to_string(),
            manage_security_crs: true,
            custom_rules: false,
            custom_rules_set: Vec::new(),
            version: None,
            rule_engine: RuleEngineMode::default(),
            debug_log_level: 0,
            request_body_limit: 13_107_200,
            request_body_no_files_limit: 131_072,
            request_body_in_memory_limit: 131_072,
            pcre_match_limit: 1500,
            pcre_match_limit_recursion: 1500,
            anomaly_scoring: AnomalyScoring::default(),
            allowed_methods: "GET HEAD POST OPTIONS".to_string(),
            content_types: concat!(
                "application/x-www-form-urlencoded|multipart/form-data|",
                "text/xml|application/xml|application/x-amf|application/json|text/plain"
            )
            .to_string(),
            restricted_extensions: concat!(
                ".asa/ .asax/ .ascx/ .axd/ .backup/ .bak/ .bat/ .cdx/ .cer/ .cfg/ .cmd/ .com/ ",
                ".config/ .conf/ .cs/ .csproj/ .csr/ .dat/ .db/ .dbf/ .dll/ .dos/ .htr/ .htw/ ",
                ".ida/ .idc/ .idq/ .inc/ .ini/ .key/ .licx/ .lnk/ .log/ .mdb/ .old/ .pass/ ",
                ".pdb/ .pol/ .printer/ .pwd/ .resources/ .resx/ .sql/ .sys/ .vb/ .vbs/ ",
                ".vbproj/ .vsdisco/ .webinfo/ .xsd/ .xsx/"
            )
            .to_string(),
            restricted_headers: "/Proxy-Connection/ /Lock-Token/ /Content-Range/ /Translate/ /via/ /if/"
                .to_string(),
            crs_package: None,
            modsec_dir: None,
        }
    }
}

impl SecurityConfig {
    /// Load parameters from a TOML file and validate them.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse_toml(&contents, &path.display().to_string())
    }

    /// Parse parameters from a TOML string and validate them.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Self::parse_toml(contents, "<inline>")
    }

    fn parse_toml(contents: &str, origin: &str) -> Result<Self> {
        let config: SecurityConfig = toml::from_str(contents).map_err(|e| {
            let location = e
                .span()
                .map(|s| {
                    let line = contents[..s.start].matches('\n').count() + 1;
                    format!("{} line {}", origin, line)
                })
                .unwrap_or_else(|| origin.to_string());
            Error::ConfigParse {
                location,
                message: e.message().to_string(),
            }
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check parameter consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_audit_log()?;

        check_quotable("audit_log_relevant_status", &self.audit_log_relevant_status, '"')?;
        check_quotable("secdefaultaction", &self.default_action, '"')?;
        check_quotable("allowed_methods", &self.allowed_methods, '\'')?;
        check_quotable("content_types", &self.content_types, '\'')?;
        check_quotable("restricted_extensions", &self.restricted_extensions, '\'')?;
        check_quotable("restricted_headers", &self.restricted_headers, '\'')?;

        if let Some(rules) = &self.activated_rules {
            for entry in rules {
                let has_name = Path::new(entry)
                    .file_name()
                    .is_some_and(|n| !n.is_empty());
                if !has_name || entry.ends_with('/') {
                    return Err(Error::validation(
                        "activated_rules",
                        format!("entry '{}' does not name a rule file", entry),
                    ));
                }
            }
        }

        if self.debug_log_level > 9 {
            return Err(Error::validation(
                "debug_log_level",
                format!("expected 0-9, got {}", self.debug_log_level),
            ));
        }

        let paranoia = self.anomaly_scoring.paranoia_level;
        if !(1..=4).contains(&paranoia) {
            return Err(Error::validation(
                "anomaly_scoring.paranoia_level",
                format!("expected 1-4, got {}", paranoia),
            ));
        }

        Ok(())
    }

    /// Ensure a concurrent audit log has somewhere to write.
    pub fn validate_audit_log(&self) -> Result<()> {
        if self.audit_log_type == AuditLogType::Concurrent && self.audit_log_storage_dir.is_none() {
            return Err(Error::validation(
                "audit_log_storage_dir",
                "required when audit_log_type is Concurrent",
            ));
        }
        Ok(())
    }
}

/// Values rendered inside quotes must not close the quote or break the line.
fn check_quotable(field: &str, value: &str, quote: char) -> Result<()> {
    if value.contains(quote) || value.contains('"') || value.contains('\n') {
        return Err(Error::validation(
            field,
            "must not contain quotes or line breaks",
        ));
    }
    Ok(())
}
