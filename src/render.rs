//! Config file rendering.
//!
//! Produces the text of the main ModSecurity config, the CRS inclusion file
//! and the custom rule file. Directives are built as [`Directive`] values and
//! written in a fixed order; only parameter values vary between runs.

use crate::config::{AuditLogType, SecurityConfig};
use crate::error::Result;
use crate::parser::Directive;
use crate::platform::PlatformProfile;
use crate::rules::ActivatedRuleLink;
use std::path::Path;

const MANAGED_HEADER: &str =
    "# This file is managed by modsec-provision. Local changes will be overwritten.";

/// Line-oriented writer with container indentation.
struct ConfWriter {
    out: String,
    indent: usize,
}

impl ConfWriter {
    fn new() -> Self {
        let mut writer = Self {
            out: String::new(),
            indent: 0,
        };
        writer.line(MANAGED_HEADER);
        writer
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn comment(&mut self, text: &str) {
        self.line(&format!("# {}", text));
    }

    fn directive(&mut self, directive: Directive) {
        self.line(&directive.to_string());
    }

    /// SecRule-style directive with the action list on a continuation line.
    fn rule(&mut self, mut directive: Directive) {
        match directive.args.pop() {
            Some(last) if !directive.args.is_empty() => {
                self.line(&format!("{} \\", directive));
                self.line(&format!("  {}", last));
            }
            Some(last) => {
                directive.args.push(last);
                self.directive(directive);
            }
            None => self.directive(directive),
        }
    }

    fn open(&mut self, section: &str, arg: &str) {
        self.line(&format!("<{} {}>", section, arg));
        self.indent += 1;
    }

    fn close(&mut self, section: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(&format!("</{}>", section));
    }

    fn finish(self) -> String {
        self.out
    }
}

fn include(profile: &PlatformProfile, path: impl AsRef<Path>) -> Directive {
    Directive::new(profile.apache_version.include_directive()).arg(path.as_ref().display())
}

/// Render the main ModSecurity config (`security.conf` / `security2.conf`).
///
/// `links` are the activated rule links; each rule file among them gets its
/// own include. Fails when a concurrent audit log has no storage directory.
pub fn render_security_conf(
    profile: &PlatformProfile,
    config: &SecurityConfig,
    links: &[ActivatedRuleLink],
) -> Result<String> {
    config.validate_audit_log()?;

    let mut w = ConfWriter::new();
    w.open("IfModule", "mod_security2.c");

    w.comment("ModSecurity Core Rules Set configuration");
    w.directive(include(profile, profile.modsec_dir.join("*.conf")));
    for link in links.iter().filter(|l| l.is_rule_file()) {
        w.directive(include(profile, &link.link_path));
    }
    if config.custom_rules {
        w.directive(include(profile, profile.custom_rules_dir.join("*.conf")));
    }
    w.blank();

    w.comment("Default recommended configuration");
    w.directive(Directive::new("SecRuleEngine").arg(config.rule_engine));
    w.directive(Directive::new("SecRequestBodyAccess").arg("On"));
    w.rule(
        Directive::new("SecRule")
            .arg("REQUEST_HEADERS:Content-Type")
            .quoted("text/xml")
            .quoted("id:'200000',phase:1,t:none,t:lowercase,pass,nolog,ctl:requestBodyProcessor=XML"),
    );
    w.directive(Directive::new("SecRequestBodyLimit").arg(config.request_body_limit));
    w.directive(
        Directive::new("SecRequestBodyNoFilesLimit").arg(config.request_body_no_files_limit),
    );
    w.directive(
        Directive::new("SecRequestBodyInMemoryLimit").arg(config.request_body_in_memory_limit),
    );
    w.directive(Directive::new("SecRequestBodyLimitAction").arg("Reject"));
    w.rule(
        Directive::new("SecRule")
            .arg("REQBODY_ERROR")
            .quoted("!@eq 0")
            .quoted(concat!(
                "id:'200001',phase:2,t:none,log,deny,status:400,",
                "msg:'Failed to parse request body.',logdata:'%{reqbody_error_msg}',severity:2"
            )),
    );
    w.rule(
        Directive::new("SecRule")
            .arg("MULTIPART_STRICT_ERROR")
            .quoted("!@eq 0")
            .quoted(concat!(
                "id:'200002',phase:2,t:none,log,deny,status:400,",
                "msg:'Multipart request body failed strict validation: ",
                "PE %{REQBODY_PROCESSOR_ERROR}, BQ %{MULTIPART_BOUNDARY_QUOTED}, ",
                "BW %{MULTIPART_BOUNDARY_WHITESPACE}, DB %{MULTIPART_DATA_BEFORE}, ",
                "DA %{MULTIPART_DATA_AFTER}, HF %{MULTIPART_HEADER_FOLDING}, ",
                "LF %{MULTIPART_LF_LINE}, SM %{MULTIPART_MISSING_SEMICOLON}, ",
                "IQ %{MULTIPART_INVALID_QUOTING}, IP %{MULTIPART_INVALID_PART}, ",
                "IH %{MULTIPART_INVALID_HEADER_FOLDING}, FL %{MULTIPART_FILE_LIMIT_EXCEEDED}'"
            )),
    );
    w.rule(
        Directive::new("SecRule")
            .arg("MULTIPART_UNMATCHED_BOUNDARY")
            .quoted("!@eq 0")
            .quoted(concat!(
                "id:'200003',phase:2,t:none,log,deny,status:44,",
                "msg:'Multipart parser detected a possible unmatched boundary.'"
            )),
    );
    w.directive(Directive::new("SecPcreMatchLimit").arg(config.pcre_match_limit));
    w.directive(
        Directive::new("SecPcreMatchLimitRecursion").arg(config.pcre_match_limit_recursion),
    );
    w.rule(
        Directive::new("SecRule")
            .arg("TX:/^MSC_/")
            .quoted("!@streq 0")
            .quoted(concat!(
                "id:'200004',phase:2,t:none,deny,",
                "msg:'ModSecurity internal error flagged: %{MATCHED_VAR_NAME}'"
            )),
    );
    w.directive(Directive::new("SecResponseBodyAccess").arg("Off"));
    w.directive(
        Directive::new("SecResponseBodyMimeType")
            .arg("text/plain")
            .arg("text/html")
            .arg("text/xml"),
    );
    w.directive(Directive::new("SecResponseBodyLimit").arg(524_288));
    w.directive(Directive::new("SecResponseBodyLimitAction").arg("ProcessPartial"));
    w.directive(Directive::new("SecDebugLogLevel").arg(config.debug_log_level));
    w.directive(Directive::new("SecAuditEngine").arg("RelevantOnly"));
    w.blank();

    w.comment("Audit logging");
    w.directive(
        Directive::new("SecAuditLogRelevantStatus").quoted(&config.audit_log_relevant_status),
    );
    w.directive(Directive::new("SecAuditLogParts").arg(&config.audit_log_parts));
    w.directive(Directive::new("SecAuditLogType").arg(config.audit_log_type));
    let debug_log = profile.log_dir.join("modsec_debug.log");
    let audit_log = profile.log_dir.join("modsec_audit.log");
    w.directive(Directive::new("SecDebugLog").arg(debug_log.display()));
    w.directive(Directive::new("SecAuditLog").arg(audit_log.display()));
    match (config.audit_log_type, &config.audit_log_storage_dir) {
        (AuditLogType::Concurrent, Some(dir)) => {
            w.directive(Directive::new("SecAuditLogStorageDir").arg(dir.display()));
        }
        (AuditLogType::Serial, Some(dir)) => {
            tracing::warn!(
                dir = %dir.display(),
                "audit_log_storage_dir is only used with Concurrent audit logging, ignoring"
            );
        }
        _ => {}
    }
    w.blank();

    w.directive(Directive::new("SecArgumentSeparator").arg("&"));
    w.directive(Directive::new("SecCookieFormat").arg(0));
    w.directive(Directive::new("SecTmpDir").arg(profile.state_dir.display()));
    w.directive(Directive::new("SecDataDir").arg(profile.state_dir.display()));
    w.directive(Directive::new("SecUploadDir").arg(profile.state_dir.display()));
    w.directive(Directive::new("SecUploadKeepFiles").arg("Off"));
    w.directive(Directive::new("SecUploadFileMode").arg("0600"));

    w.close("IfModule");
    Ok(w.finish())
}

/// Render `security_crs.conf`: default action, anomaly scoring, and the
/// package loader for the bundled rule set where the platform has one.
pub fn render_crs_conf(profile: &PlatformProfile, config: &SecurityConfig) -> String {
    let scoring = &config.anomaly_scoring;
    let mut w = ConfWriter::new();

    w.directive(
        Directive::new("SecDefaultAction").quoted(format!("phase:2,{}", config.default_action)),
    );
    w.blank();

    w.comment("Anomaly scoring");
    w.directive(Directive::new("SecAction").quoted(format!(
        concat!(
            "id:'900001',phase:1,t:none,",
            "setvar:tx.critical_anomaly_score={},setvar:tx.error_anomaly_score={},",
            "setvar:tx.warning_anomaly_score={},setvar:tx.notice_anomaly_score={},nolog,pass"
        ),
        scoring.critical_anomaly_score,
        scoring.error_anomaly_score,
        scoring.warning_anomaly_score,
        scoring.notice_anomaly_score,
    )));
    w.directive(Directive::new("SecAction").quoted(format!(
        "id:'900002',phase:1,t:none,setvar:tx.inbound_anomaly_score_level={},nolog,pass",
        scoring.inbound_anomaly_threshold
    )));
    w.directive(Directive::new("SecAction").quoted(format!(
        "id:'900003',phase:1,t:none,setvar:tx.outbound_anomaly_score_level={},nolog,pass",
        scoring.outbound_anomaly_threshold
    )));
    w.directive(Directive::new("SecAction").quoted(format!(
        "id:'900004',phase:1,t:none,setvar:tx.anomaly_score_blocking={},nolog,pass",
        if scoring.anomaly_score_blocking { "on" } else { "off" }
    )));
    w.directive(Directive::new("SecAction").quoted(format!(
        "id:'900000',phase:1,t:none,setvar:tx.paranoia_level={},nolog,pass",
        scoring.paranoia_level
    )));
    w.blank();

    w.comment("HTTP policy");
    w.directive(Directive::new("SecAction").quoted(format!(
        concat!(
            "id:'900012',phase:1,t:none,",
            "setvar:'tx.allowed_methods={}',setvar:'tx.allowed_request_content_type={}',",
            "setvar:'tx.restricted_extensions={}',setvar:'tx.restricted_headers={}',nolog,pass"
        ),
        config.allowed_methods,
        config.content_types,
        config.restricted_extensions,
        config.restricted_headers,
    )));

    if let Some(loader) = &profile.bundled_rules_include {
        w.blank();
        w.comment("Bundled Core Rule Set");
        w.directive(include(profile, loader));
    }

    w.finish()
}

/// Render `custom_01_rules.conf`: each rule line as given, one per line.
pub fn render_custom_rules(config: &SecurityConfig) -> String {
    config
        .custom_rules_set
        .iter()
        .fold(String::new(), |mut out, rule| {
            out.push_str(rule);
            out.push('\n');
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{find, parse_str};
    use crate::platform::{resolve, OsFacts};
    use crate::rules::plan_links;
    use std::path::PathBuf;

    fn redhat() -> PlatformProfile {
        resolve(&OsFacts::new("RedHat", "RedHat", "8")).unwrap()
    }

    fn has_line(text: &str, expected: &str) -> bool {
        text.lines().any(|l| l.trim_start() == expected && l.starts_with(' '))
    }

    #[test]
    fn test_default_audit_block() {
        let profile = redhat();
        let config = SecurityConfig::default();
        let links = plan_links(&profile, &config).unwrap();
        let text = render_security_conf(&profile, &config, &links).unwrap();

        assert!(has_line(&text, r#"SecAuditLogRelevantStatus "^(?:5|4(?!04))""#));
        assert!(has_line(&text, "SecAuditLogParts ABIJDEFHZ"));
        assert!(has_line(&text, "SecAuditLogType Serial"));
        assert!(has_line(&text, "SecDebugLog /var/log/httpd/modsec_debug.log"));
        assert!(has_line(&text, "SecAuditLog /var/log/httpd/modsec_audit.log"));
        assert!(!text.contains("SecAuditLogStorageDir"));
    }

    #[test]
    fn test_audit_directive_order() {
        let profile = redhat();
        let config = SecurityConfig {
            audit_log_type: AuditLogType::Concurrent,
            audit_log_storage_dir: Some(PathBuf::from("/var/log/httpd/audit")),
            ..Default::default()
        };
        let text = render_security_conf(&profile, &config, &[]).unwrap();
        let directives = parse_str(&text).unwrap();

        let order = [
            "SecAuditLogRelevantStatus",
            "SecAuditLogParts",
            "SecAuditLogType",
            "SecDebugLog",
            "SecAuditLog",
            "SecAuditLogStorageDir",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|name| directives.iter().position(|d| d.is(name)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            find(&directives, "SecAuditLogStorageDir").unwrap().first_value(),
            Some("/var/log/httpd/audit")
        );
    }

    #[test]
    fn test_concurrent_without_storage_dir_fails() {
        let config = SecurityConfig {
            audit_log_type: AuditLogType::Concurrent,
            ..Default::default()
        };
        let err = render_security_conf(&redhat(), &config, &[]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_serial_ignores_storage_dir() {
        let config = SecurityConfig {
            audit_log_storage_dir: Some(PathBuf::from("/var/log/httpd/audit")),
            ..Default::default()
        };
        let text = render_security_conf(&redhat(), &config, &[]).unwrap();
        assert!(!text.contains("SecAuditLogStorageDir"));
    }

    #[test]
    fn test_activation_includes() {
        let profile = redhat();
        let config = SecurityConfig {
            activated_rules: Some(vec![
                "/tmp/foo/bar.conf".to_string(),
                "base_rules/modsecurity_35_bad_robots.data".to_string(),
            ]),
            custom_rules: true,
            ..Default::default()
        };
        let links = plan_links(&profile, &config).unwrap();
        let text = render_security_conf(&profile, &config, &links).unwrap();

        assert!(has_line(&text, "IncludeOptional /etc/httpd/modsecurity.d/*.conf"));
        assert!(has_line(
            &text,
            "IncludeOptional /etc/httpd/modsecurity.d/activated_rules/bar.conf"
        ));
        assert!(!text.contains("activated_rules/modsecurity_35_bad_robots.data"));
        assert!(has_line(
            &text,
            "IncludeOptional /etc/httpd/modsecurity.d/custom_rules/*.conf"
        ));
    }

    #[test]
    fn test_apache_22_uses_include() {
        let profile = resolve(&OsFacts::new("RedHat", "CentOS", "6")).unwrap();
        let text = render_security_conf(&profile, &SecurityConfig::default(), &[]).unwrap();
        assert!(has_line(&text, "Include /etc/httpd/modsecurity.d/*.conf"));
    }

    #[test]
    fn test_debian_paths() {
        let profile = resolve(&OsFacts::new("Debian", "Debian", "11")).unwrap();
        let text = render_security_conf(&profile, &SecurityConfig::default(), &[]).unwrap();
        assert!(has_line(&text, "SecDebugLog /var/log/apache2/modsec_debug.log"));
        assert!(has_line(&text, "SecAuditLog /var/log/apache2/modsec_audit.log"));
        assert!(has_line(&text, "SecTmpDir /var/cache/modsecurity"));
    }

    #[test]
    fn test_rendered_rules_parse_back() {
        let profile = redhat();
        let config = SecurityConfig::default();
        let text = render_security_conf(&profile, &config, &[]).unwrap();
        let directives = parse_str(&text).unwrap();

        let rules: Vec<_> = directives.iter().filter(|d| d.is("SecRule")).collect();
        assert_eq!(rules.len(), 5);
        assert!(rules.iter().all(|r| r.args.len() == 3));
        assert_eq!(
            find(&directives, "SecRuleEngine").unwrap().first_value(),
            Some("On")
        );
    }

    #[test]
    fn test_crs_default_action() {
        let profile = redhat();
        let text = render_crs_conf(&profile, &SecurityConfig::default());
        assert!(text
            .lines()
            .any(|l| l == r#"SecDefaultAction "phase:2,deny,status:406,nolog,auditlog""#));
        assert!(!text.contains("owasp-crs.load"));

        let config = SecurityConfig {
            default_action: "pass,log".to_string(),
            ..Default::default()
        };
        let text = render_crs_conf(&profile, &config);
        assert!(text.contains(r#"SecDefaultAction "phase:2,pass,log""#));
    }

    #[test]
    fn test_crs_scoring_and_loader() {
        let profile = resolve(&OsFacts::new("Debian", "Ubuntu", "22.04")).unwrap();
        let mut config = SecurityConfig::default();
        config.anomaly_scoring.paranoia_level = 3;
        config.anomaly_scoring.anomaly_score_blocking = true;
        let text = render_crs_conf(&profile, &config);

        assert!(text.contains("setvar:tx.paranoia_level=3"));
        assert!(text.contains("setvar:tx.anomaly_score_blocking=on"));
        assert!(text.contains("setvar:'tx.allowed_methods=GET HEAD POST OPTIONS'"));
        assert!(text
            .lines()
            .any(|l| l == "IncludeOptional /usr/share/modsecurity-crs/owasp-crs.load"));

        let directives = parse_str(&text).unwrap();
        assert_eq!(directives.iter().filter(|d| d.is("SecAction")).count(), 6);
    }

    #[test]
    fn test_custom_rules_exact_content() {
        let rule = r#"REMOTE_ADDR "^127.0.0.1" "id:199999,phase:1,nolog,allow,ctl:ruleEngine=off""#;
        let config = SecurityConfig {
            custom_rules: true,
            custom_rules_set: vec![rule.to_string()],
            ..Default::default()
        };
        assert_eq!(render_custom_rules(&config), format!("{}\n", rule));

        let config = SecurityConfig {
            custom_rules_set: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert_eq!(render_custom_rules(&config), "a\nb\n");
    }
}
