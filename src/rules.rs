//! Activated rule links.
//!
//! A rule is activated by linking its file into the activated-rules
//! directory. Entries are either bundled rule names, resolved against the
//! platform's base rules directory, or absolute paths used verbatim.

use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::platform::PlatformProfile;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One activated rule: a symbolic link and the file it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedRuleLink {
    /// The entry as declared.
    pub entry: String,
    /// Link inside the activated-rules directory.
    pub link_path: PathBuf,
    /// File the link points at.
    pub target_path: PathBuf,
}

impl ActivatedRuleLink {
    /// Compute the link for a single declared entry.
    pub fn for_entry(profile: &PlatformProfile, entry: &str) -> Result<Self> {
        let path = Path::new(entry);
        let file_name = path.file_name().ok_or_else(|| {
            Error::validation(
                "activated_rules",
                format!("entry '{}' does not name a rule file", entry),
            )
        })?;

        let target_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            profile.base_rules_source_dir.join(path)
        };

        Ok(Self {
            entry: entry.to_string(),
            link_path: profile.activated_rules_dir.join(file_name),
            target_path,
        })
    }

    /// Whether the linked file holds rules (as opposed to a `.data` file
    /// referenced by rules), and so needs an include directive.
    pub fn is_rule_file(&self) -> bool {
        self.link_path
            .extension()
            .is_some_and(|ext| ext == "conf")
    }
}

/// Entries that take effect on this platform: the caller's list, or the
/// platform default when the caller gave none.
pub fn effective_entries<'a>(
    profile: &PlatformProfile,
    config: &'a SecurityConfig,
) -> Vec<&'a str> {
    match &config.activated_rules {
        Some(rules) => rules.iter().map(String::as_str).collect(),
        None => profile.default_activated_rules.to_vec(),
    }
}

/// Compute every activated rule link, in declaration order.
///
/// Returns nothing on platforms whose CRS package activates rules itself.
/// Repeating an entry yields one link; two different targets sharing a link
/// name is an error.
pub fn plan_links(
    profile: &PlatformProfile,
    config: &SecurityConfig,
) -> Result<Vec<ActivatedRuleLink>> {
    if !profile.rule_linking {
        return Ok(Vec::new());
    }

    let mut links: Vec<ActivatedRuleLink> = Vec::new();
    let mut by_link: HashMap<PathBuf, usize> = HashMap::new();

    for entry in effective_entries(profile, config) {
        let link = ActivatedRuleLink::for_entry(profile, entry)?;

        if let Some(&index) = by_link.get(&link.link_path) {
            let existing = &links[index];
            if existing.target_path == link.target_path {
                tracing::debug!(entry, "duplicate activated rule, skipping");
                continue;
            }
            return Err(Error::validation(
                "activated_rules",
                format!(
                    "'{}' and '{}' both link to {}",
                    existing.entry,
                    link.entry,
                    link.link_path.display()
                ),
            ));
        }

        by_link.insert(link.link_path.clone(), links.len());
        links.push(link);
    }

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{resolve, OsFacts};

    fn redhat() -> PlatformProfile {
        resolve(&OsFacts::new("RedHat", "RedHat", "8")).unwrap()
    }

    fn with_rules(rules: &[&str]) -> SecurityConfig {
        SecurityConfig {
            activated_rules: Some(rules.iter().map(|r| r.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_absolute_entry() {
        let links = plan_links(&redhat(), &with_rules(&["/tmp/foo/bar.conf"])).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_path, PathBuf::from("/tmp/foo/bar.conf"));
        assert_eq!(links[0].link_path.file_name().unwrap(), "bar.conf");
        assert_eq!(
            links[0].link_path,
            PathBuf::from("/etc/httpd/modsecurity.d/activated_rules/bar.conf")
        );
    }

    #[test]
    fn test_default_bundled_entries() {
        let links = plan_links(&redhat(), &SecurityConfig::default()).unwrap();
        let bad_robots = &links[0];
        assert_eq!(bad_robots.entry, "base_rules/modsecurity_35_bad_robots.data");
        assert_eq!(
            bad_robots.link_path,
            PathBuf::from("/etc/httpd/modsecurity.d/activated_rules/modsecurity_35_bad_robots.data")
        );
        assert_eq!(
            bad_robots.target_path,
            PathBuf::from("/usr/lib/modsecurity.d/base_rules/modsecurity_35_bad_robots.data")
        );
        assert!(!bad_robots.is_rule_file());
        assert!(links.iter().any(ActivatedRuleLink::is_rule_file));
    }

    #[test]
    fn test_old_debian_bundled_source() {
        let profile = resolve(&OsFacts::new("Debian", "Ubuntu", "16.04")).unwrap();
        let links = plan_links(&profile, &SecurityConfig::default()).unwrap();
        assert_eq!(
            links[0].target_path,
            PathBuf::from("/usr/share/modsecurity-crs/base_rules/modsecurity_35_bad_robots.data")
        );
        assert_eq!(
            links[0].link_path,
            PathBuf::from("/etc/modsecurity/activated_rules/modsecurity_35_bad_robots.data")
        );
    }

    #[test]
    fn test_self_managed_debian_links_nothing() {
        let profile = resolve(&OsFacts::new("Debian", "Debian", "12")).unwrap();
        let links = plan_links(&profile, &with_rules(&["/tmp/foo/bar.conf"])).unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn test_duplicate_entries_collapse() {
        let links = plan_links(
            &redhat(),
            &with_rules(&["/tmp/foo/bar.conf", "/tmp/foo/bar.conf"]),
        )
        .unwrap();
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_link_name_collision() {
        let err = plan_links(
            &redhat(),
            &with_rules(&["/tmp/foo/bar.conf", "/opt/other/bar.conf"]),
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("bar.conf"));
    }

    #[test]
    fn test_effective_entries_prefers_caller_list() {
        let profile = redhat();
        let config = with_rules(&[]);
        assert!(effective_entries(&profile, &config).is_empty());
        assert_eq!(
            effective_entries(&profile, &SecurityConfig::default()).len(),
            profile.default_activated_rules.len()
        );
    }
}
