//! Property tests for platform resolution and parameter validation.

use modsec_provision::config::AuditLogParts;
use modsec_provision::{compile, resolve, OsFacts, OsFamily, SecurityConfig};
use proptest::prelude::*;

fn supported_facts() -> impl Strategy<Value = OsFacts> {
    prop_oneof![
        (5u32..=10).prop_map(|r| OsFacts::new("RedHat", "CentOS", &r.to_string())),
        (5u32..=13).prop_map(|r| OsFacts::new("Debian", "Debian", &r.to_string())),
        (12u32..=24, prop::sample::select(vec!["04", "10"]))
            .prop_map(|(r, minor)| OsFacts::new("Debian", "Ubuntu", &format!("{}.{}", r, minor))),
    ]
}

proptest! {
    #[test]
    fn resolve_is_total_over_supported_matrix(facts in supported_facts()) {
        let profile = resolve(&facts).unwrap();
        prop_assert!(profile.config_path().is_absolute());
        prop_assert!(profile.activated_rules_dir.starts_with(&profile.modsec_dir));
        prop_assert!(!profile.package_name.is_empty());
        if profile.os_family == OsFamily::RedHat {
            prop_assert!(profile.rule_linking);
        }
    }

    #[test]
    fn default_catalog_compiles_everywhere(facts in supported_facts()) {
        let catalog = compile(&facts, &SecurityConfig::default()).unwrap();
        prop_assert!(catalog.file(catalog.profile.config_path()).is_some());
        prop_assert!(catalog.warnings.is_empty());
    }

    #[test]
    fn unknown_family_is_rejected(family in "[A-Za-z]{1,12}") {
        prop_assume!(OsFamily::from_fact(&family).is_none());
        prop_assert!(resolve(&OsFacts::new(&family, &family, "1")).is_err());
    }

    #[test]
    fn audit_parts_parsing_never_panics(parts in "\\PC{0,16}") {
        let _ = parts.parse::<AuditLogParts>();
    }

    #[test]
    fn valid_audit_parts_accepted(
        letters in prop::sample::subsequence(
            vec!['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'Z'],
            1..=12,
        )
    ) {
        let parts: String = letters.into_iter().collect();
        let parsed = parts.parse::<AuditLogParts>().unwrap();
        prop_assert_eq!(parsed.to_string(), parts);
    }
}
