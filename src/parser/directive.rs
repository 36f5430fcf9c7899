//! Directive types for ModSecurity configuration.

use crate::error::SourceLocation;
use std::fmt;

/// A single directive argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Written as-is.
    Bare(String),
    /// Written inside double quotes.
    Quoted(String),
}

impl Argument {
    /// The argument value without quotes.
    pub fn value(&self) -> &str {
        match self {
            Argument::Bare(s) | Argument::Quoted(s) => s,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Bare(s) => f.write_str(s),
            Argument::Quoted(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// A configuration directive: a name followed by arguments on one logical line.
#[derive(Debug, Clone)]
pub struct Directive {
    /// Directive name as written (e.g. `SecAuditLogParts`).
    pub name: String,
    /// Arguments in order.
    pub args: Vec<Argument>,
    /// Where the directive was read from (default for rendered directives).
    pub location: SourceLocation,
}

// Locations never take part in directive equality.
impl PartialEq for Directive {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.args == other.args
    }
}

impl Eq for Directive {}

impl Directive {
    /// Start a directive with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            location: SourceLocation::default(),
        }
    }

    /// Append an unquoted argument.
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.args.push(Argument::Bare(value.to_string()));
        self
    }

    /// Append a quoted argument.
    pub fn quoted(mut self, value: impl fmt::Display) -> Self {
        self.args.push(Argument::Quoted(value.to_string()));
        self
    }

    /// Case-insensitive name check, matching Apache's directive lookup.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Value of the first argument.
    pub fn first_value(&self) -> Option<&str> {
        self.args.first().map(Argument::value)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// First directive with the given name.
pub fn find<'a>(directives: &'a [Directive], name: &str) -> Option<&'a Directive> {
    directives.iter().find(|d| d.is(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let directive = Directive::new("SecAuditLogRelevantStatus").quoted("^(?:5|4(?!04))");
        assert_eq!(directive.to_string(), r#"SecAuditLogRelevantStatus "^(?:5|4(?!04))""#);

        let directive = Directive::new("SecRule")
            .arg("REQBODY_ERROR")
            .quoted("!@eq 0")
            .quoted("id:'200001',phase:2,deny");
        assert_eq!(
            directive.to_string(),
            r#"SecRule REQBODY_ERROR "!@eq 0" "id:'200001',phase:2,deny""#
        );
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let directives = vec![
            Directive::new("SecAuditLogType").arg("Serial"),
            Directive::new("SecAuditLogParts").arg("ABZ"),
        ];
        let parts = find(&directives, "secauditlogparts").unwrap();
        assert_eq!(parts.first_value(), Some("ABZ"));
        assert!(find(&directives, "SecAuditLog").is_none());
    }
}
