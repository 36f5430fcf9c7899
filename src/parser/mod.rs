//! Configuration parser module.
//!
//! Reads ModSecurity/Apache configuration text back into [`Directive`]s.
//! Used to inspect existing config files and to check rendered output
//! structurally.
//!
//! ## Syntax
//!
//! ```text
//! <IfModule mod_security2.c>
//!   SecAuditLogRelevantStatus "^(?:5|4(?!04))"
//!   SecRule REQBODY_ERROR "!@eq 0" \
//!     "id:'200001',phase:2,t:none,log,deny,status:400"
//! </IfModule>
//! ```
//!
//! Container lines (`<IfModule>`) and comments are skipped; every other line
//! starts with a directive name followed by bare or quoted arguments.

mod directive;
mod lexer;

pub use directive::{find, Argument, Directive};
pub use lexer::{Lexer, Token, TokenKind};

use crate::error::{Error, Result, SourceLocation};
use std::path::Path;

/// Parser for ModSecurity configuration files.
pub struct Parser {
    /// Parsed directives.
    directives: Vec<Directive>,
    /// Current source location for error reporting.
    location: SourceLocation,
}

impl Parser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            location: SourceLocation::default(),
        }
    }

    /// Parse a configuration string.
    pub fn parse(&mut self, input: &str) -> Result<()> {
        self.parse_with_location(input, None)
    }

    /// Parse a configuration string with file location.
    pub fn parse_with_location(&mut self, input: &str, file: Option<&Path>) -> Result<()> {
        self.location.file = file.map(|p| p.to_path_buf());
        self.location.line = 1;
        self.location.column = 1;

        let mut lexer = Lexer::new(input);

        while let Some(token) = lexer.next_token() {
            self.location.line = token.line;
            self.location.column = token.column;

            match token.kind {
                TokenKind::Directive(name) => {
                    let directive = self.parse_arguments(name, &mut lexer);
                    self.directives.push(directive);
                }
                TokenKind::Section(_) | TokenKind::Comment | TokenKind::Newline => {}
                other => {
                    return Err(Error::parse(
                        format!("unexpected token: {:?}", other),
                        self.location.to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Parse a configuration file.
    pub fn parse_file(&mut self, path: &Path) -> Result<()> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::filesystem(path, e))?;
        self.parse_with_location(&content, Some(path))
    }

    /// Get the parsed directives.
    pub fn into_directives(self) -> Vec<Directive> {
        self.directives
    }

    /// Get a reference to the parsed directives.
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Collect arguments up to the end of the logical line.
    fn parse_arguments(&self, name: String, lexer: &mut Lexer) -> Directive {
        let mut directive = Directive::new(name);
        directive.location = self.location.clone();

        while let Some(token) = lexer.next_token() {
            match token.kind {
                TokenKind::Newline => break,
                TokenKind::Word(s) => directive.args.push(Argument::Bare(s)),
                TokenKind::QuotedString(s) => directive.args.push(Argument::Quoted(s)),
                other => {
                    tracing::trace!(token = ?other, location = %self.location, "ignoring token");
                }
            }
        }

        directive
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse configuration text into directives.
pub fn parse_str(input: &str) -> Result<Vec<Directive>> {
    let mut parser = Parser::new();
    parser.parse(input)?;
    Ok(parser.into_directives())
}
