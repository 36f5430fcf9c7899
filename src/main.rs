//! modsec-provision CLI tool.

use clap::{CommandFactory, Parser, Subcommand};
use modsec_provision::catalog::{compile_for, profile_for};
use modsec_provision::{
    Catalog, Converger, OsFacts, PlatformProfile, Resource, Result, SecurityConfig,
    SystemPackageManager,
};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "modsec-provision")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// OS family fact (RedHat or Debian); required except for `inspect`
    #[arg(long, global = true)]
    os_family: Option<String>,

    /// Distribution name fact (defaults to the family)
    #[arg(long, global = true)]
    os_name: Option<String>,

    /// Major release fact, e.g. 8 or 22.04; required except for `inspect`
    #[arg(long, global = true)]
    os_release: Option<String>,

    /// TOML parameter file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// OS facts from the command line, if both family and release were given.
    fn facts(&self) -> Option<OsFacts> {
        let family = self.os_family.as_deref()?;
        let release = self.os_release.as_deref()?;
        Some(OsFacts::new(
            family,
            self.os_name.as_deref().unwrap_or(family),
            release,
        ))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved platform profile
    Profile,

    /// List the resources that would be managed
    Plan,

    /// Print every generated file
    Render,

    /// Converge the catalog under a filesystem root
    Apply {
        /// Filesystem root to converge under
        #[arg(short, long, default_value = "/")]
        root: PathBuf,

        /// Report changes without making them
        #[arg(long)]
        dry_run: bool,

        /// Apply directory owners and groups
        #[arg(long)]
        manage_ownership: bool,

        /// Do not query or install packages
        #[arg(long)]
        skip_packages: bool,
    },

    /// Parse an existing ModSecurity config and print its directives
    Inspect {
        /// Config file to read
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Inspect { file } = &cli.command {
        return inspect(file);
    }

    let Some(facts) = cli.facts() else {
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "--os-family and --os-release are required for this command",
            )
            .exit();
    };
    let config = match &cli.config {
        Some(path) => {
            info!("Loading parameters from {:?}", path);
            SecurityConfig::from_file(path)?
        }
        None => SecurityConfig::default(),
    };
    config.validate()?;
    let profile = profile_for(&facts, &config)?;

    match cli.command {
        Commands::Profile => {
            print_profile(&profile);
            Ok(())
        }
        Commands::Plan => plan(&compile_for(profile, &config)?),
        Commands::Render => render(&compile_for(profile, &config)?),
        Commands::Apply {
            root,
            dry_run,
            manage_ownership,
            skip_packages,
        } => {
            let catalog = compile_for(profile, &config)?;
            apply(&catalog, &root, dry_run, manage_ownership, skip_packages)
        }
        Commands::Inspect { .. } => Ok(()),
    }
}

fn print_profile(profile: &PlatformProfile) {
    println!("os family:           {}", profile.os_family);
    println!("os release:          {}", profile.os_release_major);
    println!(
        "module:              {} (version {})",
        profile.module_name(),
        profile.module_version.number()
    );
    println!("apache include:      {}", profile.apache_version.include_directive());
    println!("config file:         {}", profile.config_path().display());
    println!("module libraries:    {}", profile.module_lib_dir.display());
    println!("package:             {}", profile.package_name);
    println!("modsec dir:          {}", profile.modsec_dir.display());
    println!("rule linking:        {}", profile.rule_linking);
    println!("base rules:          {}", profile.base_rules_source_dir.display());
    println!("activated rules:     {}", profile.activated_rules_dir.display());
    println!("custom rules:        {}", profile.custom_rules_dir.display());
    println!("log dir:             {}", profile.log_dir.display());
    println!("state dir:           {}", profile.state_dir.display());
    println!("service account:     {}:{}", profile.service_user, profile.service_group);
    if let Some(include) = &profile.bundled_rules_include {
        println!("bundled rules:       {}", include.display());
    }
}

fn plan(catalog: &Catalog) -> Result<()> {
    println!("Total resources: {}", catalog.resources.len());
    for resource in &catalog.resources {
        match resource {
            Resource::Module(module) => println!("  {}  ({})", resource, module.load_directive()),
            Resource::Directory {
                owner, group, mode, ..
            } => println!("  {}  {}:{} {:o}", resource, owner, group, mode),
            Resource::Link(link) => {
                println!("  {}  -> {}", resource, link.target_path.display())
            }
            _ => println!("  {}", resource),
        }
    }

    for warning in &catalog.warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}

fn render(catalog: &Catalog) -> Result<()> {
    for resource in &catalog.resources {
        if let Resource::File { path, content, .. } = resource {
            println!("==> {} <==", path.display());
            print!("{}", content);
            println!();
        }
    }
    Ok(())
}

fn apply(
    catalog: &Catalog,
    root: &Path,
    dry_run: bool,
    manage_ownership: bool,
    skip_packages: bool,
) -> Result<()> {
    info!("Converging {} resources under {:?}", catalog.resources.len(), root);

    let mut packages = SystemPackageManager::new(catalog.profile.os_family);
    let mut converger = Converger::new(root)
        .dry_run(dry_run)
        .manage_ownership(manage_ownership);
    if !skip_packages {
        converger = converger.with_packages(&mut packages);
    }

    let report = converger.apply(catalog)?;
    for change in &report.changes {
        println!("{:>10}  {}", change.outcome.to_string(), change.resource);
    }
    for warning in &catalog.warnings {
        println!("warning: {}", warning);
    }
    println!(
        "{} of {} resources {}",
        report.changed(),
        report.changes.len(),
        if dry_run { "would change" } else { "changed" }
    );
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    info!("Inspecting {:?}", path);

    let mut parser = modsec_provision::parser::Parser::new();
    parser.parse_file(path)?;

    println!("Total directives: {}", parser.directives().len());
    for directive in parser.directives() {
        println!("  {}: {}", directive.location, directive);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_facts_required_for_apply() {
        let cli = Cli::try_parse_from(["modsec-provision", "apply", "--root", "/tmp/stage"]).unwrap();
        assert!(cli.facts().is_none());

        let cli = Cli::try_parse_from(["modsec-provision", "--os-family", "Debian", "plan"]).unwrap();
        assert!(cli.facts().is_none());
    }

    #[test]
    fn test_facts_from_flags() {
        let cli = Cli::try_parse_from([
            "modsec-provision",
            "plan",
            "--os-family",
            "Debian",
            "--os-name",
            "Ubuntu",
            "--os-release",
            "22.04",
        ])
        .unwrap();
        assert_eq!(cli.facts(), Some(OsFacts::new("Debian", "Ubuntu", "22.04")));

        let cli = Cli::try_parse_from([
            "modsec-provision",
            "--os-family",
            "RedHat",
            "--os-release",
            "9",
            "profile",
        ])
        .unwrap();
        assert_eq!(cli.facts(), Some(OsFacts::new("RedHat", "RedHat", "9")));
    }

    #[test]
    fn test_inspect_needs_no_facts() {
        let cli = Cli::try_parse_from(["modsec-provision", "inspect", "security.conf"]).unwrap();
        assert!(matches!(cli.command, Commands::Inspect { .. }));
    }
}
