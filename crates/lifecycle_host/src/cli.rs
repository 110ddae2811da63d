//! Command-line interface for the lifecycle host.

use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "lifecycle.toml";

/// Command line arguments. Everything except the config path overrides a
/// value from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub services_dir: Option<PathBuf>,
    pub modules_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub json_logs: bool,
    /// Skip the directory scan at boot; only built-in plugins are registered.
    pub no_compile: bool,
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            services_dir: matches.get_one::<String>("services").map(PathBuf::from),
            modules_dir: matches.get_one::<String>("modules").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            no_compile: matches.get_flag("no-compile"),
        }
    }
}

fn command() -> Command {
    Command::new("lifecycle-host")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Boots, saves and shuts down game server services and modules")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("services")
                .short('s')
                .long("services")
                .value_name("DIR")
                .help("Directory scanned for service libraries"),
        )
        .arg(
            Arg::new("modules")
                .short('m')
                .long("modules")
                .value_name("DIR")
                .help("Directory scanned for module libraries"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-compile")
                .long("no-compile")
                .help("Do not scan plugin directories at boot")
                .action(clap::ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        let args = CliArgs::try_parse_from(["lifecycle-host"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("lifecycle.toml"));
        assert!(args.services_dir.is_none());
        assert!(args.modules_dir.is_none());
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
        assert!(!args.no_compile);
    }

    #[test]
    fn overrides_are_captured() {
        let args = CliArgs::try_parse_from([
            "lifecycle-host",
            "-c",
            "custom.toml",
            "--services",
            "/srv/services",
            "-m",
            "/srv/modules",
            "--log-level",
            "debug",
            "--json-logs",
            "--no-compile",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.services_dir, Some(PathBuf::from("/srv/services")));
        assert_eq!(args.modules_dir, Some(PathBuf::from("/srv/modules")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert!(args.no_compile);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(CliArgs::try_parse_from(["lifecycle-host", "--bind", "0.0.0.0:80"]).is_err());
    }
}
