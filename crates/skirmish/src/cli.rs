//! Command-line interface handling for the Skirmish server.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "config.toml";

/// Command line arguments parsed from user input.
///
/// Every option except the config path overrides the matching configuration file setting.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the number of shards
    pub shards: Option<usize>,
    /// Optional override for the session tick quantum
    pub quantum_ms: Option<u64>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Whether to force authorization of routed messages
    pub auth: bool,
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
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            shards: matches.get_one::<usize>("shards").copied(),
            quantum_ms: matches.get_one::<u64>("quantum").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            auth: matches.get_flag("auth"),
        }
    }
}

fn command() -> Command {
    Command::new("Skirmish Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sharded game session server reading JSON requests from stdin")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("shards")
                .short('s')
                .long("shards")
                .value_name("COUNT")
                .help("Number of event loop threads")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("quantum")
                .short('q')
                .long("quantum")
                .value_name("MILLISECONDS")
                .help("Wall-clock budget of one session tick")
                .value_parser(value_parser!(u64)),
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
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("auth")
                .long("auth")
                .help("Require claims matching the target session on every message")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["skirmish"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert_eq!(args.shards, None);
        assert_eq!(args.quantum_ms, None);
        assert!(!args.json_logs);
        assert!(!args.auth);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "skirmish", "-c", "other.toml", "--shards", "4", "-q", "20", "-l", "debug",
            "--json-logs", "--auth",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("other.toml"));
        assert_eq!(args.shards, Some(4));
        assert_eq!(args.quantum_ms, Some(20));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert!(args.auth);
    }

    #[test]
    fn test_non_numeric_shards_rejected() {
        assert!(CliArgs::try_parse_from(["skirmish", "--shards", "many"]).is_err());
    }
}
