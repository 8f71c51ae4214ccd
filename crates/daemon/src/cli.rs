use anonrelay_common::protocol;
use clap::Parser;
use std::path::PathBuf;

/// Expose a local service under a persistent overlay identity
#[derive(Debug, Parser)]
#[command(name = "anonrelay", about)]
pub struct Cli {
    /// Path of the JSON configuration file
    #[arg(long = "config-path", default_value = protocol::DEFAULT_CONFIG_PATH)]
    pub config_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["anonrelay"]).unwrap();
        assert_eq!(cli.config_path, PathBuf::from("config.json"));
    }

    #[test]
    fn test_explicit_config_path() {
        let cli =
            Cli::try_parse_from(["anonrelay", "--config-path", "/etc/anonrelay/relay.json"])
                .unwrap();
        assert_eq!(cli.config_path, PathBuf::from("/etc/anonrelay/relay.json"));
    }

    #[test]
    fn test_rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["anonrelay", "--port", "80"]).is_err());
        assert!(Cli::try_parse_from(["anonrelay", "--version"]).is_err());
    }
}
