//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::login::{DEFAULT_MOUNT, DEFAULT_ROLE, token_file::DEFAULT_TOKEN_FILE};

/// OIDC login: authentication server and interactive browser login
#[derive(Parser, Debug)]
#[command(name = "oidc-login")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML, `serve` only)
    #[arg(short, long, env = "OIDC_LOGIN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "OIDC_LOGIN_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OIDC_LOGIN_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the authentication endpoint set over HTTP
    Serve,

    /// Log in through the browser and store the issued token
    Login(LoginArgs),

    /// Print the authorization URL for a manual (copy-paste) login
    AuthUrl(RemoteArgs),
}

/// Where the endpoint set lives
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Address of the oidc-login server
    #[arg(long, env = "OIDC_LOGIN_ADDR", default_value = "http://127.0.0.1:8200")]
    pub addr: String,

    /// Mount path of the endpoint set
    #[arg(long, default_value = DEFAULT_MOUNT)]
    pub path: String,
}

/// `login` arguments
#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
    /// Server location
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Role to log in with
    #[arg(long, default_value = DEFAULT_ROLE)]
    pub role: String,

    /// How long to wait for the browser callback
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Where to store the issued client token
    #[arg(long, env = "OIDC_LOGIN_TOKEN_FILE", default_value = DEFAULT_TOKEN_FILE)]
    pub token_file: String,

    /// Print the authorization URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Submit a code obtained from `auth-url` instead of running the browser flow
    #[arg(long)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_defaults() {
        let cli = Cli::try_parse_from(["oidc-login", "login"]).unwrap();
        let Command::Login(args) = cli.command else {
            panic!("expected login");
        };

        assert_eq!(args.role, "default");
        assert_eq!(args.remote.path, "/auth/oauth");
        assert_eq!(args.timeout, Duration::from_secs(300));
        assert!(!args.no_browser);
        assert!(args.code.is_none());
    }

    #[test]
    fn login_flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "oidc-login",
            "--log-level",
            "debug",
            "login",
            "--role",
            "dev",
            "--path",
            "/auth/corp",
            "--timeout",
            "90s",
            "--addr",
            "https://login.example",
            "--no-browser",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");

        let Command::Login(args) = cli.command else {
            panic!("expected login");
        };
        assert_eq!(args.role, "dev");
        assert_eq!(args.remote.path, "/auth/corp");
        assert_eq!(args.remote.addr, "https://login.example");
        assert_eq!(args.timeout, Duration::from_secs(90));
        assert!(args.no_browser);
    }

    #[test]
    fn serve_takes_config() {
        let cli = Cli::try_parse_from(["oidc-login", "serve", "--config", "/etc/oidc-login.yaml"]).unwrap();
        assert!(matches!(cli.command, Command::Serve));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/oidc-login.yaml")));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["oidc-login"]).is_err());
    }
}
