//! oidc-login - OIDC authentication server and interactive login client

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use oidc_login::{
    Error,
    cli::{Cli, Command, LoginArgs, RemoteArgs},
    config::Config,
    login::{BrowserLauncher, HttpRemote, LoginFlow, LoginRemote, PrintUrl, SystemBrowser, TokenFile},
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Command::Serve => run_server(cli.config.as_deref()).await,
        Command::Login(args) => run_login(args).await,
        Command::AuthUrl(args) => run_auth_url(&args).await,
    }
}

/// Run the endpoint set
async fn run_server(config_path: Option<&std::path::Path>) -> ExitCode {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mount = %config.mount(),
        "Starting oidc-login server"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to create server");
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Interactive (or manual-code) login
async fn run_login(args: LoginArgs) -> ExitCode {
    let remote = match HttpRemote::new(&args.remote.addr, &args.remote.path) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let browser: Arc<dyn BrowserLauncher> = if args.no_browser {
        Arc::new(PrintUrl)
    } else {
        Arc::new(SystemBrowser)
    };

    let flow = LoginFlow::new(remote, browser)
        .with_role(args.role)
        .with_mount(args.remote.path)
        .with_timeout(args.timeout);

    let result = match args.code.as_deref() {
        Some(code) => flow.login_with_code(code).await,
        None => flow.run().await,
    };

    let credential = match result {
        Ok(c) => c,
        Err(Error::CsrfMismatch) => {
            eprintln!("Error: state mismatch in callback - possible CSRF attack; aborting");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let token_file = TokenFile::new(&args.token_file);
    if let Err(e) = token_file.save(&credential) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    println!(
        "Success! Logged in as {} with policies [{}]; token saved to {}",
        credential.display_name,
        credential.policies.join(", "),
        token_file.path().display()
    );
    ExitCode::SUCCESS
}

/// Print the out-of-band authorization URL
async fn run_auth_url(args: &RemoteArgs) -> ExitCode {
    let remote = match HttpRemote::new(&args.addr, &args.path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match remote.auth_url().await {
        Ok(url) => {
            println!("{url}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
