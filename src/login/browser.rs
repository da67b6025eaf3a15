//! Browser launching.

use std::io;

use tracing::info;
use url::Url;

/// Opens a URL for the user
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`; failure is reported, never fatal
    fn open(&self, url: &Url) -> io::Result<()>;
}

/// The user's default browser
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> io::Result<()> {
        info!("Opening browser for authorization");
        open::that(url.as_str())
    }
}

/// Prints the URL instead of opening anything (`--no-browser`)
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintUrl;

impl BrowserLauncher for PrintUrl {
    fn open(&self, url: &Url) -> io::Result<()> {
        eprintln!("Open this URL to continue:\n{url}");
        Ok(())
    }
}

/// Launch `url`, falling back to printing it for manual copy
pub fn launch(browser: &dyn BrowserLauncher, url: &Url) {
    if let Err(e) = browser.open(url) {
        eprintln!("{}", fallback_message(&e, url));
    }
}

fn fallback_message(err: &io::Error, url: &Url) -> String {
    format!("Error automatically opening browser: {err}\nManually open this URL to continue:\n{url}")
}
