//! Launch a Chromium-family browser and hand out the tab the form lives in.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;

pub type BoxError = Box<dyn Error + Send + Sync>;

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);
const NEW_PAGE_TIMEOUT: Duration = Duration::from_secs(10);
const HANDLER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Find the Chrome or Edge binary on the system.
pub fn find_chrome_binary() -> Result<PathBuf, BoxError> {
    if let Some(candidate) = chrome_candidates().into_iter().find(|c| c.exists()) {
        return Ok(candidate);
    }
    for name in [
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "chromium-browser",
        "microsoft-edge",
    ] {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }
    Err("could not find Chrome or Edge binary; install Chrome or pass --chrome".into())
}

#[cfg(target_os = "macos")]
fn chrome_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"),
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
    ]
}

#[cfg(target_os = "windows")]
fn chrome_candidates() -> Vec<PathBuf> {
    let program_files =
        std::env::var("PROGRAMFILES").unwrap_or_else(|_| "C:\\Program Files".to_string());
    let program_files_x86 = std::env::var("PROGRAMFILES(X86)")
        .unwrap_or_else(|_| "C:\\Program Files (x86)".to_string());
    vec![
        PathBuf::from(&program_files).join("Google\\Chrome\\Application\\chrome.exe"),
        PathBuf::from(&program_files_x86).join("Google\\Chrome\\Application\\chrome.exe"),
        PathBuf::from(&program_files).join("Microsoft\\Edge\\Application\\msedge.exe"),
        PathBuf::from(&program_files_x86).join("Microsoft\\Edge\\Application\\msedge.exe"),
    ]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn chrome_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin/google-chrome-stable"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium-browser"),
        PathBuf::from("/usr/bin/chromium"),
    ]
}

/// Browser profile used for form sessions.
///
/// Default: `dirs::data_dir()/signup-autofill/browser-profile`. A persistent
/// profile keeps the user signed in to the form host between runs.
pub fn resolve_profile_dir(profile_override: Option<&Path>) -> Result<PathBuf, BoxError> {
    match profile_override {
        Some(path) => Ok(path.to_path_buf()),
        None => {
            let data_dir = dirs::data_dir().ok_or("could not determine data directory")?;
            Ok(data_dir.join("signup-autofill").join("browser-profile"))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Browser binary; searched for when `None`.
    pub chrome_path: Option<PathBuf>,
    pub profile_dir: Option<PathBuf>,
    pub headless: bool,
}

/// A running browser, its event-loop task and the tab in use.
pub struct BrowserSession {
    browser: Browser,
    handler: tokio::task::JoinHandle<()>,
    page: Page,
}

impl BrowserSession {
    pub async fn launch(options: &LaunchOptions) -> Result<Self, BoxError> {
        let chrome_path = match &options.chrome_path {
            Some(path) => path.clone(),
            None => find_chrome_binary()?,
        };
        let profile_dir = resolve_profile_dir(options.profile_dir.as_deref())?;
        std::fs::create_dir_all(&profile_dir)?;
        log::info!("using browser {}", chrome_path.display());
        log::debug!("profile dir {}", profile_dir.display());

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&chrome_path)
            .user_data_dir(&profile_dir)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .launch_timeout(LAUNCH_TIMEOUT);
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| format!("failed to build browser config: {e}"))?;

        let (mut browser, handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(drive_handler(handler));
        let page = open_start_page(&mut browser).await?;
        Ok(Self {
            browser,
            handler,
            page,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Load `url` in the session's tab and wait for the navigation.
    pub async fn navigate(&self, url: &str) -> Result<(), BoxError> {
        log::info!("opening {url}");
        self.page
            .goto(url)
            .await
            .map_err(|e| format!("failed to open {url}: {e}"))?;
        Ok(())
    }

    /// Close the browser and wait briefly for the event loop to finish.
    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            log::warn!("failed to close browser: {err}");
        }
        let _ = tokio::time::timeout(HANDLER_SHUTDOWN_TIMEOUT, self.handler).await;
    }
}

/// Pump chromiumoxide's handler until the connection is gone. Transport and
/// launch errors end the loop; a single bad message does not.
async fn drive_handler(mut handler: chromiumoxide::Handler) {
    let mut count = 0u64;
    loop {
        match handler.next().await {
            Some(Ok(())) => count += 1,
            Some(Err(err)) => match &err {
                CdpError::Ws(_)
                | CdpError::Io(_)
                | CdpError::ChannelSendError(_)
                | CdpError::LaunchExit(_, _)
                | CdpError::LaunchTimeout(_)
                | CdpError::LaunchIo(_, _) => {
                    log::warn!("browser handler stopped after {count} events: {err}");
                    break;
                }
                _ => log::debug!("ignoring handler error after {count} events: {err}"),
            },
            None => {
                log::debug!("browser handler ended after {count} events");
                break;
            }
        }
    }
}

/// Prefer the tab Chromium opens at startup; creating `about:blank` can hang
/// on some configurations.
async fn open_start_page(browser: &mut Browser) -> Result<Page, BoxError> {
    browser.fetch_targets().await?;
    tokio::time::sleep(Duration::from_millis(250)).await;

    if let Some(page) = browser.pages().await?.into_iter().next() {
        return Ok(page);
    }

    match tokio::time::timeout(NEW_PAGE_TIMEOUT, browser.new_page("about:blank")).await {
        Ok(Ok(page)) => Ok(page),
        Ok(Err(err)) => Err(format!("failed to create initial page: {err}").into()),
        Err(_) => Err(format!(
            "timed out after {}s creating initial page",
            NEW_PAGE_TIMEOUT.as_secs()
        )
        .into()),
    }
}
