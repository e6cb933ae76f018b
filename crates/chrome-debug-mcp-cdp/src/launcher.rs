//! Chrome executable detection and process launching.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::BrowserConfig;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chrome_debug_mcp_core::{Error, Platform, Result};

use crate::connector::BrowserProcess;

/// Switches every launched browser gets.
const BASE_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
    "--no-default-browser-check",
    "--password-store=basic",
    "--remote-allow-origins=*",
    "--use-mock-keychain",
];

/// Fully resolved launch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Run without a visible window
    pub headless: bool,
    /// Remote-debugging port
    pub debug_port: u16,
    /// Profile directory (browser default when unset)
    pub user_data_dir: Option<PathBuf>,
    /// Browser executable (auto-detected when unset)
    pub executable: Option<PathBuf>,
    /// Unpacked extension directories to load
    pub extensions: Vec<PathBuf>,
    /// Additional command-line switches
    pub extra_args: Vec<String>,
    /// Deadline for the browser to come up
    pub launch_timeout: Duration,
}

impl Default for LaunchRequest {
    fn default() -> Self {
        Self {
            headless: false,
            debug_port: 9222,
            user_data_dir: None,
            executable: None,
            extensions: Vec::new(),
            extra_args: Vec::new(),
            launch_timeout: Duration::from_secs(20),
        }
    }
}

impl LaunchRequest {
    /// Command-line switches on top of the debugging port and profile.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = BASE_ARGS.iter().map(|s| s.to_string()).collect();

        if self.headless {
            args.push("--headless=new".to_string());
            args.push("--hide-scrollbars".to_string());
            args.push("--mute-audio".to_string());
        }

        if !self.extensions.is_empty() {
            let joined = self
                .extensions
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(",");
            args.push(format!("--disable-extensions-except={joined}"));
            args.push(format!("--load-extension={joined}"));
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        // Headless is expressed through our own switch so extensions keep working.
        let mut builder = BrowserConfig::builder()
            .with_head()
            .disable_default_args()
            .port(self.debug_port)
            .launch_timeout(self.launch_timeout)
            .args(self.args());

        let executable = match &self.executable {
            Some(path) => Some(path.clone()),
            None => detect_chrome_executable(),
        };
        match executable {
            Some(path) => builder = builder.chrome_executable(path),
            None => {
                return Err(Error::Launch(
                    "no Chrome/Chromium executable found; set CHROME_PATH or executablePath"
                        .to_string(),
                ))
            }
        }

        if let Some(dir) = &self.user_data_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Launch(format!("cannot create user data dir {}: {e}", dir.display()))
            })?;
            builder = builder.user_data_dir(dir);
        }

        builder
            .build()
            .map_err(|e| Error::Launch(format!("invalid browser config: {e}")))
    }

    /// Start the browser process. Returns once the process is spawned.
    pub fn spawn(&self) -> Result<ChromeProcess> {
        let config = self.browser_config()?;
        let mut child = config
            .launch()
            .map_err(|e| Error::Launch(format!("failed to start browser: {e}")))?;

        info!(
            port = self.debug_port,
            headless = self.headless,
            extensions = self.extensions.len(),
            "Browser process started"
        );

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Some(Ok(line)) = lines.next().await {
                    debug!(target: "chrome-stderr", "{}", line);
                }
            })
        });

        Ok(ChromeProcess { child, stderr_task })
    }
}

/// A browser process started by this server.
pub struct ChromeProcess {
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl BrowserProcess for ChromeProcess {
    fn has_exited(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(format!("browser exited with {status}")),
            Ok(None) => None,
            Err(e) => Some(format!("cannot query browser process: {e}")),
        }
    }

    async fn kill(&mut self) -> Result<()> {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if self.has_exited().is_some() {
            return Ok(());
        }
        self.child.kill().await.map_err(Error::Io)
    }
}

/// Locate a Chrome/Chromium executable.
///
/// `CHROME_PATH` wins, then `PATH` lookups, then well-known install locations.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_PATH") {
        let candidate = PathBuf::from(path);
        if candidate.exists() {
            return Some(candidate);
        }
        warn!("CHROME_PATH points to a missing file: {}", candidate.display());
    }

    let platform = Platform::detect();
    for name in platform.chrome_executable_names() {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    platform
        .chrome_install_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}
