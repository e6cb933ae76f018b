//! Platform detection for locating a Chrome/Chromium installation.
//!
//! The launcher asks the platform for the executable names to look up on
//! `PATH` and for the well-known install locations to probe afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Platforms with known Chrome install layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Native Linux (not WSL)
    Linux,
    /// macOS
    MacOS,
    /// Native Windows
    Windows,
    /// Windows Subsystem for Linux
    WSL,
}

impl Platform {
    /// Detect the current platform at runtime.
    ///
    /// WSL is recognised by a "microsoft" marker in `/proc/version` or the
    /// presence of the `WSLInterop` binfmt entry. Unknown Unix flavours are
    /// treated as Linux.
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        {
            if Self::is_wsl() {
                return Platform::WSL;
            }
            Platform::Linux
        }

        #[cfg(target_os = "macos")]
        {
            Platform::MacOS
        }

        #[cfg(target_os = "windows")]
        {
            Platform::Windows
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            Platform::Linux
        }
    }

    #[cfg(target_os = "linux")]
    fn is_wsl() -> bool {
        if let Ok(version) = std::fs::read_to_string("/proc/version") {
            if version.to_lowercase().contains("microsoft") {
                return true;
            }
        }

        std::path::Path::new("/proc/sys/fs/binfmt_misc/WSLInterop").exists()
    }

    /// Get the platform name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
            Platform::MacOS => "macOS",
            Platform::Windows => "Windows",
            Platform::WSL => "WSL",
        }
    }

    /// Executable names to search for on `PATH`, most preferred first.
    pub fn chrome_executable_names(&self) -> &'static [&'static str] {
        match self {
            Platform::Windows => &["chrome.exe", "chromium.exe", "msedge.exe"],
            Platform::MacOS => &["google-chrome", "chromium", "Google Chrome"],
            Platform::Linux | Platform::WSL => &[
                "google-chrome-stable",
                "google-chrome",
                "chromium",
                "chromium-browser",
            ],
        }
    }

    /// Well-known install locations, probed after the `PATH` lookup.
    pub fn chrome_install_paths(&self) -> Vec<PathBuf> {
        match self {
            Platform::Linux => vec![
                PathBuf::from("/usr/bin/google-chrome"),
                PathBuf::from("/usr/bin/chromium"),
                PathBuf::from("/usr/bin/chromium-browser"),
                PathBuf::from("/snap/bin/chromium"),
                PathBuf::from("/opt/google/chrome/chrome"),
            ],
            Platform::WSL => vec![
                PathBuf::from("/usr/bin/google-chrome"),
                PathBuf::from("/usr/bin/chromium"),
                PathBuf::from("/mnt/c/Program Files/Google/Chrome/Application/chrome.exe"),
                PathBuf::from("/mnt/c/Program Files (x86)/Google/Chrome/Application/chrome.exe"),
            ],
            Platform::MacOS => vec![
                PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
                PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
                PathBuf::from(
                    "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
                ),
            ],
            Platform::Windows => {
                let mut paths = Vec::new();
                for var in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
                    if let Ok(root) = std::env::var(var) {
                        let root = PathBuf::from(root);
                        paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                        paths.push(root.join("Chromium/Application/chrome.exe"));
                    }
                }
                paths
            }
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
