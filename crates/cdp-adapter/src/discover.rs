//! Locating a Chrome/Chromium binary to record or replay with.
//!
//! Lookup order: `GOLDPATH_CHROME`, well-known binary names on `PATH`, then the usual install
//! locations for the platform. Install locations are skipped when `GOLDPATH_SKIP_OS_PATHS` is set.

use std::env;
use std::path::{Path, PathBuf};

use serde_json::json;
use which::which;

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};

const CHROME_ENV: &str = "GOLDPATH_CHROME";
const SKIP_INSTALLS_ENV: &str = "GOLDPATH_SKIP_OS_PATHS";

#[cfg(target_os = "windows")]
const BINARY_NAMES: &[&str] = &["chrome.exe", "chromium.exe", "msedge.exe"];
#[cfg(not(target_os = "windows"))]
const BINARY_NAMES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Env,
    SearchPath,
    Install,
}

#[derive(Clone, Debug)]
pub struct Candidate {
    pub path: PathBuf,
    pub origin: Origin,
}

/// Every place a browser could come from, in lookup order. Only the `PATH` entries are known to
/// exist.
pub fn candidates() -> Vec<Candidate> {
    let mut found = Vec::new();

    if let Some(path) = env::var_os(CHROME_ENV).filter(|raw| !raw.is_empty()) {
        found.push(Candidate {
            path: PathBuf::from(path),
            origin: Origin::Env,
        });
    }
    found.extend(
        BINARY_NAMES
            .iter()
            .filter_map(|name| which(name).ok())
            .map(|path| Candidate {
                path,
                origin: Origin::SearchPath,
            }),
    );
    if !skip_installs() {
        found.extend(install_locations().into_iter().map(|path| Candidate {
            path,
            origin: Origin::Install,
        }));
    }
    found
}

/// First candidate that exists on disk.
pub fn detect() -> Option<PathBuf> {
    candidates()
        .into_iter()
        .map(|candidate| candidate.path)
        .find(|path| path.exists())
}

/// Executable to launch for `cfg`: the configured path when it exists, otherwise [`detect`].
pub fn resolve(cfg: &CdpConfig) -> Result<PathBuf, AdapterError> {
    if is_usable(&cfg.executable) {
        return Ok(cfg.executable.clone());
    }
    if let Some(path) = detect() {
        return Ok(path);
    }
    let searched: Vec<String> = candidates()
        .iter()
        .map(|candidate| candidate.path.display().to_string())
        .collect();
    Err(AdapterError::new(AdapterErrorKind::LaunchFailed)
        .with_hint("Chrome/Chromium executable not found")
        .with_data(json!({
            "searched": searched,
            "hint": format!("Install Chrome/Chromium or set {CHROME_ENV}=/path/to/chrome"),
        })))
}

fn is_usable(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.exists()
}

fn skip_installs() -> bool {
    env::var(SKIP_INSTALLS_ENV)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(target_os = "windows")]
fn install_locations() -> Vec<PathBuf> {
    ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .flat_map(|root| {
            let root = PathBuf::from(root.trim());
            [
                root.join("Google/Chrome/Application/chrome.exe"),
                root.join("Chromium/Application/chrome.exe"),
            ]
        })
        .collect()
}

#[cfg(target_os = "macos")]
fn install_locations() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
    ]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn install_locations() -> Vec<PathBuf> {
    [
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium-browser",
        "/usr/bin/chromium",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}
