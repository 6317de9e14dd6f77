//! Keeps chromedriver in step with the installed Chrome.
//!
//! Chrome-for-testing publishes every known-good version with per-platform
//! downloads; the updater picks the version closest to the local Chrome and
//! swaps it in at the configured driver path.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use serde_json::Value;

use crate::config::DriverUpdateConfig;

const ARCHIVE_FILE_NAME: &str = "chromedriver.zip";

/// A chromedriver build chosen for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDownload {
    pub version: String,
    pub url: String,
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    version
        .trim()
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Sum of per-component differences, shorter versions padded with zeros.
pub fn version_distance(left: &str, right: &str) -> Option<u64> {
    let mut left = parse_version(left)?;
    let mut right = parse_version(right)?;
    let len = left.len().max(right.len());
    left.resize(len, 0);
    right.resize(len, 0);
    Some(
        left.iter()
            .zip(right.iter())
            .map(|(a, b)| a.abs_diff(*b))
            .sum(),
    )
}

fn version_dir_pattern() -> Result<Regex, String> {
    Regex::new(r"^\d+\.\d+\.\d+\.\d+$").map_err(|err| format!("Invalid version pattern: {err}"))
}

fn default_chrome_install_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        Some(PathBuf::from(r"C:\Program Files\Google\Chrome\Application"))
    } else {
        None
    }
}

fn default_chrome_binary() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
    } else if cfg!(target_os = "windows") {
        PathBuf::from("chrome.exe")
    } else {
        PathBuf::from("google-chrome")
    }
}

/// Highest version-named directory in a Chrome install folder.
pub fn newest_version_dir(install_dir: &Path) -> Result<Option<String>, String> {
    let pattern = version_dir_pattern()?;
    let entries = fs::read_dir(install_dir)
        .map_err(|err| format!("Failed to read {}: {}", install_dir.display(), err))?;

    let newest = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| pattern.is_match(name))
        .filter_map(|name| parse_version(&name).map(|parts| (parts, name)))
        .max_by(|(left, _), (right, _)| left.cmp(right))
        .map(|(_, name)| name);
    Ok(newest)
}

/// Pulls the first dotted four-part version out of `--version` style output.
pub fn version_from_output(output: &str) -> Option<String> {
    let pattern = Regex::new(r"\d+\.\d+\.\d+\.\d+").ok()?;
    pattern.find(output).map(|found| found.as_str().to_string())
}

fn version_from_binary(binary: &Path) -> Result<String, String> {
    let output = Command::new(binary)
        .arg("--version")
        .output()
        .map_err(|err| format!("Failed to run {} --version: {}", binary.display(), err))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    version_from_output(&stdout)
        .ok_or_else(|| format!("No version in output of {}: {}", binary.display(), stdout.trim()))
}

/// Installed Chrome version, from the install folder or the Chrome binary.
pub fn detect_chrome_version(config: &DriverUpdateConfig) -> Result<String, String> {
    let install_dir = config
        .chrome_install_dir
        .clone()
        .or_else(default_chrome_install_dir);
    if let Some(install_dir) = install_dir.filter(|dir| dir.is_dir()) {
        if let Some(version) = newest_version_dir(&install_dir)? {
            return Ok(version);
        }
        debug!("No version directory found in {}", install_dir.display());
    }

    let binary = config
        .chrome_binary
        .clone()
        .unwrap_or_else(default_chrome_binary);
    version_from_binary(&binary)
}

/// Picks the chromedriver build nearest to `chrome_version` for `platform`.
/// The first of several equally near versions wins.
pub fn select_driver_download(
    versions_payload: &Value,
    chrome_version: &str,
    platform: &str,
) -> Result<DriverDownload, String> {
    let versions = versions_payload
        .get("versions")
        .and_then(Value::as_array)
        .ok_or_else(|| "Version list has no `versions` array".to_string())?;

    let mut closest: Option<(u64, &Value)> = None;
    for item in versions {
        let Some(version) = item.get("version").and_then(Value::as_str) else {
            continue;
        };
        let Some(distance) = version_distance(chrome_version, version) else {
            continue;
        };
        match closest {
            Some((best, _)) if distance >= best => {}
            _ => closest = Some((distance, item)),
        }
    }

    let (_, item) =
        closest.ok_or_else(|| "No compatible ChromeDriver found for Chrome version".to_string())?;
    let version = item
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let url = item
        .get("downloads")
        .and_then(|downloads| downloads.get("chromedriver"))
        .and_then(Value::as_array)
        .and_then(|drivers| {
            drivers.iter().find(|driver| {
                driver.get("platform").and_then(Value::as_str) == Some(platform)
            })
        })
        .and_then(|driver| driver.get("url"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            format!("No ChromeDriver {platform} download found for version {version}")
        })?
        .to_string();

    Ok(DriverDownload { version, url })
}

fn driver_executable_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "chromedriver.exe"
    } else {
        "chromedriver"
    }
}

/// Copies the driver executable out of a chromedriver archive into `destination`.
pub fn extract_driver<R: io::Read + io::Seek>(
    archive_reader: R,
    platform: &str,
    destination: &Path,
) -> Result<(), String> {
    let mut archive = zip::ZipArchive::new(archive_reader)
        .map_err(|err| format!("Failed to open chromedriver archive: {err}"))?;
    let expected = format!("chromedriver-{}/{}", platform, driver_executable_name());

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| format!("Failed to read chromedriver archive: {err}"))?;
        if entry.name() != expected {
            continue;
        }

        if destination.exists() {
            fs::remove_file(destination)
                .map_err(|err| format!("Failed to remove {}: {}", destination.display(), err))?;
        }
        if let Some(parent) = destination.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create {}: {}", parent.display(), err))?;
        }
        let mut output = File::create(destination)
            .map_err(|err| format!("Failed to create {}: {}", destination.display(), err))?;
        io::copy(&mut entry, &mut output)
            .map_err(|err| format!("Failed to write {}: {}", destination.display(), err))?;
        make_executable(destination)?;
        return Ok(());
    }

    Err(format!("Archive has no {expected}"))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|err| format!("Failed to mark {} executable: {}", path.display(), err))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), String> {
    Ok(())
}

/// Version of the chromedriver at `driver_path`, when it runs.
fn installed_driver_version(driver_path: &Path) -> Option<String> {
    if !driver_path.is_file() {
        return None;
    }
    let output = Command::new(driver_path).arg("--version").output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    version_from_output(&stdout)
}

/// Downloads and installs a chromedriver matching the local Chrome.
pub struct DriverUpdater {
    http_client: ureq::Agent,
    config: DriverUpdateConfig,
    driver_path: PathBuf,
    download_dir: PathBuf,
}

impl DriverUpdater {
    pub fn new(config: DriverUpdateConfig, driver_path: PathBuf, download_dir: PathBuf) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(120))
            .build();
        Self {
            http_client,
            config,
            driver_path,
            download_dir,
        }
    }

    fn fetch_versions(&self) -> Result<Value, String> {
        self.http_client
            .get(&self.config.versions_url)
            .call()
            .map_err(|err| format!("Version list request failed: {err}"))?
            .into_json()
            .map_err(|err| format!("Version list parse failed: {err}"))
    }

    fn download_archive(&self, url: &str) -> Result<PathBuf, String> {
        fs::create_dir_all(&self.download_dir)
            .map_err(|err| format!("Failed to create {}: {}", self.download_dir.display(), err))?;
        let archive_path = self.download_dir.join(ARCHIVE_FILE_NAME);
        let response = self
            .http_client
            .get(url)
            .call()
            .map_err(|err| format!("ChromeDriver download failed: {err}"))?;
        let mut file = File::create(&archive_path)
            .map_err(|err| format!("Failed to create {}: {}", archive_path.display(), err))?;
        io::copy(&mut response.into_reader(), &mut file)
            .map_err(|err| format!("Failed to save {}: {}", archive_path.display(), err))?;
        Ok(archive_path)
    }

    /// Installs the nearest chromedriver unless it is already in place.
    /// Returns the installed version.
    pub fn update(&self) -> Result<String, String> {
        let chrome_version = detect_chrome_version(&self.config)?;
        info!("Installed Chrome version: {chrome_version}");

        let versions = self.fetch_versions()?;
        let download = select_driver_download(&versions, &chrome_version, &self.config.platform)?;

        if installed_driver_version(&self.driver_path).as_deref() == Some(download.version.as_str())
        {
            info!("ChromeDriver {} already installed", download.version);
            return Ok(download.version);
        }

        info!("Downloading ChromeDriver {} from {}", download.version, download.url);
        let archive_path = self.download_archive(&download.url)?;
        let archive = File::open(&archive_path)
            .map_err(|err| format!("Failed to open {}: {}", archive_path.display(), err))?;
        extract_driver(archive, &self.config.platform, &self.driver_path)?;
        if let Err(err) = fs::remove_file(&archive_path) {
            warn!("Failed to remove {}: {}", archive_path.display(), err);
        }

        info!(
            "Installed ChromeDriver {} at {}",
            download.version,
            self.driver_path.display()
        );
        Ok(download.version)
    }
}
