//! Persistent application configuration model and defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Driver, download, store and queue locations.
    pub paths: PathsConfig,
    #[serde(default)]
    /// User name to library root folder.
    pub users: BTreeMap<String, PathBuf>,
    #[serde(default)]
    /// Browser session preferences.
    pub browser: BrowserConfig,
    #[serde(default)]
    /// Download wait and retry behavior.
    pub download: DownloadConfig,
    #[serde(default)]
    /// Save-dialog keystroke timings.
    pub automation: AutomationConfig,
    #[serde(default)]
    /// chromedriver update behavior.
    pub driver_update: DriverUpdateConfig,
}

/// File system locations used by a run.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_driver_path")]
    pub driver_path: PathBuf,
    /// Folder the browser save dialog writes into.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Book queue file. Empty means `books.toml` next to the config file.
    #[serde(default)]
    pub queue_path: PathBuf,
}

/// Browser session preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_webdriver_port")]
    pub webdriver_port: u16,
    #[serde(default = "default_implicit_wait_ms")]
    pub implicit_wait_ms: u64,
    /// How long to wait for the player page's playlist and controls.
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_driver_startup_timeout_secs")]
    pub driver_startup_timeout_secs: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Download wait and retry behavior.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DownloadConfig {
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Delays and key counts for driving the browser's save dialog.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AutomationConfig {
    #[serde(default = "default_page_settle_ms")]
    pub page_settle_ms: u64,
    #[serde(default = "default_tab_presses")]
    pub tab_presses: u32,
    #[serde(default = "default_key_interval_ms")]
    pub key_interval_ms: u64,
    #[serde(default = "default_after_tabs_ms")]
    pub after_tabs_ms: u64,
    #[serde(default = "default_enter_presses")]
    pub enter_presses: u32,
    #[serde(default = "default_after_enter_ms")]
    pub after_enter_ms: u64,
    #[serde(default = "default_type_interval_ms")]
    pub type_interval_ms: u64,
    #[serde(default = "default_after_typing_ms")]
    pub after_typing_ms: u64,
}

/// chromedriver update preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DriverUpdateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_versions_url")]
    pub versions_url: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Chrome install folder holding one directory per installed version.
    #[serde(default)]
    pub chrome_install_dir: Option<PathBuf>,
    /// Chrome executable queried with `--version` when no install folder matches.
    #[serde(default)]
    pub chrome_binary: Option<PathBuf>,
}

impl DownloadConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl BrowserConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            driver_path: default_driver_path(),
            download_dir: default_download_dir(),
            database_path: default_database_path(),
            queue_path: PathBuf::new(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_port: default_webdriver_port(),
            implicit_wait_ms: default_implicit_wait_ms(),
            page_timeout_secs: default_page_timeout_secs(),
            driver_startup_timeout_secs: default_driver_startup_timeout_secs(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            page_settle_ms: default_page_settle_ms(),
            tab_presses: default_tab_presses(),
            key_interval_ms: default_key_interval_ms(),
            after_tabs_ms: default_after_tabs_ms(),
            enter_presses: default_enter_presses(),
            after_enter_ms: default_after_enter_ms(),
            type_interval_ms: default_type_interval_ms(),
            after_typing_ms: default_after_typing_ms(),
        }
    }
}

impl Default for DriverUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            versions_url: default_versions_url(),
            platform: default_platform(),
            chrome_install_dir: None,
            chrome_binary: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audio_collector")
}

fn default_driver_path() -> PathBuf {
    let file_name = if cfg!(target_os = "windows") {
        "chromedriver.exe"
    } else {
        "chromedriver"
    };
    app_data_dir().join(file_name)
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| app_data_dir().join("downloads"))
}

fn default_database_path() -> PathBuf {
    app_data_dir().join("audiobooks.db")
}

fn default_webdriver_port() -> u16 {
    9515
}

fn default_implicit_wait_ms() -> u64 {
    5_000
}

fn default_page_timeout_secs() -> u64 {
    100
}

fn default_driver_startup_timeout_secs() -> u64 {
    15
}

fn default_attempt_timeout_secs() -> u64 {
    20
}

fn default_max_attempts() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_page_settle_ms() -> u64 {
    2_500
}

fn default_tab_presses() -> u32 {
    5
}

fn default_key_interval_ms() -> u64 {
    100
}

fn default_after_tabs_ms() -> u64 {
    500
}

fn default_enter_presses() -> u32 {
    2
}

fn default_after_enter_ms() -> u64 {
    1_000
}

fn default_type_interval_ms() -> u64 {
    100
}

fn default_after_typing_ms() -> u64 {
    2_000
}

fn default_versions_url() -> String {
    "https://googlechromelabs.github.io/chrome-for-testing/known-good-versions-with-downloads.json"
        .to_string()
}

fn default_platform() -> String {
    let platform = if cfg!(target_os = "windows") {
        "win64"
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        "mac-arm64"
    } else if cfg!(target_os = "macos") {
        "mac-x64"
    } else {
        "linux64"
    };
    platform.to_string()
}

impl Config {
    /// Library root for a user, if the user is configured.
    pub fn user_library_path(&self, user: &str) -> Option<PathBuf> {
        self.users.get(user).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use std::path::PathBuf;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [users]
            Jackson = "/books/jackson"

            [download]
            max_attempts = 5
            "#,
        )
        .expect("config should parse");

        assert_eq!(parsed.download.max_attempts, 5);
        assert_eq!(parsed.download.attempt_timeout_secs, 20);
        assert_eq!(parsed.automation.tab_presses, 5);
        assert_eq!(parsed.browser.page_timeout_secs, 100);
        assert!(parsed.driver_update.enabled);
        assert_eq!(
            parsed.user_library_path("Jackson"),
            Some(PathBuf::from("/books/jackson"))
        );
        assert_eq!(parsed.user_library_path("Nobody"), None);
    }

    #[test]
    fn test_default_config_survives_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string(&config).expect("config should serialize");
        let parsed: Config = toml::from_str(&text).expect("config should parse");
        assert_eq!(parsed, config);
    }
}
