//! Saves chapter streams through the browser's save dialog and moves the
//! resulting files into the book folder.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::audiobook::chapter_file_name;
use crate::config::AutomationConfig;
use crate::keyboard::{Key, KeyboardAutomation};
use crate::webdriver::{BrowserSession, DriverError, Locator, Wait};

const OPEN_TAB_SCRIPT: &str = "window.open('');";
const PARTIAL_SUFFIX: &str = "part";

/// Where chapters land and how long to wait for them.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Folder the save dialog writes into.
    pub download_dir: PathBuf,
    pub book_dir: PathBuf,
    /// Bounds page load and each wait for the saved file.
    pub attempt_wait: Wait,
    pub max_attempts: u32,
    pub automation: AutomationConfig,
}

/// Outcome of one book's downloads.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
    /// Chapters already present in the book folder.
    pub skipped: Vec<PathBuf>,
    /// Chapter index and stream URL of each chapter that never arrived.
    /// The URL is `None` when the player never exposed one.
    pub failed: Vec<(usize, Option<String>)>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

enum ChapterOutcome {
    Saved,
    /// Every attempt to pick up the saved file ran out.
    Missing,
    /// The save was never triggered.
    NotStarted(String),
}

fn pause(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Tabs to the dialog's save control, opens it, names the file and confirms.
fn save_via_dialog<K: KeyboardAutomation + ?Sized>(
    keyboard: &mut K,
    file_name: &str,
    automation: &AutomationConfig,
) -> Result<(), String> {
    let key_interval = Duration::from_millis(automation.key_interval_ms);

    pause(automation.page_settle_ms);
    keyboard.press(Key::Tab, automation.tab_presses, key_interval)?;

    pause(automation.after_tabs_ms);
    keyboard.press(Key::Enter, automation.enter_presses, key_interval)?;

    pause(automation.after_enter_ms);
    keyboard.type_text(file_name, Duration::from_millis(automation.type_interval_ms))?;

    pause(automation.after_typing_ms);
    keyboard.press(Key::Enter, 1, key_interval)
}

fn is_finished_download(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"))
}

fn partial_path(to: &Path) -> PathBuf {
    let mut name = to.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    to.with_file_name(name)
}

/// Copies `from` next to `to` under a `.part` name, then renames it into
/// place. `to` only ever appears complete.
fn copy_into_place(from: &Path, to: &Path) -> Result<(), String> {
    let partial = partial_path(to);
    if let Err(err) = fs::copy(from, &partial) {
        if partial.exists() {
            if let Err(remove_err) = fs::remove_file(&partial) {
                warn!("Failed to remove {}: {}", partial.display(), remove_err);
            }
        }
        return Err(format!(
            "Failed to copy {} to {}: {}",
            from.display(),
            partial.display(),
            err
        ));
    }
    fs::rename(&partial, to).map_err(|err| {
        format!("Failed to move {} to {}: {}", partial.display(), to.display(), err)
    })
}

/// Renames `from` to `to`, copying across file systems when a rename can't.
pub fn move_file(from: &Path, to: &Path) -> Result<(), String> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                "Rename {} -> {} failed ({}). Falling back to copy.",
                from.display(),
                to.display(),
                rename_err
            );
            copy_into_place(from, to)?;
            fs::remove_file(from)
                .map_err(|err| format!("Failed to remove {}: {}", from.display(), err))
        }
    }
}

/// Waits for the saved file and moves it into the book folder, retrying up
/// to `max_attempts` times. Returns whether the chapter arrived.
fn collect_saved_file(settings: &DownloadSettings, file_name: &str, target: &Path) -> bool {
    let downloaded = settings.download_dir.join(file_name);
    for attempt in 1..=settings.max_attempts {
        let waited = settings
            .attempt_wait
            .until(&format!("{} to be saved", downloaded.display()), || {
                Ok(is_finished_download(&downloaded).then_some(()))
            });

        match waited {
            Ok(()) => match move_file(&downloaded, target) {
                Ok(()) => return true,
                Err(err) => warn!("Attempt {attempt}: {err}"),
            },
            Err(err) => warn!("Attempt {attempt}: {err}"),
        }
    }
    false
}

fn download_chapter<S, K>(
    session: &mut S,
    keyboard: &mut K,
    settings: &DownloadSettings,
    url: &str,
    file_name: &str,
    target: &Path,
) -> Result<ChapterOutcome, DriverError>
where
    S: BrowserSession + ?Sized,
    K: KeyboardAutomation + ?Sized,
{
    session.navigate(url)?;
    settings
        .attempt_wait
        .visible(session, &Locator::tag_name("body"))?;

    if let Err(err) = save_via_dialog(keyboard, file_name, &settings.automation) {
        return Ok(ChapterOutcome::NotStarted(format!(
            "save dialog automation failed: {err}"
        )));
    }

    if collect_saved_file(settings, file_name, target) {
        Ok(ChapterOutcome::Saved)
    } else {
        Ok(ChapterOutcome::Missing)
    }
}

/// Opens `url` in a new tab, saves it as `file_name` and closes the tab again.
fn download_in_new_tab<S, K>(
    session: &mut S,
    keyboard: &mut K,
    settings: &DownloadSettings,
    main_handle: &str,
    url: &str,
    file_name: &str,
    target: &Path,
) -> Result<ChapterOutcome, DriverError>
where
    S: BrowserSession + ?Sized,
    K: KeyboardAutomation + ?Sized,
{
    session.execute_script(OPEN_TAB_SCRIPT, &[])?;
    let newest_handle = session.window_handles()?.pop().ok_or_else(|| {
        DriverError::Transport("new tab did not produce a window handle".to_string())
    })?;
    session.switch_to_window(&newest_handle)?;

    let outcome = match download_chapter(session, keyboard, settings, url, file_name, target) {
        Ok(outcome) => outcome,
        Err(err) if err.is_timeout() => {
            ChapterOutcome::NotStarted(format!("page did not load: {err}"))
        }
        Err(err) => return Err(err),
    };

    session.close_window()?;
    session.switch_to_window(main_handle)?;
    Ok(outcome)
}

/// Downloads every chapter of `title` into `settings.book_dir`.
///
/// Chapters are numbered by playlist position starting at 0. Each chapter
/// opens in its own tab, which is closed afterwards so the player tab stays
/// the first handle.
pub fn download_chapters<S, K>(
    session: &mut S,
    keyboard: &mut K,
    chapter_urls: &[Option<String>],
    title: &str,
    settings: &DownloadSettings,
) -> Result<DownloadReport, DriverError>
where
    S: BrowserSession + ?Sized,
    K: KeyboardAutomation + ?Sized,
{
    fs::create_dir_all(&settings.book_dir)?;
    let main_handle = session.window_handles()?.into_iter().next().ok_or_else(|| {
        DriverError::Transport("browser session has no open window".to_string())
    })?;

    let mut report = DownloadReport::default();
    for (index, url) in chapter_urls.iter().enumerate() {
        let file_name = chapter_file_name(index, title);
        let target = settings.book_dir.join(&file_name);
        if target.exists() {
            debug!("Skipping existing chapter {}", target.display());
            report.skipped.push(target);
            continue;
        }

        let Some(url) = url else {
            error!("Chapter {index} of {title} has no stream URL");
            report.failed.push((index, None));
            continue;
        };

        let outcome = download_in_new_tab(
            session,
            keyboard,
            settings,
            &main_handle,
            url,
            &file_name,
            &target,
        )?;
        match outcome {
            ChapterOutcome::Saved => {
                info!("Saved {}", target.display());
                report.saved.push(target);
                continue;
            }
            ChapterOutcome::Missing => error!(
                "Download failed after {} attempts for URL: {}",
                settings.max_attempts, url
            ),
            ChapterOutcome::NotStarted(reason) => {
                error!("Chapter {index} was not downloaded ({reason}) URL: {url}")
            }
        }
        report.failed.push((index, Some(url.clone())));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{copy_into_place, download_chapters, move_file, partial_path, DownloadSettings};
    use crate::config::AutomationConfig;
    use crate::keyboard::{Key, KeyboardAutomation};
    use crate::webdriver::testing::FakePlayerBrowser;
    use crate::webdriver::Wait;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    /// Records keystrokes; the final Enter after typing "saves" the typed name.
    struct SavingKeyboard {
        download_dir: PathBuf,
        saves_files: bool,
        typed: String,
        events: Vec<String>,
    }

    impl SavingKeyboard {
        fn new(download_dir: &Path, saves_files: bool) -> Self {
            Self {
                download_dir: download_dir.to_path_buf(),
                saves_files,
                typed: String::new(),
                events: Vec::new(),
            }
        }
    }

    impl KeyboardAutomation for SavingKeyboard {
        fn press(&mut self, key: Key, presses: u32, _interval: Duration) -> Result<(), String> {
            self.events.push(format!("{key:?}x{presses}"));
            if key == Key::Enter && presses == 1 && !self.typed.is_empty() {
                if self.saves_files {
                    fs::write(self.download_dir.join(&self.typed), b"ID3")
                        .map_err(|err| err.to_string())?;
                }
                self.typed.clear();
            }
            Ok(())
        }

        fn type_text(&mut self, text: &str, _interval: Duration) -> Result<(), String> {
            self.events.push(format!("type:{text}"));
            self.typed = text.to_string();
            Ok(())
        }
    }

    struct BrokenKeyboard;

    impl KeyboardAutomation for BrokenKeyboard {
        fn press(&mut self, _key: Key, _presses: u32, _interval: Duration) -> Result<(), String> {
            Err("no display".to_string())
        }

        fn type_text(&mut self, _text: &str, _interval: Duration) -> Result<(), String> {
            Err("no display".to_string())
        }
    }

    fn unique_temp_dir(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("audio_collector_{name}_{nonce}"));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn instant_automation() -> AutomationConfig {
        AutomationConfig {
            page_settle_ms: 0,
            key_interval_ms: 0,
            after_tabs_ms: 0,
            after_enter_ms: 0,
            type_interval_ms: 0,
            after_typing_ms: 0,
            ..AutomationConfig::default()
        }
    }

    fn settings(root: &Path) -> DownloadSettings {
        DownloadSettings {
            download_dir: root.join("downloads"),
            book_dir: root.join("library").join("Book"),
            attempt_wait: Wait::new(Duration::from_millis(30), Duration::from_millis(2)),
            max_attempts: 3,
            automation: instant_automation(),
        }
    }

    fn urls(items: &[&str]) -> Vec<Option<String>> {
        items.iter().map(|url| Some(url.to_string())).collect()
    }

    #[test]
    fn test_download_chapters_moves_saved_files_into_book_folder() {
        let root = unique_temp_dir("download_ok");
        let settings = settings(&root);
        fs::create_dir_all(&settings.download_dir).expect("download dir");
        let mut browser = FakePlayerBrowser::with_chapters(&[]);
        let mut keyboard = SavingKeyboard::new(&settings.download_dir, true);
        let urls = urls(&["https://cdn.test/1.mp3", "https://cdn.test/2.mp3"]);

        let report = download_chapters(&mut browser, &mut keyboard, &urls, "Book", &settings)
            .expect("download should succeed");

        assert!(report.is_complete());
        assert_eq!(report.saved.len(), 2);
        assert!(settings.book_dir.join("Chapter 0 - Book.mp3").is_file());
        assert!(settings.book_dir.join("Chapter 1 - Book.mp3").is_file());
        assert!(!settings.download_dir.join("Chapter 0 - Book.mp3").exists());
        assert_eq!(
            &keyboard.events[..4],
            &["Tabx5", "Enterx2", "type:Chapter 0 - Book.mp3", "Enterx1"]
        );
        assert_eq!(
            browser.visited,
            vec!["https://cdn.test/1.mp3", "https://cdn.test/2.mp3"]
        );
        assert_eq!(browser.closed_windows, vec!["tab-1", "tab-2"]);
        assert_eq!(browser.current_handle, "main");

        fs::remove_dir_all(root).expect("temp dir should be removable");
    }

    #[test]
    fn test_download_chapters_reports_missing_files_after_retries() {
        let root = unique_temp_dir("download_missing");
        let settings = settings(&root);
        fs::create_dir_all(&settings.download_dir).expect("download dir");
        let mut browser = FakePlayerBrowser::with_chapters(&[]);
        let mut keyboard = SavingKeyboard::new(&settings.download_dir, false);
        let urls = urls(&["https://cdn.test/lost.mp3"]);

        let report = download_chapters(&mut browser, &mut keyboard, &urls, "Book", &settings)
            .expect("download should finish");

        assert!(!report.is_complete());
        assert_eq!(
            report.failed,
            vec![(0, Some("https://cdn.test/lost.mp3".to_string()))]
        );
        assert_eq!(browser.closed_windows, vec!["tab-1"]);
        assert_eq!(browser.current_handle, "main");

        fs::remove_dir_all(root).expect("temp dir should be removable");
    }

    #[test]
    fn test_download_chapters_records_dialog_failure_and_moves_on() {
        let root = unique_temp_dir("download_dialog");
        let settings = settings(&root);
        fs::create_dir_all(&settings.download_dir).expect("download dir");
        let mut browser = FakePlayerBrowser::with_chapters(&[]);
        let urls = urls(&["https://cdn.test/1.mp3", "https://cdn.test/2.mp3"]);

        let report = download_chapters(&mut browser, &mut BrokenKeyboard, &urls, "Book", &settings)
            .expect("download should finish");

        assert_eq!(report.failed.len(), 2);
        assert!(report.saved.is_empty());
        assert_eq!(browser.closed_windows, vec!["tab-1", "tab-2"]);
        assert_eq!(browser.current_handle, "main");

        fs::remove_dir_all(root).expect("temp dir should be removable");
    }

    #[test]
    fn test_download_chapters_fails_chapter_without_url_and_keeps_numbering() {
        let root = unique_temp_dir("download_no_url");
        let settings = settings(&root);
        fs::create_dir_all(&settings.download_dir).expect("download dir");
        let mut browser = FakePlayerBrowser::with_chapters(&[]);
        let mut keyboard = SavingKeyboard::new(&settings.download_dir, true);
        let urls = vec![None, Some("https://cdn.test/2.mp3".to_string())];

        let report = download_chapters(&mut browser, &mut keyboard, &urls, "Book", &settings)
            .expect("download should finish");

        assert_eq!(report.failed, vec![(0, None)]);
        assert!(!settings.book_dir.join("Chapter 0 - Book.mp3").exists());
        assert!(settings.book_dir.join("Chapter 1 - Book.mp3").is_file());
        assert_eq!(browser.visited, vec!["https://cdn.test/2.mp3"]);

        fs::remove_dir_all(root).expect("temp dir should be removable");
    }

    #[test]
    fn test_download_chapters_skips_chapters_already_in_book_folder() {
        let root = unique_temp_dir("download_skip");
        let settings = settings(&root);
        fs::create_dir_all(&settings.book_dir).expect("book dir");
        fs::write(settings.book_dir.join("Chapter 0 - Book.mp3"), b"ID3").expect("fixture");
        let mut browser = FakePlayerBrowser::with_chapters(&[]);
        let mut keyboard = SavingKeyboard::new(&settings.download_dir, true);
        let urls = urls(&["https://cdn.test/1.mp3"]);

        let report = download_chapters(&mut browser, &mut keyboard, &urls, "Book", &settings)
            .expect("download should succeed");

        assert_eq!(report.skipped.len(), 1);
        assert!(report.saved.is_empty());
        assert!(keyboard.events.is_empty());
        assert!(browser.visited.is_empty());

        fs::remove_dir_all(root).expect("temp dir should be removable");
    }

    #[test]
    fn test_move_file_replaces_source() {
        let root = unique_temp_dir("move_file");
        let from = root.join("a.mp3");
        let to = root.join("b.mp3");
        fs::write(&from, b"data").expect("fixture");
        move_file(&from, &to).expect("move should succeed");
        assert!(!from.exists());
        assert_eq!(fs::read(&to).expect("read"), b"data");
        fs::remove_dir_all(root).expect("temp dir should be removable");
    }

    #[test]
    fn test_copy_into_place_leaves_no_partial_files() {
        let root = unique_temp_dir("copy_into_place");
        let from = root.join("Chapter 0 - Book.mp3");
        let to = root.join("book").join("Chapter 0 - Book.mp3");
        fs::create_dir_all(root.join("book")).expect("book dir");
        fs::write(&from, b"data").expect("fixture");
        fs::write(partial_path(&to), b"stale").expect("stale partial");

        copy_into_place(&from, &to).expect("copy should succeed");

        assert_eq!(fs::read(&to).expect("read"), b"data");
        assert!(!partial_path(&to).exists());
        assert!(from.exists());
        fs::remove_dir_all(root).expect("temp dir should be removable");
    }

    #[test]
    fn test_failed_copy_never_creates_target() {
        let root = unique_temp_dir("copy_failure");
        let from = root.join("missing.mp3");
        let to = root.join("Chapter 0 - Book.mp3");

        assert!(copy_into_place(&from, &to).is_err());

        assert!(!to.exists());
        assert!(!partial_path(&to).exists());
        assert_eq!(
            partial_path(&to).file_name().and_then(|name| name.to_str()),
            Some("Chapter 0 - Book.mp3.part")
        );
        fs::remove_dir_all(root).expect("temp dir should be removable");
    }
}
