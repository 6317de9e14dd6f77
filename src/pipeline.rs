//! Batch steps: queue books, download pending books, tag downloaded books.

use std::path::PathBuf;

use log::{error, info, warn};

use crate::audiobook::{sanitize_file_component, Audiobook, NewAudiobook, StatusFlag};
use crate::config::Config;
use crate::db_manager::DbManager;
use crate::downloader::{download_chapters, DownloadSettings};
use crate::keyboard::KeyboardAutomation;
use crate::metadata_editor::edit_book_metadata;
use crate::scraper::scrape_chapter_urls;
use crate::webdriver::chromedriver_process::ChromeDriverProcess;
use crate::webdriver::client::{ChromeSessionOptions, WebDriverClient};
use crate::webdriver::{BrowserSession, DriverError, Wait};

/// Starts a fresh browser session per book.
pub trait BrowserLauncher {
    fn launch(&mut self) -> Result<Box<dyn BrowserSession>, DriverError>;
}

/// Launches Chrome through a chromedriver spawned from the configured path.
pub struct ChromeLauncher<'a> {
    config: &'a Config,
}

impl<'a> ChromeLauncher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

impl BrowserLauncher for ChromeLauncher<'_> {
    fn launch(&mut self) -> Result<Box<dyn BrowserSession>, DriverError> {
        let browser = &self.config.browser;
        let process = ChromeDriverProcess::spawn(
            &self.config.paths.driver_path,
            browser.webdriver_port,
            std::time::Duration::from_secs(browser.driver_startup_timeout_secs),
        )?;
        let client = WebDriverClient::start_chrome(
            process.base_url(),
            &ChromeSessionOptions {
                download_dir: &self.config.paths.download_dir,
                extra_args: &browser.extra_args,
                implicit_wait: std::time::Duration::from_millis(browser.implicit_wait_ms),
            },
        )?;
        Ok(Box::new(client.with_driver_process(process)))
    }
}

/// Folder a book's chapters are saved in, when its user is configured.
pub fn book_folder(config: &Config, book: &Audiobook) -> Option<PathBuf> {
    match config.user_library_path(&book.user) {
        Some(library) => Some(library.join(sanitize_file_component(&book.title))),
        None => {
            warn!(
                "Audiobook doesn't have a set user for path: {} ({})",
                book.user, book.title
            );
            None
        }
    }
}

fn store_error(err: rusqlite::Error) -> String {
    format!("Audiobook store error: {err}")
}

/// Adds queued books that aren't stored yet. Returns how many were added.
pub fn queue_books(db_manager: &mut DbManager, books: &[NewAudiobook]) -> Result<usize, String> {
    db_manager.add_missing_audiobooks(books).map_err(store_error)
}

pub fn pending_downloads(db_manager: &DbManager) -> Result<Vec<Audiobook>, String> {
    db_manager
        .get_audiobooks_by_flag(StatusFlag::Downloaded, false)
        .map_err(store_error)
}

/// Downloads one book in its own browser session. Returns whether every
/// chapter is now in the book folder.
fn download_book(
    config: &Config,
    book: &Audiobook,
    book_dir: PathBuf,
    session: &mut dyn BrowserSession,
    keyboard: &mut dyn KeyboardAutomation,
) -> Result<bool, DriverError> {
    let page_wait = Wait::new(config.browser.page_timeout(), config.download.poll_interval());
    let attempt_wait = Wait::new(
        config.download.attempt_timeout(),
        config.download.poll_interval(),
    );

    let chapter_urls = scrape_chapter_urls(session, &book.url, &page_wait, &attempt_wait)?;
    if chapter_urls.is_empty() {
        warn!("No chapters found for {} at {}", book.title, book.url);
        return Ok(false);
    }

    let settings = DownloadSettings {
        download_dir: config.paths.download_dir.clone(),
        book_dir,
        attempt_wait,
        max_attempts: config.download.max_attempts.max(1),
        automation: config.automation.clone(),
    };
    let report = download_chapters(session, keyboard, &chapter_urls, &book.title, &settings)?;
    info!(
        "{}: {} saved, {} already present, {} failed",
        book.title,
        report.saved.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report.is_complete())
}

/// Downloads every book not yet marked downloaded. A book is marked once all
/// of its chapters are in its folder. Returns how many books were marked.
pub fn download_books(
    db_manager: &DbManager,
    config: &Config,
    launcher: &mut dyn BrowserLauncher,
    keyboard: &mut dyn KeyboardAutomation,
) -> Result<usize, String> {
    let mut completed = 0;
    for book in pending_downloads(db_manager)? {
        let Some(book_dir) = book_folder(config, &book) else {
            continue;
        };
        info!("Downloading {} into {}", book.title, book_dir.display());

        let mut session = match launcher.launch() {
            Ok(session) => session,
            Err(err) => {
                error!("Failed to start browser session for {}: {}", book.title, err);
                continue;
            }
        };
        let outcome = download_book(config, &book, book_dir, session.as_mut(), keyboard);
        if let Err(err) = session.quit() {
            warn!("Failed to close browser session: {err}");
        }

        match outcome {
            Ok(true) => {
                db_manager
                    .mark_audiobook_flag(StatusFlag::Downloaded, book.id, true)
                    .map_err(store_error)?;
                completed += 1;
            }
            Ok(false) => warn!("{} is incomplete and stays pending", book.title),
            Err(err) => error!("Download of {} failed: {}", book.title, err),
        }
    }
    Ok(completed)
}

/// Tags every downloaded book not yet marked edited. Returns how many books were marked.
pub fn edit_books(db_manager: &DbManager, config: &Config) -> Result<usize, String> {
    let pending = db_manager
        .get_audiobooks_by_flag(StatusFlag::Edited, false)
        .map_err(store_error)?;

    let mut completed = 0;
    for book in pending.into_iter().filter(|book| book.downloaded) {
        let Some(book_dir) = book_folder(config, &book) else {
            continue;
        };
        if !book_dir.is_dir() {
            warn!("Book folder {} is missing", book_dir.display());
            continue;
        }

        let report = match edit_book_metadata(&book_dir, &book, db_manager) {
            Ok(report) => report,
            Err(err) => {
                error!("Tagging {} failed: {}", book.title, err);
                continue;
            }
        };
        if report.tagged == 0 {
            warn!("No chapter files to tag in {}", book_dir.display());
            continue;
        }
        if !report.failed.is_empty() {
            continue;
        }

        db_manager
            .mark_audiobook_flag(StatusFlag::Edited, book.id, true)
            .map_err(store_error)?;
        completed += 1;
    }
    Ok(completed)
}
