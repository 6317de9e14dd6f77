use std::path::{Path, PathBuf};

use log::{info, warn};
use toml_edit::{value, ArrayOfTables, DocumentMut, Item, Table};

use crate::{audiobook::NewAudiobook, config::Config};

const QUEUE_FILE_NAME: &str = "books.toml";

const QUEUE_TEMPLATE: &str = "\
# Audiobooks to collect. Each entry is added to the store once; entries with
# a title and author that are already stored are skipped.
#
# [[books]]
# title = \"Heretical Fishing - Book 3\"
# author = \"Haylock Jobson\"
# series_name = \"Heretical Fishing\"
# book_number = 3
# url = \"https://tokybook.com/heretical-fishing-3\"
# user = \"Jackson\"
";

#[derive(Debug, Default, serde::Deserialize)]
struct QueueFile {
    #[serde(default)]
    books: Vec<NewAudiobook>,
}

/// Default config location under the user's config directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audio_collector")
        .join("config.toml")
}

fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create {}: {}", parent.display(), err)),
        _ => Ok(()),
    }
}

/// Loads the config file, writing a default one first when none exists.
pub fn load_or_create_config(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        ensure_parent_dir(path)?;
        let text = toml::to_string(&default_config)
            .map_err(|err| format!("Failed to serialize default config: {err}"))?;
        std::fs::write(path, text)
            .map_err(|err| format!("Failed to write {}: {}", path.display(), err))?;
    }

    let config_content = std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read {}: {}", path.display(), err))?;
    let mut config = toml::from_str::<Config>(&config_content)
        .map_err(|err| format!("Failed to parse {}: {}", path.display(), err))?;

    if config.paths.queue_path.as_os_str().is_empty() {
        config.paths.queue_path = path
            .parent()
            .map(|parent| parent.join(QUEUE_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(QUEUE_FILE_NAME));
    }
    if config.users.is_empty() {
        warn!(
            "No users configured in {}. Books can't be downloaded until a [users] entry exists.",
            path.display()
        );
    }
    Ok(config)
}

/// Reads queued books. A missing queue file is created from the template.
pub fn load_queue_file(path: &Path) -> Result<Vec<NewAudiobook>, String> {
    if !path.exists() {
        info!("Queue file not found. Creating template. path={}", path.display());
        ensure_parent_dir(path)?;
        std::fs::write(path, QUEUE_TEMPLATE)
            .map_err(|err| format!("Failed to write {}: {}", path.display(), err))?;
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read {}: {}", path.display(), err))?;
    let queue = toml::from_str::<QueueFile>(&content)
        .map_err(|err| format!("Failed to parse {}: {}", path.display(), err))?;
    Ok(queue.books)
}

fn book_table(book: &NewAudiobook) -> Table {
    let mut table = Table::new();
    table["title"] = value(book.title.clone());
    table["author"] = value(book.author.clone());
    if let Some(series_name) = &book.series_name {
        table["series_name"] = value(series_name.clone());
    }
    if let Some(book_number) = book.book_number {
        table["book_number"] = value(i64::from(book_number));
    }
    table["url"] = value(book.url.clone());
    table["user"] = value(book.user.clone());
    table
}

/// Appends a book to queue file text, leaving comments and existing entries untouched.
pub fn append_book_to_queue_text(existing_text: &str, book: &NewAudiobook) -> Result<String, String> {
    let mut document = existing_text
        .parse::<DocumentMut>()
        .map_err(|err| format!("Failed to parse queue file: {err}"))?;
    let root = document.as_table_mut();

    let has_books_array = matches!(root.get("books"), Some(item) if item.is_array_of_tables());
    if !has_books_array {
        if root.contains_key("books") {
            return Err("Queue file `books` entry must be an array of tables".to_string());
        }
        root.insert("books", Item::ArrayOfTables(ArrayOfTables::new()));
    }

    let books = root
        .get_mut("books")
        .and_then(Item::as_array_of_tables_mut)
        .ok_or_else(|| "Queue file `books` entry must be an array of tables".to_string())?;
    books.push(book_table(book));
    Ok(document.to_string())
}

/// Appends a book to the queue file on disk.
pub fn append_book_to_queue_file(path: &Path, book: &NewAudiobook) -> Result<(), String> {
    let existing_text = if path.exists() {
        std::fs::read_to_string(path)
            .map_err(|err| format!("Failed to read {}: {}", path.display(), err))?
    } else {
        ensure_parent_dir(path)?;
        QUEUE_TEMPLATE.to_string()
    };
    let next_text = append_book_to_queue_text(&existing_text, book)?;
    std::fs::write(path, next_text)
        .map_err(|err| format!("Failed to write {}: {}", path.display(), err))
}
