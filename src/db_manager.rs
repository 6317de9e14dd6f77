use crate::audiobook::{Audiobook, NewAudiobook, StatusFlag};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const AUDIOBOOK_COLUMNS: &str =
    "id, title, author, series_name, book_number, url, user, downloaded, edited";

pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    rusqlite::Error::InvalidPath(
                        format!("{} ({})", parent.display(), err).into(),
                    )
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        debug!("Opened audiobook store at {}", db_path.display());
        Self::from_connection(conn)
    }

    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        db_manager.migrate()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS audiobooks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                series_name TEXT,
                book_number INT,
                url TEXT NOT NULL,
                user TEXT NOT NULL,
                downloaded BOOLEAN NOT NULL DEFAULT 0,
                edited BOOLEAN NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        // Stores created before tagging was tracked lack the edited column
        let mut stmt = self.conn.prepare("PRAGMA table_info(audiobooks)")?;
        let columns = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut has_edited = false;
        for col in columns {
            if col? == "edited" {
                has_edited = true;
                break;
            }
        }

        if !has_edited {
            info!("Adding edited column to audiobook store");
            self.conn.execute(
                "ALTER TABLE audiobooks ADD COLUMN edited BOOLEAN NOT NULL DEFAULT 0",
                [],
            )?;
        }
        Ok(())
    }

    fn audiobook_from_row(row: &Row<'_>) -> Result<Audiobook, rusqlite::Error> {
        Ok(Audiobook {
            id: row.get(0)?,
            title: row.get(1)?,
            author: row.get(2)?,
            series_name: row.get(3)?,
            book_number: row.get(4)?,
            url: row.get(5)?,
            user: row.get(6)?,
            downloaded: row.get(7)?,
            edited: row.get(8)?,
        })
    }

    pub fn add_audiobook(&self, book: &NewAudiobook) -> Result<i64, rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO audiobooks (title, author, series_name, book_number, url, user, downloaded, edited)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0)",
            params![
                book.title,
                book.author,
                book.series_name,
                book.book_number,
                book.url,
                book.user
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_audiobooks(&mut self, books: &[NewAudiobook]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO audiobooks (title, author, series_name, book_number, url, user, downloaded, edited)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0)",
            )?;
            for book in books {
                stmt.execute(params![
                    book.title,
                    book.author,
                    book.series_name,
                    book.book_number,
                    book.url,
                    book.user
                ])?;
            }
        }
        tx.commit()
    }

    /// Whether a book with this title and author is stored.
    pub fn has_audiobook(&self, title: &str, author: &str) -> Result<bool, rusqlite::Error> {
        Ok(self
            .get_audiobooks_by_title(title)?
            .iter()
            .any(|stored| stored.author == author))
    }

    /// Inserts the books that aren't stored yet. A book is already stored when
    /// a row with the same title and author exists. Returns the number inserted.
    pub fn add_missing_audiobooks(
        &mut self,
        books: &[NewAudiobook],
    ) -> Result<usize, rusqlite::Error> {
        let mut to_add = Vec::new();
        for book in books {
            let already_stored = self.has_audiobook(&book.title, &book.author)?;
            let already_queued = to_add
                .iter()
                .any(|queued: &NewAudiobook| queued.title == book.title && queued.author == book.author);
            if already_stored || already_queued {
                debug!("Skipping stored audiobook: {} by {}", book.title, book.author);
                continue;
            }
            to_add.push(book.clone());
        }

        if to_add.is_empty() {
            info!("No new books to add");
            return Ok(0);
        }

        self.add_audiobooks(&to_add)?;
        info!("Added {} new audiobook(s)", to_add.len());
        Ok(to_add.len())
    }

    pub fn get_audiobooks_by_flag(
        &self,
        flag: StatusFlag,
        value: bool,
    ) -> Result<Vec<Audiobook>, rusqlite::Error> {
        let sql = format!(
            "SELECT {AUDIOBOOK_COLUMNS} FROM audiobooks WHERE {} = ?1 ORDER BY id ASC",
            flag.column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let book_iter = stmt.query_map(params![value], Self::audiobook_from_row)?;

        let mut books = Vec::new();
        for book in book_iter {
            books.push(book?);
        }
        Ok(books)
    }

    pub fn get_audiobooks_by_title(&self, title: &str) -> Result<Vec<Audiobook>, rusqlite::Error> {
        let sql =
            format!("SELECT {AUDIOBOOK_COLUMNS} FROM audiobooks WHERE title = ?1 ORDER BY id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let book_iter = stmt.query_map(params![title], Self::audiobook_from_row)?;

        let mut books = Vec::new();
        for book in book_iter {
            books.push(book?);
        }
        Ok(books)
    }

    pub fn get_all_audiobooks(&self) -> Result<Vec<Audiobook>, rusqlite::Error> {
        let sql = format!("SELECT {AUDIOBOOK_COLUMNS} FROM audiobooks ORDER BY id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let book_iter = stmt.query_map([], Self::audiobook_from_row)?;

        let mut books = Vec::new();
        for book in book_iter {
            books.push(book?);
        }
        Ok(books)
    }

    pub fn get_audiobook(&self, id: i64) -> Result<Option<Audiobook>, rusqlite::Error> {
        let sql = format!("SELECT {AUDIOBOOK_COLUMNS} FROM audiobooks WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], Self::audiobook_from_row)
            .optional()
    }

    pub fn get_last_book_number_in_series(
        &self,
        series_name: &str,
    ) -> Result<Option<u32>, rusqlite::Error> {
        self.conn.query_row(
            "SELECT MAX(book_number) FROM audiobooks WHERE series_name = ?1",
            params![series_name],
            |row| row.get::<_, Option<u32>>(0),
        )
    }

    /// Sets a progress flag. Returns false when no row has the id.
    pub fn mark_audiobook_flag(
        &self,
        flag: StatusFlag,
        audiobook_id: i64,
        value: bool,
    ) -> Result<bool, rusqlite::Error> {
        let sql = format!("UPDATE audiobooks SET {} = ?1 WHERE id = ?2", flag.column());
        let updated = self.conn.execute(&sql, params![value, audiobook_id])?;
        Ok(updated > 0)
    }
}
