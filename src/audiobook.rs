//! Audiobook records shared by the store, the queue file, and the batch steps.

/// A stored audiobook row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audiobook {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub series_name: Option<String>,
    pub book_number: Option<u32>,
    pub url: String,
    pub user: String,
    pub downloaded: bool,
    pub edited: bool,
}

/// An audiobook waiting to be inserted, as listed in `books.toml`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct NewAudiobook {
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_number: Option<u32>,
    pub url: String,
    pub user: String,
}

/// Progress flags tracked per audiobook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusFlag {
    Downloaded,
    Edited,
}

impl StatusFlag {
    /// Column holding the flag in the `audiobooks` table.
    pub fn column(self) -> &'static str {
        match self {
            StatusFlag::Downloaded => "downloaded",
            StatusFlag::Edited => "edited",
        }
    }
}

/// Replaces characters that can't appear in a file name on the platforms the
/// browser save dialog runs on.
pub fn sanitize_file_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    cleaned.trim_end_matches(['.', ' ']).to_string()
}

/// File name a chapter is saved under, e.g. `Chapter 3 - Some Book.mp3`.
/// `index` is the chapter's 0-based position in the player's playlist.
pub fn chapter_file_name(index: usize, title: &str) -> String {
    format!("Chapter {} - {}.mp3", index, sanitize_file_component(title))
}
