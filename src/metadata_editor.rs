//! Rewrites chapter tags on a downloaded book, backed by `lofty`.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::read_from_path;
use lofty::tag::{ItemKey, Tag};

use crate::audiobook::Audiobook;
use crate::db_manager::DbManager;

pub const AUDIOBOOK_GENRE: &str = "Audiobook";

/// Tag values written to one chapter file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterTags {
    pub title: String,
    pub track_number: Option<u32>,
    pub artist: String,
    pub album: String,
    pub series_name: Option<String>,
    pub book_number: Option<u32>,
    /// Highest book number stored for the series.
    pub series_total: Option<u32>,
}

/// Result of tagging one book folder.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaggingReport {
    pub tagged: usize,
    pub failed: Vec<PathBuf>,
}

/// First run of digits in a file stem, e.g. `Chapter 12 - Book 3` -> 12.
pub fn chapter_number_from_stem(stem: &str) -> Option<u32> {
    let digits: String = stem
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Builds the tags for one chapter file of `book`.
pub fn chapter_tags(stem: &str, book: &Audiobook, series_total: Option<u32>) -> ChapterTags {
    let track_number = chapter_number_from_stem(stem);
    let title = match track_number {
        Some(number) => format!("Chapter {number}"),
        None => stem.to_string(),
    };
    ChapterTags {
        title,
        track_number,
        artist: book.author.clone(),
        album: book.title.clone(),
        series_name: book
            .series_name
            .clone()
            .filter(|series| !series.trim().is_empty()),
        book_number: book.book_number,
        series_total,
    }
}

/// Writes `tags` into `tag`, replacing earlier values.
pub fn apply_chapter_tags(tag: &mut Tag, tags: &ChapterTags) {
    tag.set_title(tags.title.clone());
    tag.set_artist(tags.artist.clone());
    tag.set_album(tags.album.clone());
    tag.set_genre(AUDIOBOOK_GENRE.to_string());

    match tags.track_number {
        Some(number) => tag.set_track(number),
        None => tag.remove_track(),
    }

    match &tags.series_name {
        Some(series) => {
            tag.insert_text(ItemKey::TrackSubtitle, series.clone());
        }
        None => {
            tag.remove_key(ItemKey::TrackSubtitle);
        }
    }

    tag.remove_disk();
    tag.remove_disk_total();
    if let Some(book_number) = tags.book_number {
        tag.set_disk(book_number);
        if let Some(total) = tags.series_total {
            tag.set_disk_total(total);
        }
    }
}

fn write_chapter_tags(path: &Path, tags: &ChapterTags) -> Result<(), String> {
    let mut tagged_file =
        read_from_path(path).map_err(|error| format!("Failed to read tags: {error}"))?;
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        debug!("Creating {:?} tag for {}", tag_type, path.display());
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| format!("No writable tag available for {:?}", tag_type))?;
    apply_chapter_tags(tag, tags);

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|error| format!("Failed to write tags: {error}"))
}

/// Mp3 files directly inside `folder`, sorted by path.
pub fn collect_chapter_files(folder: &Path) -> Result<Vec<PathBuf>, String> {
    let entries = std::fs::read_dir(folder)
        .map_err(|err| format!("Failed to read {}: {}", folder.display(), err))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(
                    "Failed to read a directory entry in {}: {}",
                    folder.display(),
                    err
                );
                continue;
            }
        };
        let path = entry.path();
        let is_mp3 = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
        if is_mp3 && path.is_file() {
            files.push(path);
        }
    }
    files.sort_unstable();
    Ok(files)
}

/// Tags every chapter file in `folder` for `book`.
pub fn edit_book_metadata(
    folder: &Path,
    book: &Audiobook,
    db_manager: &DbManager,
) -> Result<TaggingReport, String> {
    let series_total = match &book.series_name {
        Some(series) if !series.trim().is_empty() => db_manager
            .get_last_book_number_in_series(series)
            .map_err(|err| format!("Failed to look up series {series}: {err}"))?,
        _ => None,
    };

    let mut report = TaggingReport::default();
    for path in collect_chapter_files(folder)? {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let tags = chapter_tags(&stem, book, series_total);
        match write_chapter_tags(&path, &tags) {
            Ok(()) => {
                debug!("Metadata edited for {} ({})", path.display(), tags.title);
                report.tagged += 1;
            }
            Err(err) => {
                warn!("Failed to tag {}: {}", path.display(), err);
                report.failed.push(path);
            }
        }
    }

    info!(
        "Tagged {} chapter(s) of {} ({} failed)",
        report.tagged,
        book.title,
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{
        apply_chapter_tags, chapter_number_from_stem, chapter_tags, collect_chapter_files,
        edit_book_metadata, AUDIOBOOK_GENRE,
    };
    use crate::audiobook::{Audiobook, NewAudiobook};
    use crate::db_manager::DbManager;
    use lofty::file::TaggedFileExt;
    use lofty::prelude::Accessor;
    use lofty::read_from_path;
    use lofty::tag::{ItemKey, Tag, TagType};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("audio_collector_{name}_{nonce}"));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    /// Twenty silent MPEG-1 Layer III frames (128 kbps, 44.1 kHz), no tags.
    fn write_mp3_fixture(path: &Path) {
        let mut bytes = Vec::with_capacity(417 * 20);
        for _ in 0..20 {
            let mut frame = vec![0u8; 417];
            frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
            bytes.extend_from_slice(&frame);
        }
        fs::write(path, bytes).expect("mp3 fixture should be writable");
    }

    fn series_book(title: &str, number: u32) -> NewAudiobook {
        NewAudiobook {
            title: title.to_string(),
            author: "Haylock Jobson".to_string(),
            series_name: Some("Heretical Fishing".to_string()),
            book_number: Some(number),
            url: format!("https://example.test/{number}"),
            user: "Jackson".to_string(),
        }
    }

    fn book(series: Option<&str>, number: Option<u32>) -> Audiobook {
        Audiobook {
            id: 1,
            title: "Heretical Fishing - Book 3".to_string(),
            author: "Haylock Jobson".to_string(),
            series_name: series.map(str::to_string),
            book_number: number,
            url: "https://example.test/book".to_string(),
            user: "Jackson".to_string(),
            downloaded: true,
            edited: false,
        }
    }

    #[test]
    fn test_chapter_number_from_stem() {
        assert_eq!(chapter_number_from_stem("Chapter 12 - Book 3"), Some(12));
        assert_eq!(chapter_number_from_stem("Chapter 0 - Book 3"), Some(0));
        assert_eq!(chapter_number_from_stem("Prologue"), None);
        assert_eq!(chapter_number_from_stem("007 intro"), Some(7));
    }

    #[test]
    fn test_chapter_tags_fall_back_to_stem_without_number() {
        let tags = chapter_tags("Prologue", &book(None, None), None);
        assert_eq!(tags.title, "Prologue");
        assert_eq!(tags.track_number, None);
        assert_eq!(tags.album, "Heretical Fishing - Book 3");
        assert_eq!(tags.artist, "Haylock Jobson");
    }

    #[test]
    fn test_apply_chapter_tags_writes_series_and_part_of_set() {
        let tags = chapter_tags(
            "Chapter 4 - Heretical Fishing",
            &book(Some("Heretical Fishing"), Some(3)),
            Some(5),
        );
        let mut tag = Tag::new(TagType::Id3v2);
        apply_chapter_tags(&mut tag, &tags);

        assert_eq!(tag.title().as_deref(), Some("Chapter 4"));
        assert_eq!(tag.artist().as_deref(), Some("Haylock Jobson"));
        assert_eq!(tag.album().as_deref(), Some("Heretical Fishing - Book 3"));
        assert_eq!(tag.genre().as_deref(), Some(AUDIOBOOK_GENRE));
        assert_eq!(tag.track(), Some(4));
        assert_eq!(tag.disk(), Some(3));
        assert_eq!(tag.disk_total(), Some(5));
        assert_eq!(tag.get_string(ItemKey::TrackSubtitle), Some("Heretical Fishing"));
    }

    #[test]
    fn test_apply_chapter_tags_without_series_clears_stale_values() {
        let mut tag = Tag::new(TagType::Id3v2);
        tag.insert_text(ItemKey::TrackSubtitle, "Old Series".to_string());
        tag.set_disk(9);
        tag.set_disk_total(9);

        apply_chapter_tags(&mut tag, &chapter_tags("Chapter 1", &book(None, None), None));

        assert_eq!(tag.get_string(ItemKey::TrackSubtitle), None);
        assert_eq!(tag.disk(), None);
        assert_eq!(tag.disk_total(), None);
        assert_eq!(tag.track(), Some(1));
    }

    #[test]
    fn test_book_number_without_series_total() {
        let mut tag = Tag::new(TagType::Id3v2);
        apply_chapter_tags(
            &mut tag,
            &chapter_tags("Chapter 2", &book(Some("Series"), Some(2)), None),
        );
        assert_eq!(tag.disk(), Some(2));
        assert_eq!(tag.disk_total(), None);
    }

    #[test]
    fn test_collect_chapter_files_only_lists_mp3_in_folder() {
        let dir = unique_temp_dir("tags_listing");
        fs::create_dir_all(dir.join("nested")).expect("fixture dirs");
        fs::write(dir.join("Chapter 2 - B.mp3"), b"").expect("fixture");
        fs::write(dir.join("Chapter 1 - B.MP3"), b"").expect("fixture");
        fs::write(dir.join("cover.jpg"), b"").expect("fixture");
        fs::write(dir.join("nested").join("Chapter 9 - B.mp3"), b"").expect("fixture");

        let files = collect_chapter_files(&dir).expect("listing should succeed");
        let names: Vec<String> = files
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Chapter 1 - B.MP3", "Chapter 2 - B.mp3"]);

        fs::remove_dir_all(dir).expect("temp dir should be removable");
    }

    #[test]
    fn test_edit_book_metadata_creates_and_saves_tags() {
        let dir = unique_temp_dir("tags_write");
        let chapter = dir.join("Chapter 3 - Heretical Fishing.mp3");
        write_mp3_fixture(&chapter);
        fs::write(dir.join("notes.txt"), b"not audio").expect("fixture");

        let mut db = DbManager::new_in_memory().expect("failed to create in-memory db");
        db.add_audiobooks(&[
            series_book("Heretical Fishing - Book 2", 2),
            series_book("Heretical Fishing - Book 5", 5),
        ])
        .expect("insert should succeed");
        let book = db
            .get_audiobooks_by_title("Heretical Fishing - Book 2")
            .expect("query")
            .remove(0);

        let report = edit_book_metadata(&dir, &book, &db).expect("tagging should succeed");
        assert_eq!(report.tagged, 1);
        assert!(report.failed.is_empty());

        let tagged_file = read_from_path(&chapter).expect("tagged file should read");
        let tag = tagged_file.primary_tag().expect("an ID3v2 tag should be created");
        assert_eq!(tag.tag_type(), TagType::Id3v2);
        assert_eq!(tag.title().as_deref(), Some("Chapter 3"));
        assert_eq!(tag.artist().as_deref(), Some("Haylock Jobson"));
        assert_eq!(tag.album().as_deref(), Some("Heretical Fishing - Book 2"));
        assert_eq!(tag.genre().as_deref(), Some(AUDIOBOOK_GENRE));
        assert_eq!(tag.track(), Some(3));
        assert_eq!(tag.disk(), Some(2));
        assert_eq!(tag.disk_total(), Some(5));
        assert_eq!(tag.get_string(ItemKey::TrackSubtitle), Some("Heretical Fishing"));

        fs::remove_dir_all(dir).expect("temp dir should be removable");
    }
}
