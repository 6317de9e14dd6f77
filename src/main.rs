mod audiobook;
mod config;
mod config_persistence;
mod db_manager;
mod downloader;
mod driver_update;
mod keyboard;
mod metadata_editor;
mod pipeline;
mod scraper;
mod webdriver;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{info, warn};

use audiobook::{NewAudiobook, StatusFlag};
use config::Config;
use config_persistence::{
    append_book_to_queue_file, default_config_path, load_or_create_config, load_queue_file,
};
use db_manager::DbManager;
use driver_update::DriverUpdater;
use keyboard::EnigoKeyboard;
use pipeline::{download_books, edit_books, pending_downloads, queue_books, ChromeLauncher};

/// Collects audiobook chapters from a web player and tags them.
#[derive(Debug, Parser)]
#[command(name = "audio_collector", version)]
struct Args {
    /// Config file to use instead of the default location.
    #[arg(long, env = "AUDIO_COLLECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Queue, update the driver, download and tag (default).
    Run {
        #[arg(long)]
        skip_driver_update: bool,
    },
    /// Append a book to the queue file and store it.
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        series: Option<String>,
        #[arg(long)]
        book_number: Option<u32>,
    },
    /// Store queued books that aren't stored yet.
    Queue,
    /// Print stored books.
    List {
        /// Only books that still need downloading or tagging.
        #[arg(long)]
        pending: bool,
    },
    /// Download books not yet downloaded.
    Download,
    /// Tag downloaded books not yet tagged.
    Tag,
    /// Install the chromedriver matching the local Chrome.
    UpdateDriver,
    /// Clear a progress flag so the step runs again for a book.
    Reset {
        id: i64,
        #[arg(long, value_enum)]
        flag: StatusFlag,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn sync_queue(db_manager: &mut DbManager, config: &Config) -> Result<usize, String> {
    let books = load_queue_file(&config.paths.queue_path)?;
    queue_books(db_manager, &books)
}

fn update_driver(config: &Config) -> Result<String, String> {
    DriverUpdater::new(
        config.driver_update.clone(),
        config.paths.driver_path.clone(),
        config.paths.download_dir.clone(),
    )
    .update()
}

fn run_downloads(db_manager: &DbManager, config: &Config) -> Result<usize, String> {
    if pending_downloads(db_manager)?.is_empty() {
        info!("No books waiting to be downloaded");
        return Ok(0);
    }
    let mut keyboard = EnigoKeyboard::new()?;
    let mut launcher = ChromeLauncher::new(config);
    download_books(db_manager, config, &mut launcher, &mut keyboard)
}

fn run_all(
    db_manager: &mut DbManager,
    config: &Config,
    skip_driver_update: bool,
) -> Result<(), String> {
    sync_queue(db_manager, config)?;

    if skip_driver_update || !config.driver_update.enabled {
        info!("Skipping ChromeDriver update");
    } else if let Err(err) = update_driver(config) {
        warn!("ChromeDriver update failed, continuing with the installed driver: {err}");
    }

    let downloaded = run_downloads(db_manager, config)?;
    info!("Downloaded {downloaded} book(s)");
    let edited = edit_books(db_manager, config)?;
    info!("Tagged {edited} book(s)");
    Ok(())
}

fn print_books(db_manager: &DbManager, pending: bool) -> Result<(), rusqlite::Error> {
    for book in db_manager.get_all_audiobooks()? {
        if pending && book.downloaded && book.edited {
            continue;
        }
        let series = match (&book.series_name, book.book_number) {
            (Some(series), Some(number)) => format!(" [{series} #{number}]"),
            (Some(series), None) => format!(" [{series}]"),
            _ => String::new(),
        };
        println!(
            "{:>4}  {} - {}{}  user={} downloaded={} edited={}",
            book.id, book.title, book.author, series, book.user, book.downloaded, book.edited
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = load_or_create_config(&config_path)?;
    info!("Using config {}", config_path.display());

    let command = args.command.unwrap_or(Command::Run {
        skip_driver_update: false,
    });

    if let Command::Add {
        title,
        author,
        url,
        user,
        series,
        book_number,
    } = command
    {
        if config.user_library_path(&user).is_none() {
            warn!("User {user} has no library configured yet");
        }
        let book = NewAudiobook {
            title,
            author,
            series_name: series,
            book_number,
            url,
            user,
        };
        append_book_to_queue_file(&config.paths.queue_path, &book)?;
        info!(
            "Queued {} in {}",
            book.title,
            config.paths.queue_path.display()
        );
        let db_manager = DbManager::new(&config.paths.database_path)?;
        if !db_manager.has_audiobook(&book.title, &book.author)? {
            let id = db_manager.add_audiobook(&book)?;
            info!("Stored {} as book {id}", book.title);
        }
        return Ok(());
    }

    if let Command::UpdateDriver = command {
        let version = update_driver(&config)?;
        info!("ChromeDriver {version} ready");
        return Ok(());
    }

    let mut db_manager = DbManager::new(&config.paths.database_path)?;
    match command {
        Command::Run { skip_driver_update } => {
            run_all(&mut db_manager, &config, skip_driver_update)?
        }
        Command::Queue => {
            let added = sync_queue(&mut db_manager, &config)?;
            info!("Stored {added} new book(s)");
        }
        Command::List { pending } => print_books(&db_manager, pending)?,
        Command::Download => {
            let downloaded = run_downloads(&db_manager, &config)?;
            info!("Downloaded {downloaded} book(s)");
        }
        Command::Tag => {
            let edited = edit_books(&db_manager, &config)?;
            info!("Tagged {edited} book(s)");
        }
        Command::Reset { id, flag } => match db_manager.get_audiobook(id)? {
            Some(book) => {
                db_manager.mark_audiobook_flag(flag, id, false)?;
                info!("Cleared {} for {} ({id})", flag.column(), book.title);
            }
            None => warn!("No book with id {id}"),
        },
        Command::Add { .. } | Command::UpdateDriver => {}
    }
    Ok(())
}
