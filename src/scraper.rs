//! Chapter URL enumeration on the audiobook player page.
//!
//! The player lists chapters in `#plList` and swaps the `#audio1` source each
//! time `#btnNext` is clicked, so stepping through the list once yields every
//! chapter's stream URL in order.

use log::{debug, info, warn};

use crate::webdriver::{BrowserSession, DriverError, Locator, Wait};

const PLAYLIST_ID: &str = "plList";
const NEXT_BUTTON_ID: &str = "btnNext";
const AUDIO_XPATH: &str = "//*[@id='audio1']";

const SCROLL_INTO_VIEW_SCRIPT: &str = "arguments[0].scrollIntoView(true);";
const CLICK_SCRIPT: &str = "arguments[0].click();";

/// The audio element's current non-empty `src`, if the element is there.
fn current_audio_src<S: BrowserSession + ?Sized>(
    session: &mut S,
) -> Result<Option<String>, DriverError> {
    let audio = match session.find_element(&Locator::xpath(AUDIO_XPATH)) {
        Ok(audio) => audio,
        Err(DriverError::NoSuchElement(_)) => return Ok(None),
        Err(err) => return Err(err),
    };
    Ok(session
        .property(&audio, "src")?
        .filter(|src| !src.trim().is_empty()))
}

/// Returns the stream URL of every chapter on the player page at `url`, in
/// playlist order. A chapter whose source never showed up is `None`.
///
/// `page_wait` bounds the waits for the playlist and next button;
/// `change_wait` bounds how long each chapter's source may take to appear.
pub fn scrape_chapter_urls<S: BrowserSession + ?Sized>(
    session: &mut S,
    url: &str,
    page_wait: &Wait,
    change_wait: &Wait,
) -> Result<Vec<Option<String>>, DriverError> {
    session.navigate(url)?;

    let playlist = page_wait.visible(session, &Locator::id(PLAYLIST_ID))?;
    let chapter_count = session
        .find_child_elements(&playlist, &Locator::tag_name("li"))?
        .len();
    info!("Found {chapter_count} chapter(s) at {url}");
    if chapter_count == 0 {
        return Ok(Vec::new());
    }

    let next_button = page_wait.visible(session, &Locator::id(NEXT_BUTTON_ID))?;
    session.execute_script(SCROLL_INTO_VIEW_SCRIPT, std::slice::from_ref(&next_button))?;

    let mut chapter_urls: Vec<Option<String>> = Vec::with_capacity(chapter_count);
    let mut previous: Option<String> = None;
    for index in 0..chapter_count {
        if index > 0 {
            session.execute_script(CLICK_SCRIPT, std::slice::from_ref(&next_button))?;
        }

        let changed = change_wait.until("chapter source to change", || {
            Ok(current_audio_src(session)?.filter(|src| previous.as_ref() != Some(src)))
        });
        let src = match changed {
            Ok(src) => Some(src),
            Err(err) if err.is_timeout() => {
                let src = current_audio_src(session)?;
                match &src {
                    Some(src) => warn!(
                        "Chapter {index} source did not change after clicking next. Keeping {src}"
                    ),
                    None => warn!("Chapter {index} never exposed a source"),
                }
                src
            }
            Err(err) => return Err(err),
        };
        debug!("Chapter {index} source: {src:?}");
        if src.is_some() {
            previous = src.clone();
        }
        chapter_urls.push(src);
    }

    Ok(chapter_urls)
}
