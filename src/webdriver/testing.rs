//! In-process stand-in for the audiobook player page.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;

use crate::webdriver::{BrowserSession, DriverError, ElementRef, Locator};

/// Fake browser exposing a playlist, a next button and one audio element.
#[derive(Debug, Default)]
pub struct FakePlayerBrowser {
    pub chapter_srcs: Vec<String>,
    /// When false, clicking next leaves the audio source unchanged.
    pub next_advances: bool,
    /// `is_displayed` reports hidden for this many calls before turning visible.
    pub hidden_polls: usize,
    pub visited: Vec<String>,
    pub scripts: Vec<String>,
    pub handles: Vec<String>,
    pub current_handle: String,
    pub closed_windows: Vec<String>,
    /// Page has no `#audio1` element.
    pub audio_missing: bool,
    /// Quit count, shared with whoever launched the browser.
    pub quits: Rc<Cell<usize>>,
    current_chapter: usize,
    opened_tabs: usize,
}

impl FakePlayerBrowser {
    pub fn with_chapters(srcs: &[&str]) -> Self {
        Self {
            chapter_srcs: srcs.iter().map(|src| src.to_string()).collect(),
            next_advances: true,
            handles: vec!["main".to_string()],
            current_handle: "main".to_string(),
            ..Self::default()
        }
    }
}

impl BrowserSession for FakePlayerBrowser {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.visited.push(url.to_string());
        Ok(())
    }

    fn find_element(&mut self, locator: &Locator) -> Result<ElementRef, DriverError> {
        let found = match locator {
            Locator::Id(id) if id == "plList" || id == "btnNext" => Some(id.clone()),
            Locator::XPath(expression) if expression.contains("audio1") && !self.audio_missing => {
                Some("audio1".to_string())
            }
            Locator::TagName(name) if name == "body" => Some("body".to_string()),
            _ => None,
        };
        found
            .map(ElementRef)
            .ok_or_else(|| DriverError::NoSuchElement(locator.to_string()))
    }

    fn find_child_elements(
        &mut self,
        parent: &ElementRef,
        locator: &Locator,
    ) -> Result<Vec<ElementRef>, DriverError> {
        if parent.0 == "plList" && *locator == Locator::tag_name("li") {
            return Ok((0..self.chapter_srcs.len())
                .map(|index| ElementRef(format!("li-{index}")))
                .collect());
        }
        Ok(Vec::new())
    }

    fn is_displayed(&mut self, _element: &ElementRef) -> Result<bool, DriverError> {
        if self.hidden_polls > 0 {
            self.hidden_polls -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn property(
        &mut self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        if element.0 == "audio1" && name == "src" {
            return Ok(self.chapter_srcs.get(self.current_chapter).cloned());
        }
        Ok(None)
    }

    fn execute_script(
        &mut self,
        script: &str,
        _args: &[ElementRef],
    ) -> Result<Value, DriverError> {
        self.scripts.push(script.to_string());
        if script.contains(".click()")
            && self.next_advances
            && self.current_chapter + 1 < self.chapter_srcs.len()
        {
            self.current_chapter += 1;
        }
        if script.contains("window.open") {
            self.opened_tabs += 1;
            self.handles.push(format!("tab-{}", self.opened_tabs));
        }
        Ok(Value::Null)
    }

    fn window_handles(&mut self) -> Result<Vec<String>, DriverError> {
        Ok(self.handles.clone())
    }

    fn switch_to_window(&mut self, handle: &str) -> Result<(), DriverError> {
        if !self.handles.iter().any(|known| known == handle) {
            return Err(DriverError::WebDriver {
                error: "no such window".to_string(),
                message: handle.to_string(),
            });
        }
        self.current_handle = handle.to_string();
        Ok(())
    }

    fn close_window(&mut self) -> Result<(), DriverError> {
        let current = self.current_handle.clone();
        self.handles.retain(|handle| *handle != current);
        self.closed_windows.push(current);
        Ok(())
    }

    fn quit(&mut self) -> Result<(), DriverError> {
        self.quits.set(self.quits.get() + 1);
        Ok(())
    }
}
