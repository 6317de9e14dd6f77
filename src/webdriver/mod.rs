//! Browser automation seam.
//!
//! The batch steps talk to a [`BrowserSession`]; production runs use the W3C
//! WebDriver client backed by a spawned chromedriver, tests use fakes.

pub mod chromedriver_process;
pub mod client;
#[cfg(test)]
pub mod testing;

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

/// Opaque reference to an element inside the current browsing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// Element lookup strategies used by the scraper and downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    TagName(String),
    XPath(String),
}

impl Locator {
    pub fn id(id: &str) -> Self {
        Locator::Id(id.to_string())
    }

    pub fn tag_name(name: &str) -> Self {
        Locator::TagName(name.to_string())
    }

    pub fn xpath(expression: &str) -> Self {
        Locator::XPath(expression.to_string())
    }

    /// W3C `using`/`value` pair. WebDriver has no id strategy, so ids become CSS.
    pub fn strategy(&self) -> (&'static str, String) {
        match self {
            Locator::Id(id) => ("css selector", format!("#{id}")),
            Locator::TagName(name) => ("tag name", name.clone()),
            Locator::XPath(expression) => ("xpath", expression.clone()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "id={id}"),
            Locator::TagName(name) => write!(f, "tag={name}"),
            Locator::XPath(expression) => write!(f, "xpath={expression}"),
        }
    }
}

/// Failures surfaced by browser automation.
#[derive(Debug)]
pub enum DriverError {
    /// A wait elapsed without its condition holding.
    Timeout(String),
    NoSuchElement(String),
    /// The driver answered with a protocol error.
    WebDriver { error: String, message: String },
    /// The driver couldn't be reached or answered with something unreadable.
    Transport(String),
    Io(std::io::Error),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout(_))
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Timeout(what) => write!(f, "timed out waiting for {what}"),
            DriverError::NoSuchElement(what) => write!(f, "no such element: {what}"),
            DriverError::WebDriver { error, message } => {
                write!(f, "webdriver error ({error}): {message}")
            }
            DriverError::Transport(message) => write!(f, "webdriver transport error: {message}"),
            DriverError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err)
    }
}

/// Minimal browser surface the batch steps depend on.
pub trait BrowserSession {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError>;
    fn find_element(&mut self, locator: &Locator) -> Result<ElementRef, DriverError>;
    fn find_child_elements(
        &mut self,
        parent: &ElementRef,
        locator: &Locator,
    ) -> Result<Vec<ElementRef>, DriverError>;
    fn is_displayed(&mut self, element: &ElementRef) -> Result<bool, DriverError>;
    fn property(&mut self, element: &ElementRef, name: &str)
        -> Result<Option<String>, DriverError>;
    /// Runs a synchronous script; `args` become `arguments[..]`.
    fn execute_script(
        &mut self,
        script: &str,
        args: &[ElementRef],
    ) -> Result<serde_json::Value, DriverError>;
    fn window_handles(&mut self) -> Result<Vec<String>, DriverError>;
    fn switch_to_window(&mut self, handle: &str) -> Result<(), DriverError>;
    /// Closes the current window or tab.
    fn close_window(&mut self) -> Result<(), DriverError>;
    fn quit(&mut self) -> Result<(), DriverError>;
}

/// Polling wait in the style of a WebDriver explicit wait.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Wait {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Polls `condition` until it yields a value. `NoSuchElement` counts as
    /// not ready yet; other errors end the wait.
    pub fn until<T, F>(&self, description: &str, mut condition: F) -> Result<T, DriverError>
    where
        F: FnMut() -> Result<Option<T>, DriverError>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            match condition() {
                Ok(Some(value)) => return Ok(value),
                Ok(None) | Err(DriverError::NoSuchElement(_)) => {}
                Err(err) => return Err(err),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::Timeout(description.to_string()));
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    pub fn present<S: BrowserSession + ?Sized>(
        &self,
        session: &mut S,
        locator: &Locator,
    ) -> Result<ElementRef, DriverError> {
        self.until(&format!("{locator} to be present"), || {
            session.find_element(locator).map(Some)
        })
    }

    pub fn visible<S: BrowserSession + ?Sized>(
        &self,
        session: &mut S,
        locator: &Locator,
    ) -> Result<ElementRef, DriverError> {
        self.until(&format!("{locator} to be visible"), || {
            let element = session.find_element(locator)?;
            if session.is_displayed(&element)? {
                Ok(Some(element))
            } else {
                Ok(None)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DriverError, Locator, Wait};
    use std::time::Duration;

    #[test]
    fn test_locator_id_maps_to_css_selector() {
        assert_eq!(
            Locator::id("plList").strategy(),
            ("css selector", "#plList".to_string())
        );
        assert_eq!(
            Locator::xpath("//*[@id='audio1']").strategy(),
            ("xpath", "//*[@id='audio1']".to_string())
        );
    }

    #[test]
    fn test_wait_returns_once_condition_holds() {
        let wait = Wait::new(Duration::from_secs(2), Duration::from_millis(1));
        let mut calls = 0;
        let value = wait
            .until("third call", || {
                calls += 1;
                if calls < 3 {
                    Err(DriverError::NoSuchElement("not yet".to_string()))
                } else {
                    Ok(Some(calls))
                }
            })
            .expect("wait should succeed");
        assert_eq!(value, 3);
    }

    #[test]
    fn test_wait_times_out() {
        let wait = Wait::new(Duration::from_millis(20), Duration::from_millis(5));
        let result: Result<(), DriverError> = wait.until("never", || Ok(None));
        assert!(result.expect_err("wait should time out").is_timeout());
    }

    #[test]
    fn test_wait_propagates_hard_errors() {
        let wait = Wait::new(Duration::from_secs(5), Duration::from_millis(1));
        let result: Result<(), DriverError> = wait.until("broken", || {
            Err(DriverError::Transport("connection refused".to_string()))
        });
        assert!(matches!(result, Err(DriverError::Transport(_))));
    }
}
