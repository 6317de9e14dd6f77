//! W3C WebDriver client backed by `ureq`.

use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde_json::{json, Value};

use crate::webdriver::chromedriver_process::ChromeDriverProcess;
use crate::webdriver::{BrowserSession, DriverError, ElementRef, Locator};

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Chrome launch preferences for a collection session.
#[derive(Debug, Clone)]
pub struct ChromeSessionOptions<'a> {
    pub download_dir: &'a Path,
    pub extra_args: &'a [String],
    pub implicit_wait: Duration,
}

/// Builds the `POST /session` body for Chrome.
///
/// The save prompt stays enabled so every chapter passes through the save
/// dialog, where it is given its final file name.
pub fn chrome_capabilities(options: &ChromeSessionOptions<'_>) -> Value {
    let mut args: Vec<String> = vec![
        "--start-maximized".to_string(),
        "--log-level=0".to_string(),
        "--dns-prefetch-disable".to_string(),
    ];
    args.extend(options.extra_args.iter().cloned());

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": args,
                    "excludeSwitches": ["enable-logging", "enable-automation"],
                    "useAutomationExtension": false,
                    "prefs": {
                        "download.default_directory": options.download_dir.to_string_lossy(),
                        "download.prompt_for_download": true,
                        "download.directory_upgrade": true,
                        "safebrowsing.enabled": true
                    }
                }
            }
        }
    })
}

fn element_body(element: &ElementRef) -> Value {
    json!({ ELEMENT_KEY: element.0 })
}

fn parse_element_reference(value: &Value) -> Option<ElementRef> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
}

/// Maps a W3C error payload (`{"value": {"error", "message"}}`) to a [`DriverError`].
pub fn driver_error_from_payload(payload: &Value) -> DriverError {
    let value = payload.get("value").unwrap_or(payload);
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match error.as_str() {
        "no such element" | "stale element reference" => DriverError::NoSuchElement(message),
        "timeout" | "script timeout" => DriverError::Timeout(message),
        _ => DriverError::WebDriver { error, message },
    }
}

/// A live WebDriver session. Dropping it ends the session, then stops the
/// driver process it was started on, if it owns one.
pub struct WebDriverClient {
    http_client: ureq::Agent,
    base_url: String,
    session_id: String,
    closed: bool,
    driver_process: Option<ChromeDriverProcess>,
}

impl WebDriverClient {
    /// Starts a Chrome session on the driver listening at `base_url`.
    pub fn start_chrome(
        base_url: &str,
        options: &ChromeSessionOptions<'_>,
    ) -> Result<Self, DriverError> {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(120))
            .timeout_write(Duration::from_secs(15))
            .build();
        let base_url = base_url.trim().trim_end_matches('/').to_string();

        let response = Self::send(
            http_client.post(&format!("{base_url}/session")),
            Some(chrome_capabilities(options)),
        )?;
        let session_id = response
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DriverError::Transport("new session response had no sessionId".to_string())
            })?
            .to_string();
        debug!("Started WebDriver session {session_id}");

        let mut client = Self {
            http_client,
            base_url,
            session_id,
            closed: false,
            driver_process: None,
        };
        client.set_implicit_wait(options.implicit_wait)?;
        Ok(client)
    }

    /// Ties the driver process's lifetime to this session.
    pub fn with_driver_process(mut self, process: ChromeDriverProcess) -> Self {
        self.driver_process = Some(process);
        self
    }

    fn send(request: ureq::Request, body: Option<Value>) -> Result<Value, DriverError> {
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        let payload: Value = match result {
            Ok(response) => response
                .into_json()
                .map_err(|err| DriverError::Transport(format!("unreadable response: {err}")))?,
            Err(ureq::Error::Status(code, response)) => {
                let payload: Value = response.into_json().map_err(|err| {
                    DriverError::Transport(format!("unreadable error response ({code}): {err}"))
                })?;
                return Err(driver_error_from_payload(&payload));
            }
            Err(err) => return Err(DriverError::Transport(err.to_string())),
        };
        Ok(payload.get("value").cloned().unwrap_or(Value::Null))
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }

    fn element_url(&self, element: &ElementRef, path: &str) -> String {
        self.session_url(&format!(
            "/element/{}{}",
            urlencoding::encode(&element.0),
            path
        ))
    }

    fn get(&self, url: &str) -> Result<Value, DriverError> {
        Self::send(self.http_client.get(url), None)
    }

    fn post(&self, url: &str, body: Value) -> Result<Value, DriverError> {
        Self::send(self.http_client.post(url), Some(body))
    }

    fn delete(&self, url: &str) -> Result<Value, DriverError> {
        Self::send(self.http_client.delete(url), None)
    }

    fn set_implicit_wait(&mut self, implicit_wait: Duration) -> Result<(), DriverError> {
        let url = self.session_url("/timeouts");
        self.post(&url, json!({ "implicit": implicit_wait.as_millis() as u64 }))?;
        Ok(())
    }

    fn locator_body(locator: &Locator) -> Value {
        let (using, value) = locator.strategy();
        json!({ "using": using, "value": value })
    }
}

impl BrowserSession for WebDriverClient {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        debug!("Navigating to {url}");
        let endpoint = self.session_url("/url");
        self.post(&endpoint, json!({ "url": url }))?;
        Ok(())
    }

    fn find_element(&mut self, locator: &Locator) -> Result<ElementRef, DriverError> {
        let url = self.session_url("/element");
        let value = self.post(&url, Self::locator_body(locator))?;
        parse_element_reference(&value).ok_or_else(|| DriverError::NoSuchElement(locator.to_string()))
    }

    fn find_child_elements(
        &mut self,
        parent: &ElementRef,
        locator: &Locator,
    ) -> Result<Vec<ElementRef>, DriverError> {
        let url = self.element_url(parent, "/elements");
        let value = self.post(&url, Self::locator_body(locator))?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(parse_element_reference).collect())
            .unwrap_or_default())
    }

    fn is_displayed(&mut self, element: &ElementRef) -> Result<bool, DriverError> {
        let url = self.element_url(element, "/displayed");
        Ok(self.get(&url)?.as_bool().unwrap_or(false))
    }

    fn property(
        &mut self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let url = self.element_url(element, &format!("/property/{}", urlencoding::encode(name)));
        Ok(self.get(&url)?.as_str().map(str::to_string))
    }

    fn execute_script(
        &mut self,
        script: &str,
        args: &[ElementRef],
    ) -> Result<Value, DriverError> {
        let url = self.session_url("/execute/sync");
        let args: Vec<Value> = args.iter().map(element_body).collect();
        self.post(&url, json!({ "script": script, "args": args }))
    }

    fn window_handles(&mut self) -> Result<Vec<String>, DriverError> {
        let url = self.session_url("/window/handles");
        Ok(self
            .get(&url)?
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn switch_to_window(&mut self, handle: &str) -> Result<(), DriverError> {
        let url = self.session_url("/window");
        self.post(&url, json!({ "handle": handle }))?;
        Ok(())
    }

    fn close_window(&mut self) -> Result<(), DriverError> {
        let url = self.session_url("/window");
        self.delete(&url)?;
        Ok(())
    }

    fn quit(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let url = self.session_url("");
        self.delete(&url)?;
        debug!("Ended WebDriver session {}", self.session_id);
        Ok(())
    }
}

impl Drop for WebDriverClient {
    fn drop(&mut self) {
        if let Err(err) = self.quit() {
            warn!("Failed to end WebDriver session {}: {}", self.session_id, err);
        }
    }
}
