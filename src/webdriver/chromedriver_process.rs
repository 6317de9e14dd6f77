//! Spawns and supervises a local chromedriver.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::Value;

use crate::webdriver::DriverError;

/// A running chromedriver. The process is killed on drop.
pub struct ChromeDriverProcess {
    child: Child,
    base_url: String,
}

impl ChromeDriverProcess {
    pub fn spawn(
        driver_path: &Path,
        port: u16,
        startup_timeout: Duration,
    ) -> Result<Self, DriverError> {
        if !driver_path.is_file() {
            return Err(DriverError::Transport(format!(
                "chromedriver not found at {}",
                driver_path.display()
            )));
        }

        let child = Command::new(driver_path)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let mut process = Self {
            child,
            base_url: format!("http://127.0.0.1:{port}"),
        };
        info!(
            "Started chromedriver pid={} url={}",
            process.child.id(),
            process.base_url
        );
        process.wait_until_ready(startup_timeout)?;
        Ok(process)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn wait_until_ready(&mut self, startup_timeout: Duration) -> Result<(), DriverError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(500))
            .timeout_read(Duration::from_secs(2))
            .build();
        let status_url = format!("{}/status", self.base_url);
        let deadline = Instant::now() + startup_timeout;

        while Instant::now() < deadline {
            if let Some(exit_status) = self.child.try_wait()? {
                return Err(DriverError::Transport(format!(
                    "chromedriver exited during startup: {exit_status}"
                )));
            }

            match agent.get(&status_url).call() {
                Ok(response) => {
                    let ready = response
                        .into_json::<Value>()
                        .ok()
                        .and_then(|payload| payload["value"]["ready"].as_bool())
                        .unwrap_or(false);
                    if ready {
                        return Ok(());
                    }
                }
                Err(err) => debug!("chromedriver not ready yet: {err}"),
            }
            thread::sleep(Duration::from_millis(200));
        }

        Err(DriverError::Timeout("chromedriver to accept sessions".to_string()))
    }
}

impl Drop for ChromeDriverProcess {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            warn!("Failed to stop chromedriver: {err}");
        }
        let _ = self.child.wait();
    }
}
