//! Run configuration.

use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5173";

/// Everything the orchestrator needs to drive one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Base URL of the server under test.
    pub base_url: String,
    /// Number of simulated actors to spawn.
    pub users: usize,
    /// Measured run length, excluding setup and grace period.
    pub duration: Duration,
    /// Run-wide action budget shared by every actor.
    pub requests_per_minute: u32,
    /// Time allowed for in-flight notifications after actions stop.
    pub grace_period: Duration,
    /// Admin account used to provision the board. Generated when absent.
    pub admin_email: Option<String>,
    /// Log actor and correlator activity at debug level.
    pub verbose: bool,
    /// Log every request and decoded event at trace level. Implies `verbose`.
    pub debug: bool,

    /// Delay between two actor spawns.
    pub spawn_stagger: Duration,
    /// Upper bound for the event stream handshake.
    pub handshake_timeout: Duration,
    /// Period of the monitoring snapshot.
    pub monitor_interval: Duration,
    /// Capacity of each actor's inbound event queue.
    pub event_queue_capacity: usize,
    /// Pause before provisioning, lets earlier runs' rate windows expire.
    pub setup_delay: Duration,
    /// Pause between announcing the board and spawning actors.
    pub start_delay: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            users: 45,
            duration: Duration::from_secs(5 * 60),
            requests_per_minute: 30,
            grace_period: Duration::from_secs(5),
            admin_email: None,
            verbose: false,
            debug: false,
            spawn_stagger: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(10),
            event_queue_capacity: 100,
            setup_delay: Duration::from_secs(2),
            start_delay: Duration::from_secs(3),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("invalid base URL `{}`: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "base URL must be http or https, got `{}`",
                url.scheme()
            )));
        }
        if self.users == 0 {
            return Err(Error::config("at least one user is required"));
        }
        if self.requests_per_minute == 0 {
            return Err(Error::config("requests per minute must be positive"));
        }
        if self.duration.is_zero() {
            return Err(Error::config("test duration must be positive"));
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::config("event queue capacity must be positive"));
        }
        Ok(())
    }

    /// Period of the run-wide action ticker, at millisecond resolution.
    pub fn tick_interval(&self) -> Duration {
        let millis = (60.0 / self.requests_per_minute as f64 * 1000.0) as u64;
        Duration::from_millis(millis.max(1))
    }

    /// Tracing filter directive for the requested verbosity, `None` to leave
    /// the choice to the environment.
    pub fn log_directive(&self) -> Option<&'static str> {
        if self.debug {
            Some("info,beatload=trace")
        } else if self.verbose {
            Some("info,beatload=debug")
        } else {
            None
        }
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Browser URL of a board, for watching the run live.
    pub fn board_url(&self, board_id: &str) -> String {
        format!("{}/board/{}", self.base(), board_id)
    }
}
