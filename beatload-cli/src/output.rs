#[cfg(feature = "colored-output")]
use colored::*;
use beatload::{RunConfig, RunEnd, RunEvent, RunReport, StepStatus, Verdict};
use std::fmt::Write;
use std::time::Duration;

const RULE_WIDTH: usize = 70;

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn banner(&self) -> String {
        let rule = "═".repeat(RULE_WIDTH);
        format!(
            "{rule}\n{}\n{rule}\n",
            self.colorize("Beatload - real-time fan-out load test", Color::Green, true)
        )
    }

    pub fn format_config(&self, config: &RunConfig) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", self.colorize("Configuration:", Color::Green, true));
        let rows = [
            ("Base URL", config.base_url.clone()),
            ("Concurrent Users", config.users.to_string()),
            ("Test Duration", format_duration(config.duration)),
            (
                "Rate Limit",
                format!("{} requests/min", config.requests_per_minute),
            ),
            ("Grace Period", format_duration(config.grace_period)),
        ];
        for (label, value) in rows {
            let _ = writeln!(
                out,
                "  {}: {}",
                self.colorize(label, Color::Yellow, false),
                self.colorize(&value, Color::Cyan, false)
            );
        }
        out
    }

    /// Render one progress event; `None` for events that print nothing.
    pub fn format_event(&self, event: &RunEvent) -> Option<String> {
        let line = match event {
            RunEvent::SetupDelay(delay) => format!(
                "\n⏳ Waiting {} to avoid rate limits...",
                format_duration(*delay)
            ),
            RunEvent::SetupStep { status, message } => self.format_step(*status, message),
            RunEvent::BoardReady {
                url, start_delay, ..
            } => {
                let rule = "═".repeat(RULE_WIDTH);
                format!(
                    "\n{rule}\n\n   🔗 OPEN THIS URL IN YOUR BROWSER TO WATCH THE TEST:\n\n   {}\n\n\
                     {rule}\n\n⏳ Starting user connections in {}...",
                    self.colorize(url, Color::Blue, true),
                    format_duration(*start_delay)
                )
            }
            RunEvent::SpawningActors(n) => format!("\nSpawning {n} users..."),
            RunEvent::ActorConnected { .. } => return None,
            RunEvent::ActorFailed { id, reason } => format!(
                "{} user {id}: {reason}",
                self.colorize("✗", Color::Red, true)
            ),
            RunEvent::SpawnComplete {
                connected,
                requested,
                failed,
            } => {
                let mut line = format!(
                    "\n{} Connected {connected}/{requested} users",
                    self.colorize("✓", Color::Green, true)
                );
                if *failed > 0 {
                    let _ = write!(
                        line,
                        "\n{} {failed} connection failures",
                        self.colorize("✗", Color::Red, true)
                    );
                }
                line
            }
            RunEvent::MonitoringStarted => "\n🔍 Starting monitoring...\n".to_string(),
            RunEvent::Monitor(s) => format!(
                "[{:>3}s] Active: {}/{} | Events sent: {} | Events received: {} | Rate: {:.1}/s",
                s.elapsed.as_secs(),
                s.active_users,
                s.connected_users,
                s.sent,
                s.received,
                s.send_rate
            ),
            RunEvent::MeasurementEnded(RunEnd::Completed) => {
                "\n⏱ Test duration completed".to_string()
            }
            RunEvent::MeasurementEnded(RunEnd::Interrupted) => {
                "\n\n⏹ Interrupted".to_string()
            }
            RunEvent::StoppingActions => "\n[Cleanup] Stopping event generation...".to_string(),
            RunEvent::GracePeriod(grace) => format!(
                "[Cleanup] Grace period: waiting {} for pending events...",
                format_duration(*grace)
            ),
            RunEvent::DisconnectingActors => "[Cleanup] Disconnecting users...".to_string(),
        };
        Some(line)
    }

    fn format_step(&self, status: StepStatus, message: &str) -> String {
        match status {
            StepStatus::Working => format!("[Setup] {message}..."),
            StepStatus::Done => format!(
                "[Setup] {message}... {}",
                self.colorize("✓", Color::Green, true)
            ),
            StepStatus::Info => format!("ℹ [Setup] {message}"),
            StepStatus::Warning => format!(
                "{} [Setup] {message}",
                self.colorize("⚠", Color::Yellow, true)
            ),
        }
    }

    pub fn format_report(&self, report: &RunReport) -> String {
        let delivery = &report.delivery;
        let rule = "═".repeat(RULE_WIDTH);
        let mut out = String::new();

        let _ = writeln!(
            out,
            "\n{rule}\n{}\n{rule}\n",
            self.colorize("LOAD TEST RESULTS", Color::Green, true)
        );
        let _ = writeln!(out, "Test Duration: {}", format_duration(report.duration));
        let connected_pct = if report.requested_users > 0 {
            report.connected_users as f64 / report.requested_users as f64 * 100.0
        } else {
            0.0
        };
        let _ = writeln!(
            out,
            "Connected Users: {}/{} ({connected_pct:.1}%)",
            report.connected_users, report.requested_users
        );
        let _ = writeln!(out, "Total Events Sent: {}", delivery.events_sent);
        let _ = writeln!(
            out,
            "Total Events Expected: {} (based on connected users at send time)",
            delivery.events_expected
        );
        let _ = writeln!(
            out,
            "Total Events Received: {} ({:.2}%)",
            delivery.events_received,
            report.delivery_rate()
        );
        let missed = delivery.events_missed();
        if missed > 0 {
            let _ = writeln!(
                out,
                "{} Total Events Missed: {missed}",
                self.colorize("⚠", Color::Yellow, true)
            );
        }

        if !delivery.by_type.is_empty() {
            let _ = writeln!(
                out,
                "\n{}",
                self.colorize("Event Delivery by Type:", Color::Green, true)
            );
            for (kind, stats) in &delivery.by_type {
                let _ = writeln!(
                    out,
                    "  {:<20} {} sent → {} expected → {} received ({:.2}%)",
                    kind.to_string(),
                    stats.sent,
                    stats.expected,
                    stats.received,
                    stats.rate
                );
                if stats.missed > 0 {
                    let _ = writeln!(
                        out,
                        "    {} Missed events: {}",
                        self.colorize("⚠", Color::Yellow, true),
                        stats.missed
                    );
                }
            }
        }

        let latency = &delivery.latency;
        if latency.count > 0 {
            let _ = writeln!(
                out,
                "\n{}",
                self.colorize("Latency Statistics (event delivery):", Color::Green, true)
            );
            for (label, value) in [
                ("Mean", latency.mean),
                ("P50", latency.p50),
                ("P90", latency.p90),
                ("P95", latency.p95),
                ("P99", latency.p99),
                ("Max", latency.max),
            ] {
                let _ = writeln!(out, "  {:<5} {}", format!("{label}:"), format_latency(value));
            }
        }

        let _ = writeln!(
            out,
            "\nOperation Rate: {:.1} requests/min ({:.1} requests/sec)",
            report.operations_per_minute(),
            report.operations_per_second()
        );
        if report.failed_connections > 0 {
            let _ = writeln!(
                out,
                "\nConnection Stability:\n  Failed connections: {}",
                report.failed_connections
            );
        }

        let rate = report.delivery_rate();
        let verdict = match report.verdict() {
            Verdict::Pass => self.colorize("✓ PASS", Color::Green, true),
            Verdict::Warn => self.colorize("⚠ WARN", Color::Yellow, true),
            Verdict::Fail => self.colorize("✗ FAIL", Color::Red, true),
        };
        let _ = writeln!(out, "\nResult: {verdict} ({rate:.2}% delivery rate)");
        let _ = write!(out, "{rule}");
        out
    }

    pub fn rate_limit_banner(&self) -> String {
        let rule = "═".repeat(RULE_WIDTH);
        format!(
            "\n{rule}\n{}\n{rule}\n\n\
             The server is rate limiting requests. To run load tests, you need to\n\
             disable rate limiting by setting an environment variable:\n\n  \
             DISABLE_RATE_LIMITING=true npm run dev\n\n\
             Or if running in production mode:\n\n  \
             DISABLE_RATE_LIMITING=true node build\n\n{rule}",
            self.colorize("⚠️  RATE LIMIT DETECTED", Color::Yellow, true)
        )
    }

    pub fn error_prefix(&self) -> String {
        self.colorize("Error:", Color::Red, true)
    }

    fn colorize(&self, text: &str, color: Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                    Color::Red => text.red(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}

#[derive(Clone, Copy)]
enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
    Red,
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_millis() != 0 || secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, 0) => format!("{m}m"),
        (0, m, s) => format!("{m}m{s}s"),
        (h, m, s) => format!("{h}h{m}m{s}s"),
    }
}

fn format_latency(delta: chrono::TimeDelta) -> String {
    let micros = delta.num_microseconds().unwrap_or(i64::MAX);
    format!("{:.2}ms", micros as f64 / 1000.0)
}
