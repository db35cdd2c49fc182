use beatload::RunConfig;
use beatload::config::DEFAULT_BASE_URL;
use clap::{Parser, ValueEnum};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "beatload")]
#[command(author, version, long_about = None)]
#[command(about = "Fan-out load harness for real-time board servers")]
pub struct Args {
    /// Base URL of the server under test
    #[arg(long, env = "BEATLOAD_URL", default_value = DEFAULT_BASE_URL)]
    pub url: String,

    /// Number of simulated users
    #[arg(short, long, env = "BEATLOAD_USERS", default_value_t = 45)]
    pub users: usize,

    /// Measured run length (e.g. 300, 30s, 5m, 1h)
    #[arg(
        short,
        long,
        env = "BEATLOAD_DURATION",
        default_value = "5m",
        value_parser = parse_duration
    )]
    pub duration: Duration,

    /// Run-wide action budget, shared by every user
    #[arg(long, env = "BEATLOAD_RPM", default_value_t = 30)]
    pub rpm: u32,

    /// Time allowed for in-flight notifications after actions stop
    #[arg(long, env = "BEATLOAD_GRACE", default_value = "5s", value_parser = parse_duration)]
    pub grace: Duration,

    /// Admin account used to provision the board (generated when absent)
    #[arg(long, env = "BEATLOAD_ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Log every request and decoded event
    #[arg(long)]
    pub debug: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable progress and report
    Pretty,
    /// Only the final report, as JSON on stdout
    Json,
}

impl Args {
    pub fn to_config(&self) -> RunConfig {
        RunConfig {
            base_url: self.url.clone(),
            users: self.users,
            duration: self.duration,
            requests_per_minute: self.rpm,
            grace_period: self.grace,
            admin_email: self.admin_email.clone(),
            verbose: self.verbose,
            debug: self.debug,
            ..Default::default()
        }
    }
}

/// Parse `300`, `30s`, `500ms`, `5m` or `1h`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration `{s}`"))?;

    match unit.trim() {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit `{other}` in `{s}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("300", Duration::from_secs(300))]
    #[case("30s", Duration::from_secs(30))]
    #[case("500ms", Duration::from_millis(500))]
    #[case("5m", Duration::from_secs(300))]
    #[case("1h", Duration::from_secs(3600))]
    #[case(" 10 s ", Duration::from_secs(10))]
    fn test_parse_duration(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("s")]
    #[case("10d")]
    #[case("-5s")]
    #[case("1.5m")]
    fn test_parse_duration_rejects(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }

    #[test]
    fn test_defaults_match_run_config() {
        let args = Args::try_parse_from(["beatload"]).unwrap();
        let config = args.to_config();
        let defaults = RunConfig::default();

        assert_eq!(config.base_url, defaults.base_url);
        assert_eq!(config.users, defaults.users);
        assert_eq!(config.duration, defaults.duration);
        assert_eq!(config.requests_per_minute, defaults.requests_per_minute);
        assert_eq!(config.grace_period, defaults.grace_period);
        assert_eq!(args.output, OutputFormat::Pretty);
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::try_parse_from([
            "beatload",
            "--url",
            "https://board.example",
            "-u",
            "5",
            "-d",
            "90s",
            "--rpm",
            "120",
            "--output",
            "json",
        ])
        .unwrap();
        let config = args.to_config();

        assert_eq!(config.base_url, "https://board.example");
        assert_eq!(config.users, 5);
        assert_eq!(config.duration, Duration::from_secs(90));
        assert_eq!(config.tick_interval(), Duration::from_millis(500));
        assert_eq!(args.output, OutputFormat::Json);
        assert_eq!(config.log_directive(), None);
    }

    #[test]
    fn test_verbosity_flags_reach_config() {
        let args = Args::try_parse_from(["beatload", "-v"]).unwrap();
        assert_eq!(args.to_config().log_directive(), Some("info,beatload=debug"));

        let args = Args::try_parse_from(["beatload", "--debug"]).unwrap();
        assert_eq!(args.to_config().log_directive(), Some("info,beatload=trace"));
    }
}
