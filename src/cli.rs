use crate::model::ThreadSelector;
use crate::sampler::Strategy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "stackrec")]
#[command(about = "Record and analyze thread stack samples of a running process")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sample a live process and save the recording
    Record {
        /// What to collect each cycle
        #[arg(value_enum)]
        strategy: StrategyArg,

        /// Threads to sample: *, ids, ranges like 3-7, or "name*" patterns
        #[arg(value_parser = parse_selector)]
        threads: ThreadSelector,

        /// Process ID to sample
        #[arg(long, short = 'p', conflicts_with = "process")]
        pid: Option<u32>,

        /// Process name to sample (pgrep-style matching)
        #[arg(long, short = 'P', conflicts_with = "pid")]
        process: Option<String>,

        /// Sampling interval (default: 500ms for stack, 1s for resource)
        #[arg(long, short = 'i', value_parser = parse_duration)]
        interval: Option<Duration>,

        /// Recording duration (default: until Ctrl-C)
        #[arg(long, short = 'd', value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Give up on a single collection after this long
        #[arg(long, value_parser = parse_duration)]
        collect_timeout: Option<Duration>,

        /// Output database path
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Overwrite the output file if it exists
        #[arg(long)]
        force: bool,
    },

    /// Query a saved recording
    View {
        /// Recording database file
        file: PathBuf,

        #[command(subcommand)]
        query: ViewQuery,
    },

    /// List saved recordings
    List {
        /// Directory to search (defaults to current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ViewQuery {
    /// Recording summary, thread list and resource usage
    Info,

    /// Hottest methods across the selected threads
    Method {
        #[arg(value_parser = parse_selector)]
        threads: ThreadSelector,

        /// Time range: 100ms~900ms, 3~8 or yyyy.MM.dd/HH:mm:ss~yyyy.MM.dd/HH:mm:ss
        range: Option<String>,
    },

    /// Merged call tree per selected thread
    Thread {
        #[arg(value_parser = parse_selector)]
        threads: ThreadSelector,

        /// Time range, same forms as for `method`
        range: Option<String>,
    },

    /// Stacks of one thread at a point in time
    Stack {
        /// Thread id
        thread: u64,

        /// 1500ms, a sample number, or yyyy.MM.dd/HH:mm:ss
        point: String,
    },

    /// Runs of samples containing a matching `Class.method`
    Search {
        #[arg(value_parser = parse_selector)]
        threads: ThreadSelector,

        /// Wildcard pattern (`*`, `?`), at least 3 plain characters
        pattern: String,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum StrategyArg {
    Stack,
    Resource,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Stack => Strategy::Stack,
            StrategyArg::Resource => Strategy::Resource,
        }
    }
}

fn parse_selector(s: &str) -> Result<ThreadSelector, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    // Try humantime first
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Bare number as milliseconds
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 500ms, 2s, 5m, 1h30m, 250",
        s
    ))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if let Command::Record {
            pid,
            process,
            interval,
            collect_timeout,
            ..
        } = &self.command
        {
            if pid.is_none() && process.is_none() {
                return Err("Either --pid or --process is required for recording".to_string());
            }
            if interval.is_some_and(|i| i.is_zero()) {
                return Err("Interval must be greater than zero".to_string());
            }
            if collect_timeout.is_some_and(|t| t.is_zero()) {
                return Err("Collect timeout must be greater than zero".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_record_requires_target() {
        let cli = Cli::try_parse_from(["stackrec", "record", "stack", "*"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from(["stackrec", "record", "stack", "1,3-5", "--pid", "42"])
            .unwrap();
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let cli =
            Cli::try_parse_from(["stackrec", "record", "stack", "*", "-p", "1", "-i", "0"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_view_subcommands() {
        let cli = Cli::try_parse_from(["stackrec", "view", "a.db", "method", "\"main\"", "1~3"])
            .unwrap();
        let Command::View { query, .. } = cli.command else {
            panic!("expected view");
        };
        assert!(matches!(query, ViewQuery::Method { range: Some(_), .. }));

        assert!(Cli::try_parse_from(["stackrec", "view", "a.db", "search", "*", "ab"]).is_ok());
        assert!(Cli::try_parse_from(["stackrec", "view", "a.db", "method", "x-"]).is_err());
    }
}
