use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "forethought",
    version,
    about = "Forethought: recurring tasks, streaks and hold-to-complete",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Evaluate resets as of this instant (e.g. "tomorrow", "+1d", "2026-05-01 08:00").
    #[arg(long = "now", global = true)]
    pub now: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the visible task list (the default).
    List,
    /// Create a task.
    Add(AddArgs),
    /// Change text, recurrence or interaction of a task.
    Edit(EditArgs),
    /// Complete an active task or undo a completed one.
    Toggle(TaskArg),
    /// Press and hold a task until it commits; Ctrl-C releases.
    Hold(HoldArgs),
    /// Delete a task permanently.
    Delete(DeleteArgs),
    /// Show every field of one task.
    Info(TaskArg),
}

#[derive(Args, Debug, Clone)]
pub struct TaskArg {
    /// List position, task uuid (or unique prefix), or projected id.
    pub task: String,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub text: Vec<String>,

    #[arg(long = "recur", default_value = "none")]
    pub recurrence: String,

    #[arg(long = "interaction", default_value = "checkbox")]
    pub interaction: String,

    /// Duration goal in minutes (hold tasks).
    #[arg(long = "goal", default_value_t = 0, allow_negative_numbers = true)]
    pub duration_goal: i64,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub task: String,

    #[arg(long = "text")]
    pub text: Option<String>,

    #[arg(long = "recur")]
    pub recurrence: Option<String>,

    #[arg(long = "interaction")]
    pub interaction: Option<String>,

    #[arg(long = "goal", allow_negative_numbers = true)]
    pub duration_goal: Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct HoldArgs {
    pub task: String,

    /// Release automatically after this many milliseconds.
    #[arg(long = "release-after")]
    pub release_after_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    pub task: String,

    /// Required when deleting a recurring task with a streak.
    #[arg(long = "confirm")]
    pub confirm: bool,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of argv.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, preprocess_args};

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let raw: Vec<OsString> = ["forethought", "rc.color=off", "list", "rc.hold.duration_ms:900"]
            .into_iter()
            .map(OsString::from)
            .collect();
        let pre = preprocess_args(&raw).expect("preprocess");
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.hold.duration_ms".to_string(), "900".to_string()),
            ]
        );
        assert_eq!(pre.cleaned_args, vec![OsString::from("forethought"), OsString::from("list")]);
    }

    #[test]
    fn add_accepts_negative_goal_for_validation_downstream() {
        let cli = GlobalCli::try_parse_from([
            "forethought",
            "add",
            "Stretch",
            "--interaction",
            "hold",
            "--goal",
            "-3",
        ])
        .expect("parse");
        let Some(Command::Add(args)) = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(args.text, vec!["Stretch".to_string()]);
        assert_eq!(args.duration_goal, -3);
    }
}
