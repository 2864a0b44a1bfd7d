use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::category::DeletePolicy;
use crate::task::{Priority, Recurrence, Status};
use crate::view::ViewFilter;

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
    name = "docket",
    version,
    about = "Docket: a personal task tracker",
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
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "docketrc")]
    pub docketrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an account and seed it with a welcome task.
    Register {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    /// Change the active account's username, moving its data.
    Rename { new_username: String },
    Add(AddArgs),
    Edit(EditArgs),
    Status { id: String, status: Status },
    Done { id: String },
    Delete { id: String },
    Duplicate { id: String },
    Pin { id: String },
    Favorite { id: String },
    #[command(subcommand)]
    Subtask(SubtaskCommand),
    List(ListArgs),
    Stats,
    #[command(subcommand)]
    Category(CategoryCommand),
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    pub title: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_enum)]
    pub priority: Option<Priority>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long)]
    pub reminder: Option<String>,
    #[arg(long, value_enum)]
    pub recurrence: Option<Recurrence>,
    #[arg(long)]
    pub pin: bool,
    #[arg(long)]
    pub favorite: bool,
    #[arg(long = "subtask", action = ArgAction::Append)]
    pub subtasks: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    /// Empty string clears the description.
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_enum)]
    pub priority: Option<Priority>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub due: Option<String>,
    /// `none` clears the reminder.
    #[arg(long)]
    pub reminder: Option<String>,
    #[arg(long, value_enum)]
    pub recurrence: Option<Recurrence>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubtaskCommand {
    Add { task: String, title: String },
    Toggle { task: String, index: usize },
    Remove { task: String, index: usize },
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long, value_enum)]
    pub view: Option<ViewFilter>,
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        color: String,
        #[arg(long)]
        icon: Option<String>,
    },
    Edit {
        category: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    Delete {
        category: String,
        #[arg(long, value_enum, default_value = "reassign")]
        policy: DeletePolicy,
    },
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
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
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
            } else {
                rest.split_once(':')
                    .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
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
    use super::*;

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "docket",
            "rc.color=off",
            "list",
            "rc.default.view:pending",
        ]))
        .unwrap();

        assert_eq!(pre.cleaned_args, args(&["docket", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.default.view".to_string(), "pending".to_string()),
            ]
        );
    }

    #[test]
    fn parses_add_with_repeated_subtasks() {
        let cli = GlobalCli::parse_from(args(&[
            "docket",
            "add",
            "Pack",
            "--priority",
            "urgent",
            "--subtask",
            "socks",
            "--subtask",
            "charger",
        ]));
        let Command::Add(add) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(add.priority, Some(Priority::Urgent));
        assert_eq!(add.subtasks, vec!["socks", "charger"]);
    }

    #[test]
    fn parses_status_and_category_delete_policy() {
        let cli = GlobalCli::parse_from(args(&["docket", "status", "ab12", "in-progress"]));
        assert!(matches!(
            cli.command,
            Command::Status {
                status: Status::InProgress,
                ..
            }
        ));

        let cli = GlobalCli::parse_from(args(&[
            "docket",
            "category",
            "delete",
            "Work",
            "--policy",
            "delete-tasks",
        ]));
        assert!(matches!(
            cli.command,
            Command::Category(CategoryCommand::Delete {
                policy: DeletePolicy::DeleteTasks,
                ..
            })
        ));
    }

    #[test]
    fn keyval_requires_equals() {
        assert!("color".parse::<KeyVal>().is_err());
        let kv: KeyVal = " color = off ".parse().unwrap();
        assert_eq!((kv.key.as_str(), kv.value.as_str()), ("color", "off"));
    }
}
