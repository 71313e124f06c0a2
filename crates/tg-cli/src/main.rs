//! `tg` — the touchgrass CLI.
//!
//! `tg <tool> [args…]` wraps a coding tool in a PTY and bridges it to the
//! daemon; every other subcommand is a thin adapter over the control
//! server. Exit codes: 0 success, 1 failure, 130 interactive Ctrl-C.

use clap::{Parser, Subcommand};

mod client;
mod commands;
mod wrapper;

#[derive(Parser)]
#[command(name = "tg", about = "Drive local AI coding tools from your phone", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configure chat channels.
    Setup {
        #[arg(long)]
        telegram: Option<String>,
        #[arg(long)]
        slack: Option<String>,
        #[arg(long = "slack-app-token")]
        slack_app_token: Option<String>,
        /// Account name for the entry (defaults to the channel type).
        #[arg(long)]
        channel: Option<String>,
        #[arg(long = "list-channels")]
        list_channels: bool,
        #[arg(long)]
        show: bool,
    },
    /// Print a pairing code to send the bot as /pair <code>.
    Pair,
    /// Wrap Claude Code.
    #[command(trailing_var_arg = true)]
    Claude {
        #[arg(long)]
        channel: Option<String>,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Wrap Codex.
    #[command(trailing_var_arg = true)]
    Codex {
        #[arg(long)]
        channel: Option<String>,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Wrap PI.
    #[command(trailing_var_arg = true)]
    Pi {
        #[arg(long)]
        channel: Option<String>,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Wrap Kimi.
    #[command(trailing_var_arg = true)]
    Kimi {
        #[arg(long)]
        channel: Option<String>,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Pick a past transcript and resume it.
    Resume,
    /// Restart a session, resuming its transcript.
    Restart { id: Option<String> },
    /// Send text or a file to a session's bound chat.
    Send {
        id: String,
        text: Option<String>,
        #[arg(long)]
        file: Option<String>,
        caption: Option<String>,
    },
    /// Queue stdin input for a session.
    Write {
        id: String,
        text: Option<String>,
        #[arg(long)]
        file: Option<String>,
    },
    /// Show session status (or --all).
    Peek {
        id: Option<String>,
        #[arg(long)]
        all: bool,
        count: Option<usize>,
    },
    /// Tail the daemon log.
    Logs {
        #[arg(short = 'n', default_value_t = 50)]
        lines: usize,
        #[arg(short = 'f')]
        follow: bool,
    },
    /// Check the local setup end to end.
    Doctor,
    /// List chats the daemon can see.
    Channels,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = run(cli);
    std::process::exit(code);
}

fn run(cli: Cli) -> i32 {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("tg: failed to start runtime: {e}");
            return 1;
        }
    };

    let result: anyhow::Result<i32> = runtime.block_on(async {
        match cli.command {
            Command::Setup {
                telegram,
                slack,
                slack_app_token,
                channel,
                list_channels,
                show,
            } => commands::setup(telegram, slack, slack_app_token, channel, list_channels, show)
                .await,
            Command::Pair => commands::pair().await,
            Command::Claude { channel, args } => {
                let (args, channel) = split_channel_flag(args, channel);
                wrapper::run_tool("claude", args, channel).await
            }
            Command::Codex { channel, args } => {
                let (args, channel) = split_channel_flag(args, channel);
                wrapper::run_tool("codex", args, channel).await
            }
            Command::Pi { channel, args } => {
                let (args, channel) = split_channel_flag(args, channel);
                wrapper::run_tool("pi", args, channel).await
            }
            Command::Kimi { channel, args } => {
                let (args, channel) = split_channel_flag(args, channel);
                wrapper::run_tool("kimi", args, channel).await
            }
            Command::Resume => commands::resume().await,
            Command::Restart { id } => commands::restart(id).await,
            Command::Send {
                id,
                text,
                file,
                caption,
            } => commands::send(&id, text, file, caption).await,
            Command::Write { id, text, file } => commands::write(&id, text, file).await,
            Command::Peek { id, all, count } => commands::peek(id, all, count).await,
            Command::Logs { lines, follow } => commands::logs(lines, follow).await,
            Command::Doctor => commands::doctor().await,
            Command::Channels => commands::channels().await,
        }
    });

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("tg: {e}");
            1
        }
    }
}

/// `--channel SELECTOR` may trail the tool's own args (`tg claude -c
/// --channel dm`); trailing-var-arg capture swallows it, so it is lifted
/// back out here. An explicit pre-args `--channel` wins.
fn split_channel_flag(
    args: Vec<String>,
    explicit: Option<String>,
) -> (Vec<String>, Option<String>) {
    let mut out = Vec::with_capacity(args.len());
    let mut channel = explicit;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if channel.is_none() && arg == "--channel" {
            channel = iter.next();
        } else if channel.is_none() && arg.starts_with("--channel=") {
            channel = Some(arg["--channel=".len()..].to_string());
        } else {
            out.push(arg);
        }
    }
    (out, channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_flag_lifted_from_trailing_args() {
        let args = vec!["-c".into(), "--channel".into(), "dm".into(), "--verbose".into()];
        let (rest, channel) = split_channel_flag(args, None);
        assert_eq!(rest, vec!["-c", "--verbose"]);
        assert_eq!(channel.as_deref(), Some("dm"));
    }

    #[test]
    fn explicit_channel_wins() {
        let args = vec!["--channel".into(), "work".into()];
        let (rest, channel) = split_channel_flag(args, Some("dm".into()));
        assert_eq!(rest, vec!["--channel", "work"]);
        assert_eq!(channel.as_deref(), Some("dm"));
    }

    #[test]
    fn equals_form_is_recognized() {
        let (rest, channel) = split_channel_flag(vec!["--channel=none".into()], None);
        assert!(rest.is_empty());
        assert_eq!(channel.as_deref(), Some("none"));
    }
}
