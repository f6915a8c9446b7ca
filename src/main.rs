#![forbid(unsafe_code)]

//! `agent-relay`: drive a stream-json agent CLI from the terminal.
//!
//! `query` runs one prompt and prints the agent's messages; `chat` keeps a
//! persistent session open and reads prompts from stdin. Logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::permission::PermissionMode;
use agent_relay::protocol::message::Message;
use agent_relay::{query, AppError, Client, RelayConfig, Result, SessionOptions};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    /// Assistant text only.
    Text,
    /// Every message as a JSON line.
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Drive a stream-json agent CLI", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Message output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Override the agent executable.
    #[arg(long)]
    cli_path: Option<PathBuf>,

    /// Override the model.
    #[arg(long)]
    model: Option<String>,

    /// Override the turn limit.
    #[arg(long)]
    max_turns: Option<u32>,

    /// Override the permission mode.
    #[arg(long, value_enum)]
    permission_mode: Option<PermissionMode>,

    /// Override the agent working directory.
    #[arg(long)]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single prompt and exit.
    Query {
        /// Prompt text.
        prompt: String,
    },
    /// Read prompts from stdin, one per line, in one persistent session.
    Chat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(&args)?;
    let options = SessionOptions::new(config).stderr(std::sync::Arc::new(|line: &str| {
        tracing::debug!(line, "agent stderr");
    }));

    match args.command {
        Command::Query { ref prompt } => run_query(prompt, options, args.output).await,
        Command::Chat => run_chat(options, args.output).await,
    }
}

fn load_config(args: &Cli) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::load_from_path(path)?,
        None => RelayConfig::default(),
    };

    if let Some(path) = &args.cli_path {
        config.cli_path = Some(path.clone());
    }
    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if let Some(max_turns) = args.max_turns {
        config.max_turns = Some(max_turns);
    }
    if let Some(mode) = args.permission_mode {
        config.permission_mode = Some(mode);
    }
    if let Some(cwd) = &args.cwd {
        config.cwd = Some(cwd.clone());
    }

    config.validate()?;
    info!("configuration loaded");
    Ok(config)
}

async fn run_query(prompt: &str, options: SessionOptions, output: OutputFormat) -> Result<()> {
    let mut stream = query(prompt, options).await?;
    let mut failure = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                print_message(&message, output)?;
                if let Message::Result(result) = &message {
                    if result.is_error {
                        failure = Some(AppError::Process {
                            exit_code: None,
                            stderr: format!("turn ended with {}", result.subtype),
                        });
                    }
                }
            }
            Err(err) if err.is_fatal() => failure = Some(err),
            Err(err) => warn!(error = %err, "query reported an error"),
        }
    }

    stream.close().await?;
    failure.map_or(Ok(()), Err)
}

async fn run_chat(options: SessionOptions, output: OutputFormat) -> Result<()> {
    let mut client = Client::new(options);
    client.connect().await?;
    info!("chat session ready; type a prompt, /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            if !run_chat_command(&client, command).await? {
                break;
            }
            continue;
        }

        client.send_message(line).await?;
        loop {
            tokio::select! {
                item = client.receive_message() => match item {
                    Some(Ok(message)) => {
                        print_message(&message, output)?;
                        if message.is_result() {
                            break;
                        }
                    }
                    Some(Err(err)) if err.is_fatal() => return Err(err),
                    Some(Err(err)) => warn!(error = %err, "chat reported an error"),
                    None => return Err(AppError::SessionClosed),
                },
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!(%err, "ctrl-c handler failed");
                    }
                    info!("interrupting current turn");
                    client.interrupt().await?;
                }
            }
        }
    }

    client.disconnect().await
}

/// Handle a `/command`; returns `false` to leave the chat.
async fn run_chat_command(client: &Client, command: &str) -> Result<bool> {
    let (name, arg) = command
        .split_once(' ')
        .map_or((command, ""), |(name, arg)| (name, arg.trim()));

    match name {
        "quit" | "exit" => return Ok(false),
        "model" => {
            client
                .set_model((!arg.is_empty()).then_some(arg))
                .await?;
        }
        "mode" => {
            let mode = PermissionMode::from_str(arg, true)
                .map_err(|err| AppError::Config(format!("unknown permission mode: {err}")))?;
            client.set_permission_mode(mode).await?;
        }
        "models" => println!("{}", serde_json::Value::Object(client.supported_models().await?)),
        "commands" => println!(
            "{}",
            serde_json::Value::Object(client.supported_commands().await?)
        ),
        "mcp" => println!(
            "{}",
            serde_json::Value::Object(client.mcp_server_status().await?)
        ),
        _ => println!("commands: /model [id], /mode <mode>, /models, /commands, /mcp, /quit"),
    }
    Ok(true)
}

fn print_message(message: &Message, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(message)?),
        OutputFormat::Text => {
            if let Some(text) = message.assistant_text() {
                if !text.is_empty() {
                    println!("{text}");
                }
            } else if let Message::Result(result) = message {
                info!(
                    subtype = result.subtype.as_str(),
                    turns = result.num_turns,
                    duration_ms = result.duration_ms,
                    cost_usd = ?result.total_cost_usd,
                    "turn finished"
                );
            }
        }
    }
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
