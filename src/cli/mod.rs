//! Command-line front end.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::agent::{ChatEngine, TurnOptions};
use crate::agent_loop::{ChatEvent, ChatEventSink, TurnEvent};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::tools::ToolCallDispatcher;
use crate::types::{Part, Role};

/// toolchat CLI
#[derive(Parser, Debug)]
#[command(name = "toolchat", version, about = "Tool-calling conversation engine")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message to a conversation
    Chat(ChatArgs),
    /// Print a conversation's stored history
    History(HistoryArgs),
}

#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Message text
    pub message: String,

    /// Conversation id
    #[arg(long, default_value = "default")]
    pub conversation: String,

    /// Disable streaming output
    #[arg(long)]
    pub no_stream: bool,
}

#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Conversation id
    pub conversation: String,
}

impl Cli {
    /// Default log filter for this invocation.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "toolchat=debug"
        } else {
            "toolchat=warn"
        }
    }

    pub fn load_config(&self) -> Result<ChatConfig, ChatError> {
        ChatConfig::from_env_and_file(self.config.as_deref())
    }
}

pub async fn run(cli: Cli) -> Result<(), ChatError> {
    let mut config = cli.load_config()?;
    match cli.command {
        Commands::Chat(args) => {
            if args.no_stream {
                config.streaming = false;
            }
            handle_chat(config, args).await
        }
        Commands::History(args) => handle_history(config, args).await,
    }
}

async fn handle_chat(config: ChatConfig, args: ChatArgs) -> Result<(), ChatError> {
    let streaming = config.streaming;
    let engine = ChatEngine::from_config(config, ToolCallDispatcher::new())?;
    let options = TurnOptions {
        cancel: None,
        event_sink: Some(terminal_sink(streaming)),
    };

    let result = engine
        .chat_with(&args.conversation, &args.message, options)
        .await?;

    if streaming {
        println!();
    } else {
        println!("{}", result.text);
    }
    if !result.valid {
        eprintln!("missing sections: {}", result.missing_sections.join(", "));
    }
    if let Some(rows) = &result.structured_table {
        eprintln!("trend table: {} rows", rows.len());
    }
    Ok(())
}

async fn handle_history(config: ChatConfig, args: HistoryArgs) -> Result<(), ChatError> {
    let engine = ChatEngine::from_config(config, ToolCallDispatcher::new())?;
    let history = engine.history(&args.conversation).await?;
    for message in history.messages() {
        for part in &message.parts {
            println!("{}", render_part(message.role, part));
        }
    }
    Ok(())
}

/// Streamed text to stdout, everything else to stderr.
fn terminal_sink(streaming: bool) -> ChatEventSink {
    Arc::new(move |event: TurnEvent| match event.payload {
        ChatEvent::Chunk { chunk } if streaming => {
            let mut stdout = std::io::stdout();
            for text in chunk.parts.iter().filter_map(Part::as_text) {
                let _ = write!(stdout, "{text}");
            }
            let _ = stdout.flush();
        }
        ChatEvent::RateLimit {
            retry_in_seconds,
            message,
        } => eprintln!("\nrate limited, retrying in {retry_in_seconds}s: {message}"),
        ChatEvent::ToolCallStarted { call, .. } => eprintln!("\n> {}", call.name),
        ChatEvent::ToolCallCompleted { record, .. } => match &record.error {
            Some(error) => eprintln!("  {} failed: {error}", record.name),
            None => eprintln!("  {} ok", record.name),
        },
        ChatEvent::TemplateCorrection {
            missing_sections, ..
        } => eprintln!("\nrequesting missing sections: {}", missing_sections.join(", ")),
        _ => {}
    })
}

fn render_part(role: Role, part: &Part) -> String {
    match part {
        Part::Text { text } => format!("[{role}] {text}"),
        Part::FunctionCall(call) => format!(
            "[{role}] call {}({})",
            call.name,
            serde_json::Value::Object(call.args.clone())
        ),
        Part::FunctionResponse(response) => format!(
            "[{role}] {} -> {}",
            response.name,
            serde_json::to_string(&response.outcome).unwrap_or_default()
        ),
    }
}
