//! toolchat: a tool-calling conversation orchestration engine.
//!
//! A turn sends the user message to a generative model and resolves the
//! function calls it makes against a tool registry until a final answer
//! arrives. Provider rate limits are waited out. Answers can be checked
//! against a section template, with a bounded corrective retry.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolchat::prelude::*;
//!
//! # async fn example() -> toolchat::error::Result<()> {
//! let config = ChatConfig::from_env()?;
//! let tools = ToolCallDispatcher::new().with_tool(Arc::new(FunctionTool::new(
//!     "list_tables",
//!     "List the tables in the warehouse",
//!     ToolParameters::empty(),
//!     |_args, _ctx| async { Ok(serde_json::json!(["orders", "customers"])) },
//! )));
//! let engine = ChatEngine::from_config(config, tools)?;
//! let result = engine.chat("conversation-1", "List my tables").await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agent_loop;
pub mod config;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod stream_transform;
pub mod template;
pub mod tools;
pub mod trigger;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
