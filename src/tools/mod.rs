//! Tool system for function calling.

pub mod arguments;
pub mod dispatcher;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use dispatcher::ToolCallDispatcher;
pub use tool::{FunctionTool, Tool, ToolContext};
pub use types::{ParameterBuilder, ToolDeclaration, ToolParameters};
pub use validation::validate_arguments;
