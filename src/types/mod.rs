//! Core types for toolchat.

pub mod message;
pub mod results;
pub mod stream;

pub use message::*;
pub use results::*;
pub use stream::*;
