pub mod client;
pub mod context;
pub mod conversation;
pub mod prompts;
pub mod sse;

pub use client::*;
pub use context::*;
pub use conversation::*;
pub use prompts::*;
