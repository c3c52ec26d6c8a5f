//! Typed tools for applying planned actions.

pub mod executor;
pub mod registry;
pub mod tool;

pub use executor::ToolActionExecutor;
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolInput, ToolKind, ToolOutput};
