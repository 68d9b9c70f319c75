//! Sandboxed, schema-validated tools: file read/write/patch, search, and
//! command execution. The VM funnels every dispatch through
//! [`ToolRegistry::execute`].

pub mod cmd;
pub mod fs;
pub mod globs;
pub mod registry;
pub mod sandbox;
pub mod search;

pub use registry::ToolRegistry;
pub use sandbox::{is_sensitive, safe_resolve};
