//! Subcommand implementations

pub mod apply;
pub mod list;
pub mod template;
