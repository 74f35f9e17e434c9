//! medassist command-line client
//!
//! The binary in `main.rs` parses arguments and dispatches to [`commands`].
//! [`render`] turns controller events into terminal output.

pub mod cli;
pub mod commands;
pub mod render;
