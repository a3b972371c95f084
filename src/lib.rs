//! Scriptisto - shebang interpreter for compiled languages
//!
//! Reads a build manifest embedded in a script's comments, builds the script
//! into a per-script cache directory, and runs the result. Rebuilds happen
//! only when the script changes.

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manifest;
pub mod ui;

pub use error::{ScriptistoError, ScriptistoResult};
