//! Terminal UI helpers
//!
//! Scriptisto shares the terminal with the script it runs, so everything
//! here except [`key_value`] writes to stderr. Spinners and colours are only
//! used when stderr is an interactive terminal outside CI.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{key_value, step_info, step_ok, step_warn};
pub use progress::BuildSpinner;
