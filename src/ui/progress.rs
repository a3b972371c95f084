//! Build spinner with CI fallback

use super::context::UiContext;
use crate::build::BuildPhase;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner shown on stderr while a script is (re)built
///
/// Nothing is drawn until the first phase arrives, so cache hits stay
/// silent. In non-interactive mode the spinner is hidden entirely.
#[derive(Clone)]
pub struct BuildSpinner {
    bar: Option<ProgressBar>,
}

impl BuildSpinner {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = ctx.use_fancy_output().then(|| {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {prefix:.bold} {msg:.dim}  {elapsed:.dim}")
            {
                bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar.set_prefix(label.to_string());
            bar
        });
        Self { bar }
    }

    /// Move the spinner to `phase`
    pub fn on_phase(&self, phase: BuildPhase) {
        let Some(bar) = &self.bar else {
            return;
        };
        if phase == BuildPhase::Ready {
            bar.finish_and_clear();
            return;
        }
        bar.set_message(phase.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
    }

    /// Callback suitable for `Orchestrator::with_observer`
    pub fn observer(&self) -> impl Fn(BuildPhase) + Send + Sync + 'static {
        let spinner = self.clone();
        move |phase| spinner.on_phase(phase)
    }

    /// Clear the spinner, e.g. before printing an error
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
