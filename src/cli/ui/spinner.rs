use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Indefinite stderr spinner shown while waiting on the peripheral.
#[derive(Debug)]
pub(crate) struct Spinner {
    enabled: bool,
}

impl Spinner {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Awaits `operation`, rendering `message` beside a spinner when enabled.
    pub(crate) async fn wait<F: Future>(&self, message: &str, operation: F) -> F::Output {
        if !self.enabled {
            return operation.await;
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style());
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(90));
        let output = operation.await;
        spinner.finish_and_clear();
        output
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {msg}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::disabled(false)]
    #[case::enabled(true)]
    #[tokio::test]
    async fn wait_returns_the_operation_output(#[case] enabled: bool) {
        let output = Spinner::new(enabled).wait("connecting", async { 7 }).await;
        assert_eq!(7, output);
    }
}
