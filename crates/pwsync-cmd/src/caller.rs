//! Terminal front end for operations.

use std::sync::Arc;

use pwsync_core::iostreams::IOStreams;
use pwsync_core::{ios_eprintln, ios_println};
use pwsync_ops::caller::{Caller, CallerResult};
use tracing::debug;

/// Reports operation progress and results on the terminal.
#[derive(Debug)]
pub struct TerminalCaller {
    io: Arc<IOStreams>,
}

impl TerminalCaller {
    /// Create a caller writing to `io`.
    pub fn new(io: Arc<IOStreams>) -> Self {
        Self { io }
    }
}

impl Caller for TerminalCaller {
    fn show_error(&self, message: &str) {
        self.io.stop_progress();
        let cs = self.io.color_scheme();
        ios_eprintln!(self.io, "{} {message}", cs.error_icon());
    }

    fn finish(&self, result: CallerResult) {
        self.io.stop_progress();
        debug!(?result, "operation finished");
    }

    fn refresh_list(&self) {
        self.io.stop_progress();
        let cs = self.io.color_scheme();
        ios_println!(self.io, "{} Password store is up to date", cs.success_icon());
    }

    fn progress(&self, message: &str) {
        self.io.start_progress(message);
    }

    fn notify(&self, message: &str) {
        self.io.stop_progress();
        let cs = self.io.color_scheme();
        ios_eprintln!(self.io, "{} {message}", cs.warning_icon());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_should_print_errors_to_stderr() {
        let (io, output) = IOStreams::test_with_output();
        let caller = TerminalCaller::new(Arc::new(io));

        caller.show_error("push rejected");

        assert_eq!(output.stderr(), "X push rejected\n");
        assert!(output.stdout().is_empty());
    }

    #[test]
    fn test_should_print_notifications_to_stderr() {
        let (io, output) = IOStreams::test_with_output();
        let caller = TerminalCaller::new(Arc::new(io));

        caller.notify("Generated a new SSH key");
        caller.finish(CallerResult::Ok);

        assert_eq!(output.stderr(), "! Generated a new SSH key\n");
    }

    #[test]
    fn test_should_report_refresh_on_stdout() {
        let (io, output) = IOStreams::test_with_output();
        let caller = TerminalCaller::new(Arc::new(io));

        caller.refresh_list();

        assert!(output.stdout().contains("Password store is up to date"));
    }
}
