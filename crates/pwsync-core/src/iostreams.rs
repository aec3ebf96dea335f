//! Terminal I/O abstraction layer.
//!
//! Handles TTY detection, color support, the progress spinner, and output
//! capture for testing.

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Writer wrapper that supports both real I/O and buffered capture.
struct OutputWriter(Box<dyn Write + Send>);

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Writer that shares a buffer with test code via `Arc<Mutex<Vec<u8>>>`.
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Captured test output that can be inspected after command execution.
#[derive(Debug, Clone)]
pub struct TestOutput {
    out_buf: Arc<Mutex<Vec<u8>>>,
    err_buf: Arc<Mutex<Vec<u8>>>,
}

impl TestOutput {
    /// Get the captured stdout content as a string.
    pub fn stdout(&self) -> String {
        let buf = self.out_buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Get the captured stderr content as a string.
    pub fn stderr(&self) -> String {
        let buf = self.err_buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).to_string()
    }
}

/// I/O streams for terminal interaction.
///
/// Commands should use `println_out()` / `println_err()` instead of
/// `println!()` / `eprintln!()` so output can be captured in tests.
pub struct IOStreams {
    stdin_is_tty: bool,
    stdout_is_tty: bool,
    stderr_is_tty: bool,
    color_forced: Option<bool>,
    spinner_disabled: bool,
    never_prompt: bool,
    spinner: Mutex<Option<ProgressBar>>,
    out: Arc<Mutex<OutputWriter>>,
    err: Arc<Mutex<OutputWriter>>,
}

impl std::fmt::Debug for IOStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IOStreams")
            .field("stdin_is_tty", &self.stdin_is_tty)
            .field("stdout_is_tty", &self.stdout_is_tty)
            .field("stderr_is_tty", &self.stderr_is_tty)
            .field("color_forced", &self.color_forced)
            .field("never_prompt", &self.never_prompt)
            .finish_non_exhaustive()
    }
}

impl IOStreams {
    /// Create `IOStreams` for the real terminal.
    pub fn system() -> Self {
        Self {
            stdin_is_tty: io::stdin().is_terminal(),
            stdout_is_tty: io::stdout().is_terminal(),
            stderr_is_tty: io::stderr().is_terminal(),
            color_forced: std::env::var("NO_COLOR").ok().map(|_| false),
            spinner_disabled: false,
            never_prompt: false,
            spinner: Mutex::new(None),
            out: Arc::new(Mutex::new(OutputWriter(Box::new(io::stdout())))),
            err: Arc::new(Mutex::new(OutputWriter(Box::new(io::stderr())))),
        }
    }

    /// Create `IOStreams` for testing with output captured to buffers.
    ///
    /// Returns the IOStreams and a `TestOutput` handle for reading captured
    /// stdout/stderr after command execution.
    pub fn test_with_output() -> (Self, TestOutput) {
        let out_buf = Arc::new(Mutex::new(Vec::<u8>::new()));
        let err_buf = Arc::new(Mutex::new(Vec::<u8>::new()));

        let ios = Self {
            stdin_is_tty: false,
            stdout_is_tty: false,
            stderr_is_tty: false,
            color_forced: Some(false),
            spinner_disabled: true,
            never_prompt: true,
            spinner: Mutex::new(None),
            out: Arc::new(Mutex::new(OutputWriter(Box::new(SharedWriter(
                out_buf.clone(),
            ))))),
            err: Arc::new(Mutex::new(OutputWriter(Box::new(SharedWriter(
                err_buf.clone(),
            ))))),
        };

        (ios, TestOutput { out_buf, err_buf })
    }

    /// Set the stdin TTY state (for test configuration).
    pub fn set_stdin_tty(&mut self, is_tty: bool) {
        self.stdin_is_tty = is_tty;
    }

    /// Set the stdout TTY state (for test configuration).
    pub fn set_stdout_tty(&mut self, is_tty: bool) {
        self.stdout_is_tty = is_tty;
    }

    // --- Output methods ---

    /// Write a string to stdout followed by a newline.
    pub fn println_out(&self, s: &str) {
        let mut w = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(w, "{s}");
    }

    /// Write a string to stderr followed by a newline.
    pub fn println_err(&self, s: &str) {
        self.suspend_spinner(|| {
            let mut w = self.err.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(w, "{s}");
        });
    }

    /// Write formatted output to stdout with trailing newline.
    pub fn writeln_out(&self, args: std::fmt::Arguments<'_>) {
        let mut w = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = w.write_fmt(args);
        let _ = w.write_all(b"\n");
    }

    /// Write formatted output to stderr with trailing newline.
    pub fn writeln_err(&self, args: std::fmt::Arguments<'_>) {
        self.suspend_spinner(|| {
            let mut w = self.err.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = w.write_fmt(args);
            let _ = w.write_all(b"\n");
        });
    }

    // --- Progress ---

    /// Show `message` next to a spinner on stderr, replacing any previous one.
    pub fn start_progress(&self, message: &str) {
        if self.spinner_disabled || !self.stderr_is_tty {
            return;
        }
        let mut spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);
        let bar = spinner.get_or_insert_with(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        bar.set_message(message.to_string());
    }

    /// Remove the spinner, if shown.
    pub fn stop_progress(&self) {
        if let Some(bar) = self
            .spinner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            bar.finish_and_clear();
        }
    }

    /// Whether the spinner is disabled.
    pub fn spinner_disabled(&self) -> bool {
        self.spinner_disabled
    }

    fn suspend_spinner(&self, f: impl FnOnce()) {
        let spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);
        match spinner.as_ref() {
            Some(bar) => bar.suspend(f),
            None => f(),
        }
    }

    // --- Query methods ---

    /// Whether color output is enabled.
    pub fn color_enabled(&self) -> bool {
        if let Some(forced) = self.color_forced {
            return forced;
        }
        self.stdout_is_tty
    }

    /// Whether prompts should never be shown.
    pub fn never_prompt(&self) -> bool {
        self.never_prompt
    }

    /// Set never-prompt mode.
    pub fn set_never_prompt(&mut self, never: bool) {
        self.never_prompt = never;
    }

    /// Check if interactive mode is available (stdin and stdout are TTY, prompts not disabled).
    pub fn can_prompt(&self) -> bool {
        self.stdin_is_tty && self.stdout_is_tty && !self.never_prompt
    }

    /// Create a `ColorScheme` based on the current color settings.
    pub fn color_scheme(&self) -> ColorScheme {
        ColorScheme {
            enabled: self.color_enabled(),
        }
    }
}

/// Terminal color scheme for themed output.
#[derive(Debug, Clone)]
pub struct ColorScheme {
    enabled: bool,
}

impl ColorScheme {
    /// Apply bold styling.
    pub fn bold(&self, text: &str) -> String {
        if self.enabled {
            console::style(text).bold().to_string()
        } else {
            text.to_string()
        }
    }

    /// Apply success (green) styling.
    pub fn success(&self, text: &str) -> String {
        if self.enabled {
            console::style(text).green().to_string()
        } else {
            text.to_string()
        }
    }

    /// Apply warning (yellow) styling.
    pub fn warning(&self, text: &str) -> String {
        if self.enabled {
            console::style(text).yellow().to_string()
        } else {
            text.to_string()
        }
    }

    /// Apply error (red) styling.
    pub fn error(&self, text: &str) -> String {
        if self.enabled {
            console::style(text).red().to_string()
        } else {
            text.to_string()
        }
    }

    /// Apply cyan styling (for links, emphasis).
    pub fn cyan(&self, text: &str) -> String {
        if self.enabled {
            console::style(text).cyan().to_string()
        } else {
            text.to_string()
        }
    }

    /// Style for successful icon.
    pub fn success_icon(&self) -> String {
        self.success("✓")
    }

    /// Style for warning icon.
    pub fn warning_icon(&self) -> String {
        self.warning("!")
    }

    /// Style for error icon.
    pub fn error_icon(&self) -> String {
        self.error("X")
    }
}

/// Write to IOStreams stdout with newline, similar to `println!()`.
#[macro_export]
macro_rules! ios_println {
    ($ios:expr) => {
        $ios.println_out("")
    };
    ($ios:expr, $($arg:tt)*) => {
        $ios.writeln_out(format_args!($($arg)*))
    };
}

/// Write to IOStreams stderr with newline, similar to `eprintln!()`.
#[macro_export]
macro_rules! ios_eprintln {
    ($ios:expr) => {
        $ios.println_err("")
    };
    ($ios:expr, $($arg:tt)*) => {
        $ios.writeln_err(format_args!($($arg)*))
    };
}
