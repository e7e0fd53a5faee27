//! Operator console output
//!
//! Progress messages meant for the person running a migration. Quiet mode
//! is carried by the value itself and handed to every component that prints.

use console::{style, Term};

#[derive(Debug, Clone)]
pub struct Console {
    quiet: bool,
    term: Term,
}

impl Console {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            term: Term::stdout(),
        }
    }

    /// A console that suppresses all progress output
    pub fn quiet() -> Self {
        Self::new(true)
    }

    /// Print a progress line unless quiet
    pub fn info(&self, line: impl AsRef<str>) {
        if !self.quiet {
            self.always(line);
        }
    }

    /// Echo an issued cluster command unless quiet
    pub fn command(&self, line: impl AsRef<str>) {
        if !self.quiet {
            self.always(style(line.as_ref()).cyan().to_string());
        }
    }

    /// Print a line even in quiet mode
    pub fn always(&self, line: impl AsRef<str>) {
        let _ = self.term.write_line(line.as_ref());
    }

    /// Start an in-place progress line
    pub fn begin(&self, text: &str) {
        if !self.quiet {
            let _ = self.term.write_str(text);
            let _ = self.term.flush();
        }
    }

    /// Extend an in-place progress line
    pub fn tick(&self) {
        self.begin(".");
    }

    /// Terminate an in-place progress line
    pub fn end(&self, text: &str) {
        if !self.quiet {
            let _ = self.term.write_line(&style(text).green().to_string());
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new(false)
    }
}
