//! Console capture bridge.
//!
//! Host output normally goes to a local writer. While a [`CaptureGuard`] is
//! alive, text passed to [`Console::print`] is collected for one client
//! instead, and handed back by [`CaptureGuard::finish`] so the server can
//! relay it as STDOUT before the request's response. Dropping the guard
//! always restores local output.
//!
//! # Example
//!
//! ```
//! use sysexwire::server::Console;
//!
//! let mut console = Console::new(std::io::sink());
//! let mut guard = console.capture(5);
//! guard.console().print("hello\n");
//! let captured = guard.finish().unwrap();
//! assert_eq!(captured.client_id, 5);
//! assert_eq!(captured.text, "hello\n");
//! assert!(!console.is_capturing());
//! ```

use std::fmt;
use std::io::Write;

use tracing::warn;

/// Text collected during one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    /// Client the text is relayed to (0 = every client).
    pub client_id: u8,
    /// Collected text.
    pub text: String,
}

/// Host console with optional capture.
pub struct Console {
    local: Box<dyn Write + Send>,
    capture: Option<Captured>,
}

impl Console {
    /// Console printing locally to `writer`.
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            local: Box::new(writer),
            capture: None,
        }
    }

    /// Console printing locally to standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Print text produced by a request, captured if a capture is active.
    pub fn print(&mut self, text: &str) {
        match self.capture.as_mut() {
            Some(captured) => captured.text.push_str(text),
            None => self.write_local(text),
        }
    }

    /// Print text produced by the host itself. Never captured.
    pub fn host_print(&mut self, text: &str) {
        self.write_local(text);
    }

    /// Start capturing output for `client_id`.
    ///
    /// A capture already in progress is replaced.
    pub fn capture(&mut self, client_id: u8) -> CaptureGuard<'_> {
        self.capture = Some(Captured {
            client_id,
            text: String::new(),
        });
        CaptureGuard { console: self }
    }

    /// Whether output is currently captured.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    fn write_local(&mut self, text: &str) {
        let written = self
            .local
            .write_all(text.as_bytes())
            .and_then(|()| self.local.flush());
        if let Err(e) = written {
            warn!(error = %e, "Failed to write host console output");
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print(s);
        Ok(())
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("capture", &self.capture)
            .finish_non_exhaustive()
    }
}

/// Active capture. Restores local output when dropped.
pub struct CaptureGuard<'a> {
    console: &'a mut Console,
}

impl CaptureGuard<'_> {
    /// Console to hand to the code whose output is captured.
    pub fn console(&mut self) -> &mut Console {
        self.console
    }

    /// End the capture. Returns `None` if nothing was printed.
    pub fn finish(self) -> Option<Captured> {
        let captured = self.console.capture.take();
        captured.filter(|c| !c.text.is_empty())
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.console.capture = None;
    }
}
