//! Host capabilities
//!
//! Programs never touch process I/O directly; output goes through the
//! [`Host`] injected into the [`Context`](super::Context).

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// I/O capability handed to a context
pub trait Host: Send {
    /// Emit one line of program output
    fn print(&mut self, text: &str) -> io::Result<()>;
}

/// Writes to the process stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutHost;

impl Host for StdoutHost {
    fn print(&mut self, text: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", text)
    }
}

/// Collects output in memory. Clones share the same buffer, so a handle
/// kept by the caller sees what the context printed.
#[derive(Debug, Default, Clone)]
pub struct BufferHost {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// All output, one line per print
    pub fn output(&self) -> String {
        self.lines()
            .iter()
            .map(|line| format!("{}\n", line))
            .collect()
    }
}

impl Host for BufferHost {
    fn print(&mut self, text: &str) -> io::Result<()> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output buffer poisoned"))?;
        lines.push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_host_shares_output() {
        let handle = BufferHost::new();
        let mut host: Box<dyn Host> = Box::new(handle.clone());
        host.print("one").unwrap();
        host.print("two").unwrap();
        assert_eq!(handle.lines(), vec!["one", "two"]);
        assert_eq!(handle.output(), "one\ntwo\n");
    }
}
