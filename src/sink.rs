//! Line-oriented output sinks for records and messages.

use std::fmt;
use std::io::Write;
use std::sync::Mutex;

/// Destination for complete output lines.
pub trait LineSink: Send + Sync + 'static {
    /// Write one line. The sink appends the newline.
    fn write_line(&self, line: fmt::Arguments<'_>);
}

/// Writes to stdout, one locked write per line so lines never interleave.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn write_line(&self, line: fmt::Arguments<'_>) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_fmt(line);
        let _ = out.write_all(b"\n");
        let _ = out.flush();
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|lines| lines.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LineSink for MemorySink {
    fn write_line(&self, line: fmt::Arguments<'_>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects_lines() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.write_line(format_args!("a={}", 1));
        sink.write_line(format_args!("b"));
        assert_eq!(sink.lines(), vec!["a=1".to_string(), "b".to_string()]);
    }
}
