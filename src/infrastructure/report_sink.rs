//! Append-only text output for advertisement lines and discovery reports.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tracing::error;

/// Destination for rendered report blocks.
///
/// Each call to [`ReportSink::emit`] writes one block as a unit; blocks from
/// different devices never interleave line by line.
pub trait ReportSink: Send + Sync {
    fn emit(&self, block: &str);
}

/// Sink writing each block to a `Write` under one lock
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> ReportSink for WriterSink<W> {
    fn emit(&self, block: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{}", block).and_then(|_| writer.flush()) {
            error!("Failed to write report: {}", e);
        }
    }
}

/// Reports on standard output
pub type ConsoleSink = WriterSink<io::Stdout>;

impl ConsoleSink {
    pub fn stdout() -> Self {
        WriterSink::new(io::stdout())
    }
}

/// Collects blocks in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    blocks: Mutex<Vec<String>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> Vec<String> {
        self.blocks.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ReportSink for MemorySink {
    fn emit(&self, block: &str) {
        self.blocks.lock().unwrap().push(block.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_writer_sink_appends_blocks() {
        let sink = WriterSink::new(Vec::new());
        sink.emit("first\n- nested");
        sink.emit("second");
        let bytes = sink.writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "first\n- nested\nsecond\n");
    }

    #[test]
    fn test_blocks_do_not_interleave() {
        let sink = Arc::new(WriterSink::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let block = format!("device {}\n  a\n  b", i);
                    sink.emit(&block);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let sink = Arc::try_unwrap(sink).ok().unwrap();
        let bytes = sink.writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 24);
        for chunk in lines.chunks(3) {
            assert!(chunk[0].starts_with("device "));
            assert_eq!(chunk[1], "  a");
            assert_eq!(chunk[2], "  b");
        }
    }
}
