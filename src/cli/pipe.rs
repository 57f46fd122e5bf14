//! CLI Pipe Support
//!
//! Runs the workspace over stdin/stdout as JSON lines:
//!
//! ```text
//! stdin:  {"key": "13", "value": 255}
//! stdout: {"key": "a0", "value": 512}
//! ```
//!
//! A `null` or missing value removes the key. Readings are printed only when
//! they change; they never feed back into what the adapter reads.

use crate::core::device::WorkspaceHandler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

/// One workspace update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceLine {
    /// Workspace key
    pub key: String,
    /// New value
    #[serde(default)]
    pub value: Value,
}

/// Line-based stdin reader
pub struct StdinLineReader {
    receiver: Receiver<String>,
    _thread: thread::JoinHandle<()>,
}

impl StdinLineReader {
    /// Create new line reader
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();

        let thread = thread::spawn(move || {
            Self::reader_thread(sender);
        });

        Self {
            receiver,
            _thread: thread,
        }
    }

    fn reader_thread(sender: Sender<String>) {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if sender.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }

    /// Hand over the channel the reader thread feeds
    pub fn into_receiver(self) -> Receiver<String> {
        self.receiver
    }
}

impl Default for StdinLineReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Workspace fed by JSON lines and publishing changed values as JSON lines
pub struct JsonLineWorkspace {
    input: Receiver<String>,
    input_closed: bool,
    output: Box<dyn Write + Send>,
    values: HashMap<String, Value>,
    published: HashMap<String, Value>,
    changed: Vec<String>,
}

impl JsonLineWorkspace {
    /// Workspace on the process's stdin and stdout
    pub fn stdio() -> Self {
        Self::new(StdinLineReader::new().into_receiver(), Box::new(io::stdout()))
    }

    /// Workspace on any line source and writer
    pub fn new(input: Receiver<String>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input,
            input_closed: false,
            output,
            values: HashMap::new(),
            published: HashMap::new(),
            changed: Vec::new(),
        }
    }

    /// Has the input side hit EOF?
    pub fn input_closed(&self) -> bool {
        self.input_closed
    }

    /// Apply one input line
    pub fn apply_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<WorkspaceLine>(line) {
            Ok(WorkspaceLine { key, value: Value::Null }) => {
                self.values.remove(&key);
            }
            Ok(WorkspaceLine { key, value }) => {
                self.values.insert(key, value);
            }
            Err(e) => tracing::warn!("Ignoring input line {:?}: {}", line, e),
        }
    }

    /// Write every changed value
    pub fn flush(&mut self) -> io::Result<()> {
        for key in std::mem::take(&mut self.changed) {
            let Some(value) = self.published.get(&key) else {
                continue;
            };
            let line = WorkspaceLine {
                key,
                value: value.clone(),
            };
            serde_json::to_writer(&mut self.output, &line)?;
            self.output.write_all(b"\n")?;
        }
        self.output.flush()
    }
}

impl WorkspaceHandler for JsonLineWorkspace {
    fn read(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: Value) {
        if self.published.get(key) != Some(&value) {
            if !self.changed.iter().any(|k| k == key) {
                self.changed.push(key.to_string());
            }
            self.published.insert(key.to_string(), value);
        }
    }

    fn consume(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    fn begin_tick(&mut self) {
        loop {
            match self.input.try_recv() {
                Ok(line) => self.apply_line(&line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.input_closed {
                        tracing::debug!("Workspace input closed");
                        self.input_closed = true;
                    }
                    break;
                }
            }
        }
    }

    fn end_tick(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to write workspace output: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn test_input_lines_set_values() {
        let (tx, rx) = mpsc::channel();
        let mut workspace = JsonLineWorkspace::new(rx, Box::new(io::sink()));

        tx.send(r#"{"key": "13", "value": 255}"#.to_string()).unwrap();
        tx.send("not json".to_string()).unwrap();
        tx.send(r#"{"key": "GET", "value": {"1": {"type": 2, "port": 3}}}"#.to_string()).unwrap();
        workspace.begin_tick();

        assert_eq!(workspace.read("13"), Some(json!(255)));
        assert!(workspace.read("GET").is_some());

        tx.send(r#"{"key": "13"}"#.to_string()).unwrap();
        workspace.begin_tick();
        assert_eq!(workspace.read("13"), None);
        assert!(!workspace.input_closed());

        drop(tx);
        workspace.begin_tick();
        assert!(workspace.input_closed());
    }

    #[test]
    fn test_output_only_on_change() {
        let (_tx, rx) = mpsc::channel();
        let out = SharedBuffer::default();
        let mut workspace = JsonLineWorkspace::new(rx, Box::new(out.clone()));

        workspace.write("a0", json!(512));
        workspace.end_tick();
        workspace.write("a0", json!(512));
        workspace.end_tick();
        workspace.write("a0", json!(600));
        workspace.end_tick();

        assert_eq!(
            out.lines(),
            vec![r#"{"key":"a0","value":512}"#, r#"{"key":"a0","value":600}"#]
        );
    }
}
