//! Bounded capture of worker stdout/stderr

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Ring of the most recent worker output lines
#[derive(Debug, Clone)]
pub struct OutputCapture {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    pub fn push(&self, stream: OutputStream, line: &str) {
        if self.capacity == 0 {
            return;
        }

        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(format!("[{}] {}", stream, line));
    }

    /// Captured lines joined for diagnostics
    pub fn snapshot(&self) -> String {
        let lines = self.lines.lock();
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `reader` line by line until EOF, logging and capturing each line
    pub fn attach<R>(&self, reader: R, stream: OutputStream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capture = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        match stream {
                            OutputStream::Stderr => {
                                tracing::warn!(target: "tether::worker", "{}", line)
                            }
                            OutputStream::Stdout => {
                                tracing::debug!(target: "tether::worker", "{}", line)
                            }
                        }
                        capture.push(stream, &line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("Stopped reading worker {}: {}", stream, e);
                        break;
                    }
                }
            }
        })
    }
}
