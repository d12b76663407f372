//! Helpers for reading subprocess output
//!
//! Both yt-dlp and ffmpeg redraw their progress with carriage returns, so
//! output is split on `\r` as well as `\n`.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};

/// Call `on_line` for every non-empty line in `reader`
///
/// Lines end at `\n` or `\r`. Invalid UTF-8 is replaced lossily.
pub fn for_each_line<R: Read>(reader: R, mut on_line: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }

        let len = available.len();
        for &byte in available {
            if byte == b'\n' || byte == b'\r' {
                emit(&mut line, &mut on_line);
            } else {
                line.push(byte);
            }
        }
        reader.consume(len);
    }

    emit(&mut line, &mut on_line);
    Ok(())
}

fn emit(line: &mut Vec<u8>, on_line: &mut impl FnMut(&str)) {
    if line.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(line);
    on_line(&text);
    line.clear();
}

/// Keeps the last few lines of a stream
#[derive(Debug)]
pub struct LineTail {
    lines: VecDeque<String>,
    max_lines: usize,
}

impl LineTail {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines),
            max_lines: max_lines.max(1),
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.lines.len() == self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// The kept lines joined with newlines
    pub fn text(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Drain `reader` on a helper thread, keeping its last `max_lines` lines
///
/// Prevents a full stderr pipe from stalling the child while the caller
/// reads stdout.
pub fn spawn_tail_reader<R: Read + Send + 'static>(reader: R, max_lines: usize) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut tail = LineTail::new(max_lines);
        if let Err(e) = for_each_line(reader, |line| tail.push(line)) {
            tracing::debug!(error = %e, "stderr reader stopped early");
        }
        tail.text()
    })
}

/// Join a tail reader, treating a panicked reader as empty output
pub fn join_tail(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
