//! Progress extraction from tool output.
//!
//! Tools report progress in one of three shapes, tried in order:
//! 1. a tqdm bar, `42%|████      | 8/20`
//! 2. a step counter, `PROGRESS: 8/20`
//! 3. a bare number on its own line
//!
//! Everything else is diagnostic output.

use kodan_core::{KodanError, Result};
use regex::Regex;
use std::collections::VecDeque;
use std::io::{self, BufRead};

/// Classifies output lines into progress percentages.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    bar: Regex,
    counter: Regex,
    bare: Regex,
}

impl ProgressParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| KodanError::Config(format!("bad progress pattern {pattern:?}: {e}")))
        };
        Ok(Self {
            bar: compile(r"^(\d+)%\|")?,
            counter: compile(r"PROGRESS: (\d+)/(\d+)")?,
            bare: compile(r"^(-?\d+)(\.\d*)?$")?,
        })
    }

    /// Percent (0-100) reported by `line`, if it is a progress line.
    pub fn parse(&self, line: &str) -> Option<u8> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(caps) = self.bar.captures(line) {
            return Some(clamp_percent(parse_int(&caps[1])));
        }
        if let Some(caps) = self.counter.captures(line) {
            let current = parse_int(&caps[1]);
            let total = parse_int(&caps[2]);
            if total > 0 {
                let percent = (current as f64 / total as f64 * 100.0).round() as i64;
                return Some(clamp_percent(percent));
            }
            return None;
        }
        if let Some(caps) = self.bare.captures(line) {
            return Some(clamp_percent(parse_int(&caps[1])));
        }
        None
    }
}

fn parse_int(digits: &str) -> i64 {
    digits.parse().unwrap_or(if digits.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Call `f` for every line of `reader`. Both `\n` and `\r` end a line, so
/// carriage-return progress bars are seen as they redraw.
pub fn for_each_line(mut reader: impl BufRead, mut f: impl FnMut(&str)) -> io::Result<()> {
    let mut line: Vec<u8> = Vec::new();
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if buf.is_empty() {
            break;
        }

        let len = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    f(&String::from_utf8_lossy(&line));
                    line.clear();
                }
            } else {
                line.push(byte);
            }
        }
        reader.consume(len);
    }
    if !line.is_empty() {
        f(&String::from_utf8_lossy(&line));
    }
    Ok(())
}

/// The last lines of a stream, bounded by line count.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
    seen_any: bool,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            seen_any: false,
        }
    }

    pub fn push(&mut self, line: &str) {
        self.seen_any = true;
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// Record that the stream produced output without retaining it.
    pub fn mark_seen(&mut self) {
        self.seen_any = true;
    }

    /// True once the stream has produced any line.
    pub fn seen_any(&self) -> bool {
        self.seen_any
    }

    /// Retained lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    /// The retained text, keeping at most the last `max_chars` characters.
    pub fn summary(&self, max_chars: usize) -> String {
        let text = self.text();
        let text = text.trim();
        let count = text.chars().count();
        if count <= max_chars {
            return text.to_string();
        }
        let tail: String = text.chars().skip(count - max_chars).collect();
        format!("…{}", tail)
    }
}
