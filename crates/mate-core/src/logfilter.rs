/// Lines per `log_data` chunk. Sized for LLM-context consumption on the
/// Navigator side rather than for transport efficiency.
pub const LINES_PER_CHUNK: usize = 1000;

/// How many trailing lines `smart` mode falls back to when nothing matches.
pub const SMART_FALLBACK_LINES: usize = 50;

pub const NO_ERRORS_NOTICE: &str = "No errors found in log file.";

/// Keywords that mark a line as relevant in `smart` mode. Matching is
/// case-sensitive substring search; each casing is listed explicitly.
const SMART_KEYWORDS: &[&str] = &[
    "error",
    "ERROR",
    "Error",
    "warn",
    "WARN",
    "warning",
    "Warning",
    "fail",
    "FAIL",
    "failed",
    "Failed",
    "critical",
    "CRITICAL",
    "Critical",
    "panic",
    "Panic",
    "PANIC",
    "segfault",
    "segmentation fault",
    "out of memory",
    "OOM",
    "oom",
    "authentication failure",
    "auth failed",
    "denied",
    "Denied",
    "DENIED",
    "timeout",
    "Timeout",
    "TIMEOUT",
    "refused",
    "Refused",
    "REFUSED",
    "exception",
    "Exception",
    "EXCEPTION",
];

/// The narrower subset for `errors-only` mode.
const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "ERROR",
    "Error",
    "critical",
    "CRITICAL",
    "Critical",
    "panic",
    "Panic",
    "PANIC",
    "fail",
    "FAIL",
    "failed",
    "Failed",
    "segfault",
    "segmentation fault",
    "exception",
    "Exception",
    "EXCEPTION",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Smart,
    ErrorsOnly,
    Full,
}

impl LogMode {
    /// Unrecognized mode strings fall back to `full`.
    pub fn from_mode(input: &str) -> Self {
        match input {
            "smart" => LogMode::Smart,
            "errors-only" => LogMode::ErrorsOnly,
            _ => LogMode::Full,
        }
    }
}

fn contains_any(line: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| line.contains(keyword))
}

/// Applies the mode filter. The input is the literal `'\n'` split of the
/// file, so an empty trailing segment counts as a real line.
pub fn filter_lines(mode: LogMode, lines: Vec<String>) -> Vec<String> {
    match mode {
        LogMode::Full => lines,
        LogMode::Smart => {
            let relevant: Vec<String> = lines
                .iter()
                .filter(|line| contains_any(line, SMART_KEYWORDS))
                .cloned()
                .collect();
            if relevant.is_empty() {
                // Nothing matched; return trailing context instead of nothing.
                let start = lines.len().saturating_sub(SMART_FALLBACK_LINES);
                lines[start..].to_vec()
            } else {
                relevant
            }
        }
        LogMode::ErrorsOnly => {
            let errors: Vec<String> = lines
                .iter()
                .filter(|line| contains_any(line, ERROR_KEYWORDS))
                .cloned()
                .collect();
            if errors.is_empty() {
                vec![NO_ERRORS_NOTICE.to_string()]
            } else {
                errors
            }
        }
    }
}

/// One planned `log_data` emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedChunk {
    /// 1-based chunk index.
    pub number: usize,
    pub start: usize,
    pub end: usize,
    /// Cumulative percentage of filtered lines delivered after this chunk.
    pub progress: f64,
}

/// Chunk layout over an already-filtered line sequence.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    total_lines: usize,
    lines_per_chunk: usize,
}

impl ChunkPlan {
    pub fn new(total_lines: usize) -> Self {
        Self {
            total_lines,
            lines_per_chunk: LINES_PER_CHUNK,
        }
    }

    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    pub fn total_chunks(&self) -> usize {
        self.total_lines.div_ceil(self.lines_per_chunk)
    }

    pub fn iter(&self) -> impl Iterator<Item = PlannedChunk> + '_ {
        (0..self.total_chunks()).map(move |index| {
            let start = index * self.lines_per_chunk;
            let end = (start + self.lines_per_chunk).min(self.total_lines);
            PlannedChunk {
                number: index + 1,
                start,
                end,
                progress: end as f64 / self.total_lines as f64 * 100.0,
            }
        })
    }
}
