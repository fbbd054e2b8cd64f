//! Build log classification and console rendering.
//!
//! Presentation only: nothing here influences the build or its verdict.
//! Records carry a one-character stream prefix followed by free-form text.

use colored::Colorize;

/// Stream a log record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Header,
    Stdout,
    Stderr,
    Unknown,
}

impl LogCategory {
    /// Prefix character used on the wire, if any.
    pub fn prefix(&self) -> Option<char> {
        match self {
            LogCategory::Header => Some('h'),
            LogCategory::Stdout => Some('o'),
            LogCategory::Stderr => Some('e'),
            LogCategory::Unknown => None,
        }
    }
}

/// Classify a raw record by its prefix.
pub fn classify(record: &str) -> LogCategory {
    match record.chars().next() {
        Some('h') => LogCategory::Header,
        Some('o') => LogCategory::Stdout,
        Some('e') => LogCategory::Stderr,
        _ => LogCategory::Unknown,
    }
}

/// Encode a line of text as a record of the given category.
pub fn record(category: LogCategory, text: &str) -> String {
    match category.prefix() {
        Some(prefix) => format!("{prefix}{text}"),
        None => text.to_string(),
    }
}

/// Record text without its prefix. Unknown records are returned whole.
pub fn text(record: &str) -> &str {
    match classify(record) {
        LogCategory::Unknown => record,
        _ => &record[1..],
    }
}

/// Render a record for the terminal: headers blue, stderr red, stdout plain.
pub fn render(record: &str) -> String {
    let body = text(record);
    match classify(record) {
        LogCategory::Header => body.blue().to_string(),
        LogCategory::Stderr => body.red().to_string(),
        LogCategory::Stdout | LogCategory::Unknown => body.to_string(),
    }
}

/// Consumer of build log records, called in production order.
pub trait LogSink: Send {
    fn handle(&mut self, record: &str);
}

/// Writes rendered records to stdout.
#[derive(Debug, Default)]
pub struct ConsoleLogRelay;

impl LogSink for ConsoleLogRelay {
    fn handle(&mut self, record: &str) {
        println!("{}", render(record));
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingLogSink {
    pub records: Vec<String>,
}

impl LogSink for CollectingLogSink {
    fn handle(&mut self, record: &str) {
        self.records.push(record.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_prefixes() {
        assert_eq!(classify("hstep 1: checkout"), LogCategory::Header);
        assert_eq!(classify("ohello"), LogCategory::Stdout);
        assert_eq!(classify("eboom"), LogCategory::Stderr);
        assert_eq!(classify("xother"), LogCategory::Unknown);
        assert_eq!(classify(""), LogCategory::Unknown);
    }

    #[test]
    fn test_text_strips_known_prefix_only() {
        assert_eq!(text("ohello"), "hello");
        assert_eq!(text("h"), "");
        assert_eq!(text("zzz"), "zzz");
    }

    #[test]
    fn test_record_round_trips_category() {
        for category in [LogCategory::Header, LogCategory::Stdout, LogCategory::Stderr] {
            let line = record(category, "payload");
            assert_eq!(classify(&line), category);
            assert_eq!(text(&line), "payload");
        }
    }

    #[test]
    fn test_render_is_stable() {
        colored::control::set_override(false);
        assert_eq!(render("ohello"), "hello");
        assert_eq!(render("eboom"), "boom");
        assert_eq!(render("hheader"), "header");
        assert_eq!(render("raw"), "raw");
        colored::control::unset_override();
    }

    #[test]
    fn test_collecting_sink_preserves_order() {
        let mut sink = CollectingLogSink::default();
        for line in ["h1", "o2", "e3"] {
            sink.handle(line);
        }
        assert_eq!(sink.records, vec!["h1", "o2", "e3"]);
    }
}
