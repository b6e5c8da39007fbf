//! Decoder stderr handling: line splitting and severity classification.

/// Longest line kept before it is flushed as-is.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Splits stderr bytes into lines on `\n` or `\r`.
///
/// ffmpeg rewrites its progress line with bare carriage returns, so a
/// newline-only splitter would buffer progress for the whole stream.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' || b == b'\r' {
                self.take_line(&mut lines);
            } else {
                self.pending.push(b);
                if self.pending.len() >= MAX_LINE_BYTES {
                    self.take_line(&mut lines);
                }
            }
        }
        lines
    }

    /// Returns the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.take_line(&mut lines);
        lines.pop()
    }

    fn take_line(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Banner, stream description and other startup chatter.
    Startup,
    /// Periodic `frame= ... fps= ...` counters.
    Progress,
    /// Anything else: warnings and errors from the decoder.
    Unexpected,
}

const STARTUP_PREFIXES: &[&str] = &[
    "ffmpeg version",
    "built with",
    "configuration:",
    "lib",
    "Input #",
    "Output #",
    "Duration:",
    "Metadata:",
    "Stream #",
    "Stream mapping:",
    "Press [q]",
    "encoder",
    "major_brand",
    "minor_version",
    "compatible_brands",
    "creation_time",
    "handler_name",
    "vendor_id",
    "title",
    "Side data:",
];

pub fn classify(line: &str) -> DiagnosticKind {
    let trimmed = line.trim_start();
    if trimmed.starts_with("frame=") || (trimmed.contains("fps=") && trimmed.contains("time=")) {
        DiagnosticKind::Progress
    } else if STARTUP_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        DiagnosticKind::Startup
    } else {
        DiagnosticKind::Unexpected
    }
}

/// Logs one decoder stderr line at the severity its kind warrants.
pub fn log_line(generation: u64, line: &str) -> DiagnosticKind {
    let kind = classify(line);
    match kind {
        DiagnosticKind::Progress => log::trace!("[decoder {generation}] {line}"),
        DiagnosticKind::Startup => log::debug!("[decoder {generation}] {line}"),
        DiagnosticKind::Unexpected => log::error!("[decoder {generation}] {line}"),
    }
    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_splits_on_newline_and_carriage_return() {
        let mut splitter = LineSplitter::default();
        let lines = splitter.push(b"first\nframe=  1 fps=0.0\rframe=  2 fps=1.0\r");
        assert_eq!(lines, vec!["first", "frame=  1 fps=0.0", "frame=  2 fps=1.0"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_line_spanning_chunks_and_crlf() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"Input #0, hls").is_empty());
        let lines = splitter.push(b", from 'x':\r\n  Duration: N/A\r\ntail");
        assert_eq!(lines, vec!["Input #0, hls, from 'x':", "Duration: N/A"]);
        assert_eq!(splitter.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn test_overlong_line_is_flushed() {
        let mut splitter = LineSplitter::default();
        let lines = splitter.push(&vec![b'x'; MAX_LINE_BYTES + 10]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert_eq!(splitter.finish().map(|s| s.len()), Some(10));
    }

    #[rstest]
    #[case("frame=  120 fps= 10 q=5.0 size=N/A time=00:00:12.00 bitrate=N/A speed=1x", DiagnosticKind::Progress)]
    #[case("size=N/A time=00:00:01.00 bitrate=N/A fps=10 time=1", DiagnosticKind::Progress)]
    #[case("ffmpeg version 6.1 Copyright (c) 2000-2023", DiagnosticKind::Startup)]
    #[case("  libavcodec     60. 31.102 / 60. 31.102", DiagnosticKind::Startup)]
    #[case("Stream #0:0: Video: h264 (High), yuv420p, 1280x720", DiagnosticKind::Startup)]
    #[case("Press [q] to stop, [?] for help", DiagnosticKind::Startup)]
    #[case("https://example.com/live.m3u8: Server returned 404 Not Found", DiagnosticKind::Unexpected)]
    #[case("[h264 @ 0x55d] error while decoding MB 12 4", DiagnosticKind::Unexpected)]
    fn test_classify(#[case] line: &str, #[case] expected: DiagnosticKind) {
        assert_eq!(classify(line), expected);
    }
}
