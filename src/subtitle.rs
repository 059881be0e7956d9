//! SRT subtitle documents.
//!
//! Collaborators exchange [`Segment`]s with times in seconds; documents hold
//! [`SubtitleEntry`]s with millisecond precision, which is what the SRT
//! format can represent.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{JimakuError, Result};

/// A time-aligned piece of transcript or translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleEntry {
    /// 1-based position in the document
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtitleDocument {
    pub entries: Vec<SubtitleEntry>,
}

impl SubtitleDocument {
    /// Build a document with one entry per segment, keeping segment boundaries.
    pub fn from_segments(segments: &[Segment]) -> Self {
        let entries = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let start = seconds_to_duration(segment.start);
                let end = seconds_to_duration(segment.end).max(start);
                SubtitleEntry {
                    index: i + 1,
                    start,
                    end,
                    text: normalize_text(&segment.text),
                }
            })
            .collect();

        Self { entries }
    }

    /// Render as SRT. Text lines are trimmed and blank lines dropped, since a
    /// blank line terminates an entry.
    pub fn to_srt(&self) -> String {
        let mut srt_content = String::new();

        for entry in &self.entries {
            srt_content.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                entry.index,
                format_srt_time(entry.start),
                format_srt_time(entry.end),
                normalize_text(&entry.text)
            ));
        }

        srt_content
    }

    /// Parse SRT text. Accepts a leading BOM, CRLF line endings and runs of
    /// blank lines between entries.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let mut lines = input.lines().enumerate().peekable();
        let mut entries = Vec::new();

        loop {
            while lines.next_if(|(_, line)| line.trim().is_empty()).is_some() {}

            let Some((line_no, index_line)) = lines.next() else {
                break;
            };
            let index = index_line
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|index| *index > 0)
                .ok_or_else(|| parse_error(line_no, "expected a positive entry index"))?;

            let (timing_no, timing_line) = lines
                .next()
                .ok_or_else(|| parse_error(line_no + 1, "missing timing line"))?;
            let (start, end) = parse_timing(timing_line, timing_no)?;

            let mut text_lines = Vec::new();
            while let Some((_, line)) = lines.next_if(|(_, line)| !line.trim().is_empty()) {
                text_lines.push(line.trim());
            }

            entries.push(SubtitleEntry {
                index,
                start,
                end,
                text: text_lines.join("\n"),
            });
        }

        Ok(Self { entries })
    }

    /// All entry text joined with spaces.
    pub fn plain_text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.text.replace('\n', " "))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Format a duration in SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(time: Duration) -> String {
    let total_milliseconds = time.as_millis();
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

fn parse_timing(line: &str, line_no: usize) -> Result<(Duration, Duration)> {
    let (start, end) = line
        .split_once("-->")
        .ok_or_else(|| parse_error(line_no, "expected 'start --> end'"))?;

    // Some writers append position hints after the end time.
    let end = end.split_whitespace().next().unwrap_or_default();

    let start = parse_srt_time(start.trim(), line_no)?;
    let end = parse_srt_time(end, line_no)?;
    if end < start {
        return Err(parse_error(line_no, "end time precedes start time"));
    }

    Ok((start, end))
}

fn parse_srt_time(value: &str, line_no: usize) -> Result<Duration> {
    let invalid = || parse_error(line_no, &format!("invalid timestamp '{}'", value));

    let (clock, millis) = value.split_once([',', '.']).ok_or_else(invalid)?;
    if millis.len() != 3 {
        return Err(invalid());
    }

    let parts: Vec<&str> = clock.split(':').collect();
    let [hours, minutes, secs] = parts.as_slice() else {
        return Err(invalid());
    };

    let field = |s: &str| s.parse::<u64>().map_err(|_| invalid());
    let (hours, minutes, secs, millis) = (
        field(*hours)?,
        field(*minutes)?,
        field(*secs)?,
        field(millis)?,
    );
    if minutes >= 60 || secs >= 60 {
        return Err(invalid());
    }

    hours
        .checked_mul(3_600_000)
        .and_then(|ms| ms.checked_add(minutes * 60_000 + secs * 1_000 + millis))
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_millis((seconds * 1000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

fn normalize_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_error(line_index: usize, message: &str) -> JimakuError {
    JimakuError::SubtitleParse {
        line: line_index + 1,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, start_ms: u64, end_ms: u64, text: &str) -> SubtitleEntry {
        SubtitleEntry {
            index,
            start: Duration::from_millis(start_ms),
            end: Duration::from_millis(end_ms),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(Duration::ZERO), "00:00:00,000");
        assert_eq!(format_srt_time(Duration::from_millis(65_123)), "00:01:05,123");
        assert_eq!(format_srt_time(Duration::from_millis(3_661_500)), "01:01:01,500");
    }

    #[test]
    fn test_write_then_parse_preserves_entries() {
        let document = SubtitleDocument {
            entries: vec![
                entry(1, 0, 1_500, "Hello there"),
                entry(2, 1_500, 4_020, "Two lines\nof text"),
                entry(3, 3_600_000, 3_601_999, "An hour in"),
            ],
        };

        let parsed = SubtitleDocument::parse(&document.to_srt()).unwrap();
        assert_eq!(parsed, document);
    }

    #[test]
    fn test_from_segments_numbers_entries_and_rounds_times() {
        let segments = vec![
            Segment::new(0.0, 1.2345, "  first  "),
            Segment::new(1.2345, 2.0, "second"),
        ];

        let document = SubtitleDocument::from_segments(&segments);
        assert_eq!(document.entries.len(), 2);
        assert_eq!(document.entries[0], entry(1, 0, 1_235, "first"));
        assert_eq!(document.entries[1].index, 2);
        assert_eq!(document.entries[1].start, Duration::from_millis(1_235));
    }

    #[test]
    fn test_parse_tolerates_bom_crlf_and_extra_blank_lines() {
        let input = "\u{feff}1\r\n00:00:01,000 --> 00:00:04,000\r\nDummy subtitle\r\n\r\n\r\n\r\n2\r\n00:00:05,000 --> 00:00:06,500 X1:40 X2:600\r\nNext\r\n";
        let parsed = SubtitleDocument::parse(input).unwrap();

        assert_eq!(
            parsed.entries,
            vec![
                entry(1, 1_000, 4_000, "Dummy subtitle"),
                entry(2, 5_000, 6_500, "Next"),
            ]
        );
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(SubtitleDocument::parse("").unwrap().entries.is_empty());
        assert!(SubtitleDocument::parse("\n\n").unwrap().entries.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_entries() {
        let bad_index = SubtitleDocument::parse("one\n00:00:01,000 --> 00:00:02,000\nx\n");
        assert!(matches!(bad_index, Err(JimakuError::SubtitleParse { line: 1, .. })));

        let bad_time = SubtitleDocument::parse("1\n00:00:01 --> 00:00:02,000\nx\n");
        assert!(matches!(bad_time, Err(JimakuError::SubtitleParse { line: 2, .. })));

        let backwards = SubtitleDocument::parse("1\n00:00:05,000 --> 00:00:02,000\nx\n");
        assert!(backwards.is_err());

        let truncated = SubtitleDocument::parse("1\n");
        assert!(truncated.is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_hours() {
        let huge = SubtitleDocument::parse(
            "1\n18446744073709551615:00:00,000 --> 18446744073709551615:00:01,000\nx\n",
        );
        assert!(matches!(huge, Err(JimakuError::SubtitleParse { line: 2, .. })));

        let largest = SubtitleDocument::parse(
            "1\n5124095576030:00:00,000 --> 5124095576030:00:01,000\nx\n",
        );
        assert!(largest.is_ok());
    }

    #[test]
    fn test_writer_drops_blank_text_lines() {
        let document = SubtitleDocument {
            entries: vec![entry(1, 0, 1_000, "top\n\n  bottom  ")],
        };
        let parsed = SubtitleDocument::parse(&document.to_srt()).unwrap();
        assert_eq!(parsed.entries[0].text, "top\nbottom");
    }
}
