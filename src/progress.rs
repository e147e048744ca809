//! Progress extraction from transcriber output lines.
//!
//! The external tool is not ours, so the parser is deliberately
//! conservative: a percentage is only trusted when the line clearly
//! reports progress. Timestamps, segment ranges and transcript text that
//! happens to contain `%` must not move the progress bar.

use std::sync::OnceLock;

use regex_lite::Regex;

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:progress|prog|percent)\b\s*[:=]?\s*(\d{1,3}(?:[.,]\d+)?)\s*%?")
            .unwrap()
    })
}

fn bare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3}(?:[.,]\d+)?)\s*%").unwrap())
}

/// Extract a progress percentage from one output line, if the line
/// credibly reports one. Returns a value in `0.0..=100.0`.
pub fn parse_percent(line: &str) -> Option<f32> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(captures) = keyword_re().captures(trimmed) {
        return parse_number(&captures[1]);
    }

    // Bare "NN%" is only believed outside of segment listings. Lines with
    // arrows or several colons are timestamps, and transcript lines echoed
    // under a "transcription" banner may quote percentages verbatim.
    if trimmed.contains("->") {
        return None;
    }
    if trimmed.matches(':').count() >= 2 {
        return None;
    }
    if trimmed.to_lowercase().starts_with("transcription") {
        return None;
    }

    bare_re()
        .captures(trimmed)
        .and_then(|captures| parse_number(&captures[1]))
}

fn parse_number(raw: &str) -> Option<f32> {
    let value: f32 = raw.replace(',', ".").parse().ok()?;
    if (0.0..=100.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}
