use crate::core::error::{Error, Result};

/// One timed text cue, offsets in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Parse a WebVTT document into cues, in document order. The header, NOTE
/// and STYLE blocks, and cue identifiers are skipped; a cue whose end
/// precedes its start is a validation error.
pub fn parse(input: &str) -> Result<Vec<Cue>> {
    let mut cues = Vec::new();
    let mut lines = input.lines().peekable();

    while let Some(line) = lines.next() {
        let line = line.trim_end_matches('\r');
        let Some((start_raw, end_raw)) = line.split_once("-->") else {
            continue;
        };
        // Arrows also show up in NOTE blocks and prose; a timing line is
        // recognized by its leading timestamp.
        let Some(start_ms) = parse_timestamp(start_raw.trim()) else {
            continue;
        };

        // Trailing cue settings (position, align) follow the end stamp.
        let end_raw = end_raw.trim().split_whitespace().next().unwrap_or("");
        let end_ms = parse_timestamp(end_raw)
            .ok_or_else(|| Error::Validation(format!("bad cue end time: {line}")))?;

        if end_ms < start_ms {
            return Err(Error::Validation(format!(
                "cue ends before it starts: {line}"
            )));
        }

        let mut text_lines = Vec::new();
        while let Some(text) = lines.peek() {
            let text = text.trim_end_matches('\r');
            if text.trim().is_empty() {
                break;
            }
            text_lines.push(text.trim().to_string());
            lines.next();
        }

        cues.push(Cue {
            start_ms,
            end_ms,
            text: text_lines.join("\n"),
        });
    }

    Ok(cues)
}

/// Serialize cues back out as a WebVTT document.
pub fn serialize(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for cue in cues {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_timestamp(cue.start_ms),
            format_timestamp(cue.end_ms),
            cue.text
        ));
    }
    out
}

/// `[HH:]MM:SS.mmm` to milliseconds. Whisper emits both the two- and
/// three-part forms depending on audio length; the fraction is always
/// exactly three digits.
pub(crate) fn parse_timestamp(raw: &str) -> Option<u64> {
    let (rest, frac) = raw.split_once('.')?;
    if frac.len() != 3 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let millis: u64 = frac.parse().ok()?;

    let parts: Vec<&str> = rest.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => (0, m.parse::<u64>().ok()?, s.parse::<u64>().ok()?),
        [h, m, s] => (
            h.parse::<u64>().ok()?,
            m.parse::<u64>().ok()?,
            s.parse::<u64>().ok()?,
        ),
        _ => return None,
    };

    if seconds > 59 || (hours > 0 && minutes > 59) {
        return None;
    }

    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_document() {
        let doc = "WEBVTT\n\n00:00.000 --> 00:07.000\nHello there.\n\n00:07.000 --> 00:12.500\nSecond cue,\nwrapped.\n";
        let cues = parse(doc).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 0);
        assert_eq!(cues[0].end_ms, 7000);
        assert_eq!(cues[0].text, "Hello there.");
        assert_eq!(cues[1].text, "Second cue,\nwrapped.");
    }

    #[test]
    fn test_parse_skips_header_notes_and_ids() {
        let doc = "WEBVTT\n\nNOTE generated output\n\n1\n00:00:01.000 --> 00:00:02.000\ncue text\n";
        let cues = parse(doc).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].start_ms, 1000);
        assert_eq!(cues[0].text, "cue text");
    }

    #[test]
    fn test_parse_rejects_inverted_cue() {
        let doc = "WEBVTT\n\n00:10.000 --> 00:05.000\nbackwards\n";
        assert!(matches!(parse(doc), Err(Error::Validation(_))));
    }

    #[test]
    fn test_parse_rejects_garbage_end_timestamp() {
        let doc = "WEBVTT\n\n00:05.000 --> zz:zz.zzz\nbad\n";
        assert!(parse(doc).is_err());
    }

    #[test]
    fn test_arrow_in_prose_is_not_a_timing() {
        // Arrows in NOTE blocks and in cue text must not start a new cue.
        let doc = "WEBVTT\n\nNOTE times map 1 --> 2\n\n00:00.000 --> 00:02.000\ngo --> stop\n";
        let cues = parse(doc).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "go --> stop");
    }

    #[test]
    fn test_timestamp_forms() {
        assert_eq!(parse_timestamp("00:07.250"), Some(7250));
        assert_eq!(parse_timestamp("01:02:03.004"), Some(3_723_004));
        assert_eq!(parse_timestamp("00:61.000"), None);
        assert_eq!(parse_timestamp("7.5"), None);
        // The fraction is millisecond-exact, never a shorter decimal.
        assert_eq!(parse_timestamp("00:07.25"), None);
        assert_eq!(parse_timestamp("00:07.2x0"), None);
    }

    #[test]
    fn test_serialize_then_parse() {
        let cues = vec![
            Cue {
                start_ms: 0,
                end_ms: 1500,
                text: "first".to_string(),
            },
            Cue {
                start_ms: 1500,
                end_ms: 3_723_004,
                text: "second".to_string(),
            },
        ];
        let doc = serialize(&cues);
        assert!(doc.starts_with("WEBVTT\n"));
        assert_eq!(parse(&doc).unwrap(), cues);
    }
}
