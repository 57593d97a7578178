//! Human-readable notification text.
//!
//! Two variants per event: a multi-line full message for chat/mail style
//! channels, and a list of short chunks of at most 67 characters for
//! SMS/APRS style channels. Short chunks are packed word by word so
//! fields are never cut in half unless a single field exceeds the limit.

use aed_core::geo::{format_dms, km_to_miles, maidenhead};
use aed_core::{NotificationEvent, Units};

/// Maximum payload length of one APRS message.
pub const SHORT_MESSAGE_MAX_LEN: usize = 67;

pub const MESSAGE_TITLE: &str = "APRS Emergency Detector";

/// Characters APRS does not allow in message text.
const FORBIDDEN_CHARS: &[char] = &['{', '}', '|', '~'];

/// Maidenhead locator length in character pairs (`JO41du`).
const LOCATOR_PAIRS: usize = 3;

/// Both text variants for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub title: String,
    pub full: String,
    pub short: Vec<String>,
}

pub fn render(event: &NotificationEvent, units: Units) -> RenderedMessage {
    RenderedMessage {
        title: MESSAGE_TITLE.to_string(),
        full: full_message(event, units),
        short: short_messages(event, units),
    }
}

fn distance_text(km: f64, units: Units) -> String {
    match units {
        Units::Metric => format!("{km:.1} km"),
        Units::Imperial => format!("{:.1} mi", km_to_miles(km)),
    }
}

fn speed_text(kmh: f64, units: Units) -> String {
    match units {
        Units::Metric => format!("{kmh:.1} km/h"),
        Units::Imperial => format!("{:.1} mph", km_to_miles(kmh)),
    }
}

/// aprs.fi map link for a call sign.
pub fn map_link(source_id: &str) -> String {
    format!("https://aprs.fi/#!call=a%2F{source_id}")
}

/// Multi-line message with every known field.
pub fn full_message(event: &NotificationEvent, units: Units) -> String {
    let mut lines = vec![format!(
        "{} beacon from {}",
        event.category.label(),
        event.source_id
    )];

    match event.position {
        Some(pos) => {
            lines.push(format!("Position: {pos}"));
            lines.push(format!("DMS: {}", format_dms(pos)));
            lines.push(format!("Locator: {}", maidenhead(pos, LOCATOR_PAIRS)));
        }
        None => lines.push("Position: unknown".into()),
    }

    if let Some(km) = event.distance_km {
        let direction = event.heading.map(|h| format!(" {h}")).unwrap_or_default();
        lines.push(format!(
            "Distance: {}{} of your position",
            distance_text(km, units),
            direction
        ));
    }

    let course = event
        .course
        .map(|c| format!("{c} deg"))
        .unwrap_or_else(|| "unknown".into());
    let speed = event
        .speed
        .map(|s| speed_text(s, units))
        .unwrap_or_else(|| "unknown".into());
    lines.push(format!("Course: {course}, Speed: {speed}"));

    lines.push(format!(
        "Time: {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines.push(format!("Map: {}", map_link(&event.source_id)));
    lines.join("\n")
}

/// Short chunks, each at most `SHORT_MESSAGE_MAX_LEN` characters.
pub fn short_messages(event: &NotificationEvent, units: Units) -> Vec<String> {
    let mut pieces = vec![
        format!("!{}!", event.category.label()),
        format!("CS {}", event.source_id),
    ];
    if let Some(pos) = event.position {
        pieces.push(format!("Pos {:.4},{:.4}", pos.lat, pos.lon));
    }
    if let Some(km) = event.distance_km {
        let mut dist = format!("Dst {}", distance_text(km, units));
        if let Some(h) = event.heading {
            dist.push(' ');
            dist.push_str(h);
        }
        pieces.push(dist);
    }
    if let Some(speed) = event.speed {
        pieces.push(format!("Spd {}", speed_text(speed, units)));
    }
    if let Some(course) = event.course {
        pieces.push(format!("Dir {course}"));
    }
    pieces.push(event.timestamp.format("%H:%MZ").to_string());

    let mut messages = Vec::new();
    for piece in &pieces {
        add_piece(&mut messages, piece, SHORT_MESSAGE_MAX_LEN);
    }
    messages
}

/// Append `piece` to the last chunk if it fits, else start a new chunk.
///
/// Pieces longer than `max_len` are split on whitespace first; single words
/// still too long are cut into `max_len` slices.
pub fn add_piece(messages: &mut Vec<String>, piece: &str, max_len: usize) {
    let piece = strip_forbidden(&to_plain_ascii(piece));

    if piece.len() > max_len {
        for word in piece.split_whitespace() {
            if word.len() < max_len {
                add_piece(messages, word, max_len);
            } else {
                messages.extend(split_fixed(word, max_len));
            }
        }
        return;
    }

    match messages.last_mut() {
        Some(last) if last.len() + piece.len() < max_len => {
            if !last.is_empty() {
                last.push(' ');
            }
            last.push_str(&piece);
        }
        _ => messages.push(piece),
    }
}

fn strip_forbidden(s: &str) -> String {
    s.chars().filter(|c| !FORBIDDEN_CHARS.contains(c)).collect()
}

/// Cut an ASCII string into `max_len` sized slices.
fn split_fixed(s: &str, max_len: usize) -> Vec<String> {
    s.as_bytes()
        .chunks(max_len.max(1))
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

/// Down-convert text to plain ASCII.
///
/// German umlauts are expanded (ä -> ae, ß -> ss); everything else is
/// transliterated by `deunicode` (é -> e).
pub fn to_plain_ascii(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'Ä' => out.push_str("Ae"),
            'Ö' => out.push_str("Oe"),
            'Ü' => out.push_str("Ue"),
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            c => out.push(c),
        }
    }
    deunicode::deunicode(&out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use aed_core::{MicECategory, Position, ReportCategory};
    use chrono::{TimeZone, Utc};

    fn make_event() -> NotificationEvent {
        NotificationEvent {
            source_id: "DF1JSL-1".into(),
            category: ReportCategory::MicE(MicECategory::Emergency),
            position: Some(Position::new(51.838879, 8.32678)),
            distance_km: Some(12.34),
            bearing_deg: Some(45.0),
            heading: Some("NE"),
            course: Some(270),
            speed: Some(5.0),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_full_message() {
        let text = full_message(&make_event(), Units::Metric);
        assert!(text.starts_with("Emergency beacon from DF1JSL-1"));
        assert!(text.contains("Position: 51.838879, 8.326780"));
        assert!(text.contains("DMS: 51°50'19.96\"N, 8°19'36.41\"E"));
        assert!(text.contains("Locator: JO41du"));
        assert!(text.contains("Distance: 12.3 km NE of your position"));
        assert!(text.contains("Course: 270 deg, Speed: 5.0 km/h"));
        assert!(text.contains("Time: 2024-05-01 12:00:00 UTC"));
        assert!(text.contains("https://aprs.fi/#!call=a%2FDF1JSL-1"));
    }

    #[test]
    fn test_full_message_imperial_and_unknowns() {
        let mut event = make_event();
        event.course = None;
        event.speed = None;
        event.position = None;
        event.distance_km = None;
        event.heading = None;
        let text = full_message(&event, Units::Imperial);
        assert!(text.contains("Position: unknown"));
        assert!(!text.contains("Locator"));
        assert!(!text.contains("Distance"));
        assert!(text.contains("Course: unknown, Speed: unknown"));

        let text = full_message(&make_event(), Units::Imperial);
        assert!(text.contains("7.7 mi NE"));
        assert!(text.contains("3.1 mph"));
    }

    #[test]
    fn test_short_messages_fit() {
        let messages = short_messages(&make_event(), Units::Metric);
        assert!(!messages.is_empty());
        for m in &messages {
            assert!(m.len() <= SHORT_MESSAGE_MAX_LEN, "too long: {m}");
        }
        let joined = messages.join(" ");
        assert!(joined.starts_with("!Emergency! CS DF1JSL-1"));
        assert!(joined.contains("Pos 51.8389,8.3268"));
        assert!(joined.contains("Dst 12.3 km NE"));
        assert!(joined.contains("Dir 270"));
        assert!(joined.ends_with("12:00Z"));
    }

    #[test]
    fn test_add_piece_packs_and_wraps() {
        let mut messages = Vec::new();
        add_piece(&mut messages, "hello", 12);
        add_piece(&mut messages, "world", 12);
        assert_eq!(messages, vec!["hello world"]);

        add_piece(&mut messages, "again", 12);
        assert_eq!(messages, vec!["hello world", "again"]);
    }

    #[test]
    fn test_add_piece_splits_long_input() {
        let mut messages = Vec::new();
        add_piece(&mut messages, "aaaa bbbb cccccccccccc", 10);
        assert_eq!(messages, vec!["aaaa bbbb", "cccccccccc", "cc"]);
    }

    #[test]
    fn test_forbidden_chars_removed() {
        let mut messages = Vec::new();
        add_piece(&mut messages, "a{b}c|d~e", 67);
        assert_eq!(messages, vec!["abcde"]);
    }

    #[test]
    fn test_to_plain_ascii() {
        assert_eq!(to_plain_ascii("Größe Übung"), "Groesse Uebung");
        assert_eq!(to_plain_ascii("Café"), "Cafe");
        assert_eq!(to_plain_ascii("Łódź, Praha-Žižkov"), "Lodz, Praha-Zizkov");
        assert!(to_plain_ascii("Zürich 51°N").is_ascii());
    }

    #[test]
    fn test_render_title() {
        let rendered = render(&make_event(), Units::Metric);
        assert_eq!(rendered.title, MESSAGE_TITLE);
        assert!(!rendered.short.is_empty());
    }
}
