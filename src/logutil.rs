//! Logging helpers for device-originated strings so log lines stay
//! single-line. Device names and message text arrive as untrusted bytes and
//! may contain control characters.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Other control characters become `\xNN`. Long strings are truncated with
///   an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 200;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Hex preview of the leading bytes of a frame for debug logs.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max.min(data.len()))
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::{escape_log, hex_snippet};

    #[test]
    fn escapes_control_characters() {
        let s = "Node\nOne\r\tEnd\x07";
        assert_eq!(escape_log(s), "Node\\nOne\\r\\tEnd\\x07");
    }

    #[test]
    fn hex_snippet_truncates() {
        assert_eq!(hex_snippet(&[0x3E, 0x02, 0x00, 0xAB], 3), "3e0200");
    }
}
