// crates/logging/src/util.rs
#![allow(missing_docs)]

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 9] = ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];
    let mut size = bytes as f64;
    let mut unit = 0usize;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        size.trunc().to_string()
    } else {
        format!("{:.2}{}", size, UNITS[unit])
    }
}

/// Render arbitrary child output for a single log line. Control bytes other
/// than tab become `\#ooo`; so do bytes above `~` unless `eight_bit_output`.
pub fn escape_bytes(bytes: &[u8], eight_bit_output: bool) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (b < 0x20 && b != b'\t') || b == 0x7f || (!eight_bit_output && b > 0x7e) {
            out.push_str(&format!("\\#{:03o}", b));
        } else {
            out.push(char::from(b));
        }
    }
    out
}

pub fn parse_escapes(input: &str) -> String {
    let mut out = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('e') => out.push('\x1b'),
            Some('f') => out.push('\x0c'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\x0b'),
            Some('x') => {
                let mut val = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match chars.peek().and_then(|p| p.to_digit(16)) {
                        Some(digit) => {
                            val = (val << 4) + digit;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    tracing::warn!("invalid hex escape sequence");
                    out.push('x');
                } else if let Some(ch) = char::from_u32(val) {
                    out.push(ch);
                }
            }
            Some('\\') => out.push('\\'),
            Some(c @ '0'..='7') => {
                let mut val = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|p| p.to_digit(8)) {
                        Some(digit) => {
                            val = (val << 3) + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                if let Some(ch) = char::from_u32(val) {
                    out.push(ch);
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0), "0");
        assert_eq!(human_bytes(1023), "1023");
        assert_eq!(human_bytes(1536), "1.50K");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00M");
    }

    #[test]
    fn escape_bytes_control_and_high() {
        assert_eq!(escape_bytes(b"a\tb\nc", false), "a\tb\\#012c");
        assert_eq!(escape_bytes(&[0xff], false), "\\#377");
        assert_eq!(escape_bytes(&[b'x', 0x7f], true), "x\\#177");
    }

    #[test]
    fn parse_escapes_sequences() {
        assert_eq!(parse_escapes("a\\tb"), "a\tb");
        assert_eq!(parse_escapes("\\x41\\101"), "AA");
        assert_eq!(parse_escapes("100%\\n"), "100%\n");
    }
}
