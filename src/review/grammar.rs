//! Tolerant parser for generated review text.
//!
//! Each useful line has the shape `<line number> : <message>`. Anything else
//! (prose, headings, bullets, a number that is not a positive integer, an
//! empty message) is skipped. Parsing never fails.

use super::types::Comment;

/// Parse one line of generated text into `(line, message)`.
pub fn parse_line(raw: &str) -> Option<(usize, &str)> {
    let (number, message) = raw.trim().split_once(':')?;
    let number = number.trim();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let line: usize = number.parse().ok()?;
    let message = message.trim();
    if line == 0 || message.is_empty() {
        return None;
    }
    Some((line, message))
}

/// Parse a whole response into comments for `file`, tagged with `producer`.
pub fn parse_comments(text: &str, file: &str, producer: &str) -> Vec<Comment> {
    text.lines()
        .filter_map(parse_line)
        .map(|(line, message)| Comment {
            file: file.to_string(),
            line,
            message: message.to_string(),
            producer: producer.to_string(),
            reasoning: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_line() {
        assert_eq!(parse_line("12: off by one"), Some((12, "off by one")));
        assert_eq!(parse_line("  7 :  spaced out  "), Some((7, "spaced out")));
    }

    #[test]
    fn test_message_keeps_later_colons() {
        assert_eq!(
            parse_line("3: use std::fmt::Display: it is clearer"),
            Some((3, "use std::fmt::Display: it is clearer"))
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let malformed = [
            "",
            "   ",
            "no colon here",
            ": missing number",
            "Line 12: prefixed",
            "- 12: bullet",
            "12a: trailing letter",
            "+12: signed",
            "-3: negative",
            "1.5: fractional",
            "0: zero is not a line",
            "12:",
            "12:    ",
            "99999999999999999999999999: overflow",
            "١٢: non-ascii digits",
            "**12**: markdown",
        ];
        for line in malformed {
            assert_eq!(parse_line(line), None, "{line:?}");
        }
    }

    #[test]
    fn test_fuzzed_input_never_panics() {
        // Cheap deterministic generator over characters the grammar cares about.
        let alphabet: Vec<char> = "0123456789: \t-+abc\u{e9}\u{1F600}\r".chars().collect();
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..2000 {
            let mut line = String::new();
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let len = (state % 24) as usize;
            for i in 0..len {
                let pick = (state.rotate_left(i as u32 * 5) % alphabet.len() as u64) as usize;
                line.push(alphabet[pick]);
            }
            if let Some((n, msg)) = parse_line(&line) {
                assert!(n >= 1);
                assert!(!msg.is_empty());
            }
        }
    }

    #[test]
    fn test_parse_comments_mixed_response() {
        let text =
            "Here is my review:\n\n10: rename this\nnot a comment\n22: missing check\n0: bogus\n";
        let comments = parse_comments(text, "src/lib.rs", "style");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].line, 10);
        assert_eq!(comments[1].message, "missing check");
        assert!(comments.iter().all(|c| c.producer == "style" && c.file == "src/lib.rs"));
    }
}
