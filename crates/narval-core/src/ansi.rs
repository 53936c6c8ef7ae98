//! ANSI escape sequence stripping.
//!
//! Child processes frequently colorize their output; log files store plain text.

/// Remove terminal color and formatting codes from `text`.
pub fn strip_ansi(text: &str) -> String {
    console::strip_ansi_codes(text).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sgr_colors() {
        assert_eq!(strip_ansi("\u{1b}[31mfailed\u{1b}[39m"), "failed");
        assert_eq!(
            strip_ansi("\u{1b}[1m\u{1b}[32m✓\u{1b}[0m passing (3ms)"),
            "✓ passing (3ms)"
        );
    }

    #[test]
    fn strips_cursor_movement_and_erase() {
        assert_eq!(strip_ansi("\u{1b}[2K\u{1b}[1Gdone"), "done");
    }

    #[test]
    fn strips_codes_split_around_whitespace() {
        assert_eq!(strip_ansi("\u{1b}[32m  ok  \u{1b}[39m"), "  ok  ");
        assert_eq!(strip_ansi("\u{1b}[0m"), "");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(strip_ansi("plain [text] 100%"), "plain [text] 100%");
    }
}
