//! Style constants and message formatting shared by the error taxonomy and
//! the CLI's top-level reporting.

use anstyle::{AnsiColor, Color, Style};

pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
pub const ERROR_BOLD: Style = ERROR.bold();
pub const HINT: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack)));
pub const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
pub const SUCCESS: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));

pub const ERROR_EMOJI: &str = "\u{274c}";
pub const WARNING_EMOJI: &str = "\u{1f7e1}";
pub const HINT_EMOJI: &str = "\u{1f4a1}";
pub const SUCCESS_EMOJI: &str = "\u{2705}";

/// Indent every line of `content` with a two-space gutter, used for quoted
/// git output under a styled error header.
pub fn indent_block(content: &str) -> String {
    content
        .trim_end()
        .lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn error_message(content: impl AsRef<str>) -> String {
    format!("{ERROR_EMOJI} {ERROR}{}{ERROR:#}", content.as_ref())
}

pub fn hint_message(content: impl AsRef<str>) -> String {
    format!("{HINT_EMOJI} {HINT}{}{HINT:#}", content.as_ref())
}

pub fn warning_message(content: impl AsRef<str>) -> String {
    format!("{WARNING_EMOJI} {WARNING}{}{WARNING:#}", content.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_contains_emoji_and_text() {
        let msg = error_message("boom");
        assert!(msg.contains(ERROR_EMOJI));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn indent_block_prefixes_every_line() {
        let out = indent_block("a\nb\n");
        assert_eq!(out, "  a\n  b");
    }
}
