/// Strip terminal-unsafe characters from text shown to users.
///
/// Removes carriage returns and every control character except newline and
/// tab. Only for presentation: grading compares the raw captured output.
pub fn for_display(text: &str) -> String {
    text.chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_newlines_and_tabs() {
        assert_eq!(for_display("a\tb\nc"), "a\tb\nc");
    }

    #[test]
    fn test_strips_cr_and_controls() {
        assert_eq!(for_display("line\r\n\x1b[31mred\x07\x00"), "line\n[31mred");
    }

    #[test]
    fn test_strips_c1_and_form_feed() {
        assert_eq!(for_display("x\u{0c}y\u{85}z\u{7f}"), "xyz");
    }

    #[test]
    fn test_keeps_unicode_text() {
        assert_eq!(for_display("héllo → wörld"), "héllo → wörld");
    }
}
