//! Checks that caller-supplied text is safe to hand to the engines.

use mf_core::{Error, RejectionKind};

const MAX_FONT_FAMILY_LEN: usize = 64;
const MAX_COLOR_LEN: usize = 32;
const MAX_TEXT_LEN: usize = 4096;

fn forbidden(reason: impl Into<String>) -> Error {
    Error::rejected(RejectionKind::OperationForbidden, reason)
}

/// Overlay text: no `@` file indirection, no control characters other than
/// newline and tab, bounded length.
pub fn check_text(text: &str) -> mf_core::Result<()> {
    if text.starts_with('@') {
        return Err(forbidden("overlay text may not start with '@'"));
    }
    if text.len() > MAX_TEXT_LEN {
        return Err(forbidden(format!(
            "overlay text longer than {MAX_TEXT_LEN} bytes"
        )));
    }
    if text.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(forbidden("overlay text contains control characters"));
    }
    Ok(())
}

/// Font family: `[A-Za-z0-9 _-]`, not starting with `-`.
pub fn check_font_family(family: &str) -> mf_core::Result<()> {
    let valid = !family.trim().is_empty()
        && family.len() <= MAX_FONT_FAMILY_LEN
        && !family.starts_with('-')
        && family
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(forbidden(format!("font family {family:?} is not allowed")))
    }
}

/// Color: a name or hex value, `[#A-Za-z0-9]`.
pub fn check_color(color: &str) -> mf_core::Result<()> {
    let valid = !color.is_empty()
        && color.len() <= MAX_COLOR_LEN
        && color.chars().all(|c| c.is_ascii_alphanumeric() || c == '#');
    if valid {
        Ok(())
    } else {
        Err(forbidden(format!("color {color:?} is not allowed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::ErrorKind;

    #[test]
    fn text_rules() {
        assert!(check_text("Hello, world! 100%").is_ok());
        assert!(check_text("two\nlines").is_ok());
        assert!(check_text("mail@example.com").is_ok());
        assert_eq!(
            check_text("@/etc/passwd").unwrap_err().kind(),
            ErrorKind::OperationForbidden
        );
        assert!(check_text("bell\u{7}").is_err());
        assert!(check_text(&"x".repeat(MAX_TEXT_LEN + 1)).is_err());
    }

    #[test]
    fn font_family_rules() {
        assert!(check_font_family("DejaVu Sans").is_ok());
        assert!(check_font_family("Noto_Sans-Bold").is_ok());
        assert!(check_font_family("-evil").is_err());
        assert!(check_font_family("Sans:style=Bold").is_err());
        assert!(check_font_family("../../etc").is_err());
        assert!(check_font_family("   ").is_err());
    }

    #[test]
    fn color_rules() {
        assert!(check_color("white").is_ok());
        assert!(check_color("#ff00aa").is_ok());
        assert!(check_color("red:x=1").is_err());
        assert!(check_color("").is_err());
    }
}
