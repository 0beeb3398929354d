//! fontconfig font lookup.

use std::path::PathBuf;

use mf_core::{EngineErrorKind, Error};

/// `fc-match` arguments printing only the best match's file path.
///
/// `-` and `:` start size and property sections in a fontconfig pattern, so
/// they are escaped to keep the whole string a family name.
pub fn fc_match_args(family: &str) -> Vec<String> {
    let mut pattern = String::with_capacity(family.len());
    for c in family.chars() {
        if matches!(c, '\\' | '-' | ':' | ',') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    vec!["-f".to_string(), "%{file}".to_string(), pattern]
}

/// Extract the font file from `fc-match` output.
pub fn parse_font_path(stdout: &str) -> mf_core::Result<PathBuf> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty());
    match line {
        Some(path) => Ok(PathBuf::from(path)),
        None => Err(Error::engine(
            EngineErrorKind::Crashed,
            "fc-match",
            "no font matched",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_family() {
        assert_eq!(fc_match_args("DejaVu Sans"), vec!["-f", "%{file}", "DejaVu Sans"]);
    }

    #[test]
    fn hyphen_is_escaped() {
        assert_eq!(fc_match_args("Noto-Sans")[2], "Noto\\-Sans");
    }

    #[test]
    fn parse_output() {
        assert_eq!(
            parse_font_path("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf").unwrap(),
            PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")
        );
        assert!(parse_font_path("  \n").is_err());
    }
}
