//! Line-oriented parsing of delimiter-separated text.
//!
//! Each non-blank line is one record. Fields are split on a literal delimiter
//! and trimmed; records may carry different field counts; the dataset pads
//! or extends columns as records arrive.

use encoding_rs::{GB18030, UTF_8};

/// Split one line into trimmed fields. Returns `None` for blank lines.
pub fn split_line(line: &str, delimiter: &str) -> Option<Vec<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if delimiter.is_empty() {
        return Some(vec![line.to_string()]);
    }
    Some(line.split(delimiter).map(|part| part.trim().to_string()).collect())
}

/// Parse every non-blank line of `text` into a raw (unpadded) record
pub fn parse_text(text: &str, delimiter: &str) -> Vec<Vec<String>> {
    text.lines()
        .filter_map(|line| split_line(line, delimiter))
        .collect()
}

/// Render records as one line per row, cells joined by `delimiter`
pub fn rows_to_text(rows: &[Vec<String>], delimiter: &str) -> String {
    rows.iter()
        .map(|row| row.join(delimiter))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text recovered from raw file bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    /// Replacement characters were substituted; the source may be mis-decoded
    pub had_errors: bool,
}

/// Decode file contents: UTF-8 (BOM stripped), then GB18030, then lossy UTF-8.
pub fn decode_bytes(raw: &[u8]) -> DecodedText {
    let (text, had_errors) = UTF_8.decode_with_bom_removal(raw);
    if !had_errors {
        return DecodedText {
            text: text.into_owned(),
            encoding: UTF_8.name(),
            had_errors: false,
        };
    }

    let (text, _, had_errors) = GB18030.decode(raw);
    if !had_errors {
        return DecodedText {
            text: text.into_owned(),
            encoding: GB18030.name(),
            had_errors: false,
        };
    }

    DecodedText {
        text: String::from_utf8_lossy(raw).into_owned(),
        encoding: UTF_8.name(),
        had_errors: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_line_trims_fields() {
        assert_eq!(
            split_line("  a ---- b----c  ", "----"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(split_line("   ", "----"), None);
    }

    #[test]
    fn test_split_line_with_empty_delimiter_keeps_whole_line() {
        assert_eq!(split_line("a,b", ""), Some(vec!["a,b".to_string()]));
    }

    #[test]
    fn test_parse_text_skips_blank_lines() {
        let rows = parse_text("a----1\n\n  \nb----2----x\n", "----");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["b", "2", "x"]);
    }

    #[test]
    fn test_rows_to_text() {
        let rows = vec![
            vec!["a".to_string(), "1".to_string()],
            vec!["b".to_string(), "".to_string()],
        ];
        assert_eq!(rows_to_text(&rows, "----"), "a----1\nb----");
    }

    #[test]
    fn test_decode_utf8_with_bom() {
        let mut raw = vec![0xEF, 0xBB, 0xBF];
        raw.extend_from_slice("名字----1".as_bytes());
        let decoded = decode_bytes(&raw);
        assert_eq!(decoded.text, "名字----1");
        assert_eq!(decoded.encoding, "UTF-8");
        assert!(!decoded.had_errors);
    }

    #[test]
    fn test_decode_gb18030_fallback() {
        let (encoded, _, _) = GB18030.encode("中文----2");
        let decoded = decode_bytes(&encoded);
        assert_eq!(decoded.text, "中文----2");
        assert_eq!(decoded.encoding, "gb18030");
    }
}
