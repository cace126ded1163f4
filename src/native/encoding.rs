//! Encoding detection and transcoding, bridged to `encoding_rs`.
//!
//! Input bytes are sniffed for a byte order mark, then for an
//! `encoding="..."` pseudo-attribute in the XML declaration (or a
//! `<meta charset>` for HTML), and decoded to UTF-8. Output can be encoded
//! back into a document's declared encoding.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// Detects a byte order mark. Returns the encoding and the BOM length.
#[must_use]
pub fn detect_bom(bytes: &[u8]) -> Option<(&'static Encoding, usize)> {
    Encoding::for_bom(bytes)
}

/// Looks up an encoding by its IANA label (case-insensitive).
#[must_use]
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Returns `true` if `label` names UTF-8 (or is absent, which means UTF-8).
#[must_use]
pub fn is_utf8_label(label: Option<&str>) -> bool {
    label.map_or(true, |l| lookup(l).is_some_and(|e| e == UTF_8))
}

/// Scans the ASCII-compatible prefix of `bytes` for the encoding named in
/// an XML declaration.
fn declared_xml_encoding(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(1024)];
    let end = head.windows(2).position(|w| w == b"?>")?;
    let decl = String::from_utf8_lossy(&head[..end]);
    let decl = decl.strip_prefix("<?xml")?;
    let after = &decl[decl.find("encoding")? + "encoding".len()..];
    let after = after.trim_start().strip_prefix('=')?.trim_start();
    let quote = after.chars().next().filter(|&c| c == '"' || c == '\'')?;
    let value = &after[1..];
    Some(value[..value.find(quote)?].to_string())
}

/// Scans the ASCII-compatible prefix of an HTML document for
/// `<meta charset="...">` or a `content="...; charset=..."` declaration.
fn declared_html_charset(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(4096)];
    let lower = String::from_utf8_lossy(head).to_ascii_lowercase();
    let at = lower.find("charset")? + "charset".len();
    let rest = lower[at..].trim_start().strip_prefix('=')?.trim_start();
    let rest = rest.trim_start_matches(['"', '\'']);
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        .unwrap_or(rest.len());
    (end > 0).then(|| rest[..end].to_string())
}

/// Decodes raw markup bytes to UTF-8.
///
/// A byte order mark wins; otherwise the declared encoding is used when it
/// names something other than UTF-8; otherwise the bytes must be UTF-8.
/// Returns the text and the encoding label that was applied, if any was
/// declared or detected.
///
/// # Errors
///
/// Returns a message if the declared encoding is unknown or the bytes are
/// malformed for the chosen encoding.
pub fn decode_to_utf8(bytes: &[u8], html: bool) -> Result<(String, Option<String>), String> {
    if let Some((encoding, skip)) = detect_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[skip..]);
        if had_errors {
            return Err(format!("malformed byte sequence for {}", encoding.name()));
        }
        let label = (encoding == UTF_16LE || encoding == UTF_16BE).then(|| encoding.name().to_string());
        return Ok((text.into_owned(), label));
    }

    let declared = if html {
        declared_html_charset(bytes)
    } else {
        declared_xml_encoding(bytes)
    };
    let encoding = match declared.as_deref() {
        Some(label) => lookup(label).ok_or_else(|| format!("unsupported encoding: {label}"))?,
        None => UTF_8,
    };
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(format!("malformed byte sequence for {}", encoding.name()));
    }
    Ok((text.into_owned(), declared))
}

/// Encodes UTF-8 text into the encoding named by `label`.
///
/// Characters the target encoding cannot represent are written as numeric
/// character references, which is what the serializer does for text anyway.
///
/// # Errors
///
/// Returns a message if the label is unknown.
pub fn encode_from_utf8(text: &str, label: &str) -> Result<Vec<u8>, String> {
    let encoding = lookup(label).ok_or_else(|| format!("unsupported encoding: {label}"))?;
    let (bytes, _, _) = encoding.output_encoding().encode(text);
    Ok(bytes.into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_bom() {
        let (enc, skip) = detect_bom(b"\xEF\xBB\xBF<a/>").unwrap();
        assert_eq!(enc, UTF_8);
        assert_eq!(skip, 3);
        assert!(detect_bom(b"<a/>").is_none());
    }

    #[test]
    fn test_decode_plain_utf8() {
        let (text, label) = decode_to_utf8("<a>é</a>".as_bytes(), false).unwrap();
        assert_eq!(text, "<a>é</a>");
        assert_eq!(label, None);
    }

    #[test]
    fn test_decode_declared_latin1() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>\xE9</a>";
        let (text, label) = decode_to_utf8(bytes, false).unwrap();
        assert!(text.ends_with("<a>é</a>"));
        assert_eq!(label.as_deref(), Some("ISO-8859-1"));
    }

    #[test]
    fn test_decode_html_meta_charset() {
        let bytes = b"<html><head><meta charset=\"windows-1252\"></head><body>\x93</body></html>";
        let (text, label) = decode_to_utf8(bytes, true).unwrap();
        assert!(text.contains('\u{201C}'));
        assert_eq!(label.as_deref(), Some("windows-1252"));
    }

    #[test]
    fn test_decode_rejects_unknown_label() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"x-nope\"?><a/>";
        assert!(decode_to_utf8(bytes, false).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(decode_to_utf8(b"<a>\xFF</a>", false).is_err());
    }

    #[test]
    fn test_encode_latin1() {
        assert_eq!(encode_from_utf8("é", "ISO-8859-1").unwrap(), vec![0xE9]);
        assert!(is_utf8_label(Some("utf-8")));
        assert!(is_utf8_label(None));
        assert!(!is_utf8_label(Some("latin1")));
    }
}
