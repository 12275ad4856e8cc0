//! Content type resolution for downloaded documents
//!
//! Upstream catalogs routinely serve PDFs with `text/html` headers (and the
//! other way around), so the resolver trusts evidence in priority order:
//! bytes first, then the URL extension, then the response header. It is
//! total: unknown input resolves to an empty string and callers decide
//! whether that is fatal.

pub const CONTENT_TYPE_PDF: &str = "application/pdf";
pub const CONTENT_TYPE_HTML: &str = "text/html";
pub const CONTENT_TYPE_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const CONTENT_TYPE_DOC: &str = "application/msword";

/// Magic bytes of a PDF file
const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Magic bytes of an OLE2 compound file (legacy .doc among others)
const OLE_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Content type implied by a URL file extension
fn content_type_for_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "pdf" => Some(CONTENT_TYPE_PDF),
        "html" | "htm" => Some(CONTENT_TYPE_HTML),
        "docx" => Some(CONTENT_TYPE_DOCX),
        "doc" => Some(CONTENT_TYPE_DOC),
        _ => None,
    }
}

/// Binary signature sniffing on the first bytes
fn sniff_signature(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(PDF_SIGNATURE) {
        return Some(CONTENT_TYPE_PDF);
    }
    if data.starts_with(OLE_SIGNATURE) {
        return Some(CONTENT_TYPE_DOC);
    }
    None
}

/// Extension of the final path segment of a URL, lowercased, without
/// query or fragment
fn url_extension(source_url: &str) -> Option<String> {
    let path = source_url
        .split(['?', '#'])
        .next()
        .unwrap_or(source_url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (stem, extension) = segment.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Decide the content type of downloaded bytes.
///
/// Priority cascade:
/// 1. binary signature of the payload (wins regardless of URL or header);
/// 2. the URL's file extension;
/// 3. the `Content-Type` header with any `; charset=...` parameters
///    stripped;
/// 4. empty string for anything unrecognized.
pub fn resolve_content_type(data: &[u8], source_url: &str, header_content_type: &str) -> String {
    if let Some(sniffed) = sniff_signature(data) {
        return sniffed.to_string();
    }

    if let Some(from_url) = url_extension(source_url).and_then(|e| content_type_for_extension(&e)) {
        return from_url.to_string();
    }

    header_content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_beats_url_and_header() {
        let got = resolve_content_type(b"%PDF-1.7 ...", "https://aweb.site/file.html", "text/html");
        assert_eq!(got, CONTENT_TYPE_PDF);
    }

    #[test]
    fn test_ole_signature_resolves_to_doc() {
        let mut payload = OLE_SIGNATURE.to_vec();
        payload.extend_from_slice(&[0u8; 64]);
        let got = resolve_content_type(&payload, "https://aweb.site/file", "");
        assert_eq!(got, CONTENT_TYPE_DOC);
    }

    #[test]
    fn test_url_extension_beats_header() {
        let got = resolve_content_type(b"", "https://aweb.site/file.pdf", "text/html");
        assert_eq!(got, CONTENT_TYPE_PDF);
    }

    #[test]
    fn test_extension_wins_with_empty_header() {
        let got = resolve_content_type(b"", "https://aweb.site/file.pdf", "");
        assert_eq!(got, CONTENT_TYPE_PDF);
    }

    #[test]
    fn test_header_parameters_are_stripped() {
        let got = resolve_content_type(b"", "https://aweb.site/file", "text/html; charset=utf-8");
        assert_eq!(got, CONTENT_TYPE_HTML);
    }

    #[test]
    fn test_unknown_everything_is_empty() {
        let got = resolve_content_type(b"", "https://aweb.site/file", "");
        assert_eq!(got, "");
    }

    #[test]
    fn test_query_string_does_not_confuse_extension() {
        let got = resolve_content_type(b"", "https://aweb.site/file.pdf?dl=1", "");
        assert_eq!(got, CONTENT_TYPE_PDF);
        let got = resolve_content_type(b"", "https://aweb.site/page?format=.pdf", "");
        assert_eq!(got, "");
    }
}
