//! MIME type detection based on file extensions.

use std::path::Path;

/// Content type for files whose extension is not in the table.
pub const DEFAULT_MIME: &str = "application/octet-stream";

const MIME_TABLE: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("css", "text/css"),
    ("png", "image/png"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("pdf", "application/pdf"),
];

/// Returns the content type for `path`.
///
/// Extensions are matched exactly (`.HTML` is not `text/html`). A leading dot
/// alone, as in `.css`, names a hidden file rather than an extension.
///
/// # Example
///
/// ```
/// # use liso::http::mime::mime_type;
/// # use std::path::Path;
/// assert_eq!(mime_type(Path::new("site/index.html")), "text/html");
/// assert_eq!(mime_type(Path::new("notes.txt")), "application/octet-stream");
/// ```
pub fn mime_type(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            MIME_TABLE
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(DEFAULT_MIME)
}
