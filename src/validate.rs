use std::sync::LazyLock;

use regex::Regex;

pub const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

const SNIPPET_LEN: usize = 200;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not an image: content type {content_type:?} from {url}, body starts with {snippet:?}")]
pub struct InvalidContent {
    pub content_type: String,
    pub url: String,
    pub snippet: String,
}

/// Checks that a fetched payload is image content before it reaches the
/// document.
pub fn validate(bytes: &[u8], content_type: &str, url: &str) -> Result<(), InvalidContent> {
    let declared = content_type.trim();
    let accepted = declared
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
        || declared == "application/octet-stream"
        || (declared.is_empty() && bytes.starts_with(&PNG_MAGIC));
    if accepted {
        return Ok(());
    }
    Err(InvalidContent {
        content_type: declared.to_owned(),
        url: url.to_owned(),
        snippet: snippet(bytes),
    })
}

/// The first bytes of a payload read as character codes, whitespace runs
/// collapsed.
fn snippet(bytes: &[u8]) -> String {
    let head = bytes
        .iter()
        .take(SNIPPET_LEN)
        .map(|&byte| char::from(byte))
        .collect::<String>();
    WHITESPACE.replace_all(&head, " ").into_owned()
}
