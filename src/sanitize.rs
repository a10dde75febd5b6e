use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Longest title we hand out, in characters.
pub const MAX_TITLE_LEN: usize = 150;

/// Tag in front of generated titles.
pub const PLACEHOLDER_PREFIX: &str = "rbtv-";

const PLACEHOLDER_TOKEN_LEN: usize = 8;
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn disallowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._\-]").expect("valid regex"))
}

fn underscore_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_+").expect("valid regex"))
}

/// Turns a human readable title into something safe to use as a file name
/// and inside an unquoted `Content-Disposition` header.
///
/// The text is decomposed (NFKD) and whatever is left outside ASCII is
/// dropped. Every remaining character other than letters, digits, `.`, `_`
/// and `-` becomes `_` (whitespace included), runs of `_` collapse, and
/// leading/trailing `.`/`_` are trimmed. The result is at most
/// [`MAX_TITLE_LEN`] characters and may be empty.
pub fn sanitize_title(title: &str) -> String {
    let ascii: String = title
        .replace('\u{2013}', "-")
        .nfkd()
        .filter(char::is_ascii)
        .collect();

    let replaced = disallowed().replace_all(&ascii, "_");
    let collapsed = underscore_runs().replace_all(&replaced, "_");

    let trimmed = collapsed.trim_start_matches(['.', '_']);
    // Only ASCII is left, so byte indices are char boundaries.
    let truncated = &trimmed[..trimmed.len().min(MAX_TITLE_LEN)];

    truncated.trim_end_matches(['.', '_']).to_string()
}

/// Generates a stand-in title such as `rbtv-QwErTyUi`.
pub fn placeholder_title<R: Rng>(rng: &mut R) -> String {
    let token: String = (0..PLACEHOLDER_TOKEN_LEN)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect();

    format!("{}{}", PLACEHOLDER_PREFIX, token)
}
