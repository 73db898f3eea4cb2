//! Change detection for conditional GETs.
//!
//! [`fingerprint`] hashes only what a client renders: the sample source,
//! the capacity and hist_tail in use, and the raw sampled outcomes. Colors
//! are derived from the outcomes and are left out.

use sha1::{Digest, Sha1};

use crate::stats::StatsSnapshot;

/// Cache-Control value sent with every statistics response: always revalidate.
pub const CACHE_CONTROL: &str = "no-cache";

/// Number of digest bytes kept in a token (16 hex characters).
const TOKEN_BYTES: usize = 8;

/// Strong validator for `snapshot`, quoted per HTTP convention.
pub fn fingerprint(snapshot: &StatsSnapshot) -> String {
    let numbers = snapshot
        .sample()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let input = format!(
        "{}|{}|{}|{}",
        snapshot.meta.source, snapshot.meta.window_capacity, snapshot.meta.hist_tail, numbers
    );

    let digest = Sha1::digest(input.as_bytes());
    let hex: String = digest[..TOKEN_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("\"{hex}\"")
}

/// Whether an `If-None-Match` header value matches `token`.
///
/// The header may list several comma-separated validators, each optionally
/// weak (`W/`) and quoted. Comparison ignores both markers.
pub fn matches(header: Option<&str>, token: &str) -> bool {
    let Some(header) = header.filter(|h| !h.trim().is_empty()) else {
        return false;
    };
    let wanted = normalize(token);
    header.split(',').any(|candidate| normalize(candidate) == wanted)
}

fn normalize(tag: &str) -> &str {
    let mut s = tag.trim();
    if let Some(rest) = s.strip_prefix("W/") {
        s = rest.trim();
    }
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s = &s[1..s.len() - 1];
    }
    s
}
