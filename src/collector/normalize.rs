//! Process label normalization.
//!
//! Turns a raw command line into a stable series key:
//! - `/usr/bin/weston --idle-time=0` → `weston`
//! - `{page://player} --fullscreen` → `player`
//!
//! Anything else passes through (trimmed). Rules are applied until the label
//! stops changing, so the result is a fixpoint and normalization is idempotent.

/// Path prefixes stripped down to the executable basename.
const KNOWN_PATH_PREFIXES: &[&str] = &[
    "/usr/local/bin/",
    "/usr/bin/",
    "/usr/sbin/",
    "/bin/",
    "/sbin/",
];

/// URI-style scheme marker used by page/application launchers.
const PAGE_SCHEME: &str = "{page://";

/// Normalizes a raw process label into a series key.
pub fn normalize_label(raw: &str) -> String {
    let mut current = raw.trim();
    // Every rule that fires removes a non-empty prefix, so this terminates.
    while let Some(next) = normalize_step(current) {
        current = next.trim();
    }
    current.to_string()
}

fn normalize_step(label: &str) -> Option<&str> {
    if let Some(rest) = KNOWN_PATH_PREFIXES
        .iter()
        .find_map(|prefix| label.strip_prefix(prefix))
    {
        let executable = first_token(rest);
        return Some(executable.rsplit('/').next().unwrap_or(executable));
    }

    if let Some(rest) = label.strip_prefix(PAGE_SCHEME) {
        return Some(first_token(rest).trim_end_matches('}'));
    }

    None
}

/// Text up to the first whitespace character (empty if it starts with one).
fn first_token(s: &str) -> &str {
    s.split(char::is_whitespace).next().unwrap_or("")
}
