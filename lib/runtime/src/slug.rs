//! Public-run slug generation (`POST /w/:slug/run`).

use rand::distributions::Alphanumeric;
use rand::Rng;

const MAX_NAME_ATTEMPTS: usize = 5;
const RANDOM_SUFFIX_LEN: usize = 6;
const FALLBACK_LEN: usize = 12;

fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_dash = true; // suppresses a leading dash
    for ch in name.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    if out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("workflow");
    }
    out
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Generates a URL-safe slug for `name`, retrying with a random suffix
/// on collision (reported via `exists`) before giving up on a readable
/// slug entirely and falling back to a fully random one.
pub fn generate_unique_slug(name: &str, mut exists: impl FnMut(&str) -> bool) -> String {
    let base = slugify(name);

    if !exists(&base) {
        return base;
    }

    for _ in 0..MAX_NAME_ATTEMPTS {
        let candidate = format!("{base}-{}", random_suffix(RANDOM_SUFFIX_LEN));
        if !exists(&candidate) {
            return candidate;
        }
    }

    loop {
        let candidate = random_suffix(FALLBACK_LEN);
        if !exists(&candidate) {
            return candidate;
        }
    }
}
