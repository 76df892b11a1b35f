//! Version-aware tag ordering.
//!
//! Tags compare chunk by chunk: digit runs numerically, everything else
//! lexically. A leading `v` before a digit is ignored, and a release sorts
//! after its own pre-releases (`1.0.0` > `1.0.0-rc.2`). Ties fall back to the
//! raw string so the order is total.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk<'a> {
    Text(&'a str),
    /// Digit run with leading zeros stripped.
    Num(&'a str),
}

fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let digit = bytes[start].is_ascii_digit();
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() == digit {
            end += 1;
        }
        let run = &s[start..end];
        if digit {
            let trimmed = run.trim_start_matches('0');
            out.push(Chunk::Num(if trimmed.is_empty() { "0" } else { trimmed }));
        } else {
            out.push(Chunk::Text(run));
        }
        start = end;
    }
    out
}

fn cmp_chunk(a: &Chunk<'_>, b: &Chunk<'_>) -> Ordering {
    match (a, b) {
        (Chunk::Num(x), Chunk::Num(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
        (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
        (Chunk::Text(_), Chunk::Num(_)) => Ordering::Less,
        (Chunk::Num(_), Chunk::Text(_)) => Ordering::Greater,
    }
}

fn cmp_chunked(a: &str, b: &str) -> Ordering {
    let (ca, cb) = (chunks(a), chunks(b));
    for (x, y) in ca.iter().zip(&cb) {
        let ord = cmp_chunk(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    ca.len().cmp(&cb.len())
}

/// Split into (release, pre-release) after dropping a `v` prefix.
fn split(tag: &str) -> (&str, Option<&str>) {
    let bare = match tag.strip_prefix(&['v', 'V'][..]) {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => tag,
    };
    if !bare.starts_with(|c: char| c.is_ascii_digit()) {
        return (bare, None);
    }
    match bare.split_once('-') {
        Some((release, pre)) => (release, Some(pre)),
        None => (bare, None),
    }
}

/// Total, version-aware ordering of two tag names.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (ra, pa) = split(a);
    let (rb, pb) = split(b);
    cmp_chunked(ra, rb)
        .then_with(|| match (pa, pb) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => cmp_chunked(x, y),
        })
        .then_with(|| a.cmp(b))
}

/// The highest-versioned tag, if any.
pub fn latest<'a, I>(tags: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter().max_by(|a, b| compare_versions(a, b))
}
