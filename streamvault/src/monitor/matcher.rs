//! Term matching over feed items.
//!
//! Pure functions: given a subscription's terms, an item's text and the
//! descriptions of the items that follow it in the feed, return the labels
//! of the matching terms.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use youtube_feeds::FeedEntry;

use crate::domain::Term;

/// A feed entry whose title or unique description text matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMatch {
    /// Index into the polled entries.
    pub index: usize,
    pub terms: BTreeSet<String>,
}

/// Drop combining marks, undoing "zalgo" decoration.
pub fn strip_marks(text: &str) -> String {
    text.chars().filter(|c| !is_combining_mark(*c)).collect()
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Remove whitespace between single letters so "K A R A O K E" reads as
/// "KARAOKE". Other whitespace is untouched.
pub fn compact_spaced_letters(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let is_lone_letter = |i: usize| -> bool {
        chars[i].is_alphabetic()
            && (i == 0 || !is_word(chars[i - 1]))
            && (i + 1 == chars.len() || !is_word(chars[i + 1]))
    };
    // A lone letter on the left may be followed by whitespace, so check its
    // left neighbour only.
    let starts_lone = |i: usize| -> bool {
        chars[i].is_alphabetic() && (i == 0 || !is_word(chars[i - 1]))
    };

    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_whitespace() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let joinable = start > 0 && i < chars.len() && starts_lone(start - 1) && is_lone_letter(i);
        if !joinable {
            out.extend(&chars[start..i]);
        }
    }
    out
}

/// The variants of `text` that terms are tried against.
pub fn haystacks(text: &str) -> Vec<Cow<'_, str>> {
    let ascii = deunicode::deunicode(text);
    let compacted = compact_spaced_letters(&ascii);
    vec![
        Cow::Borrowed(text),
        Cow::Owned(text.nfkc().collect()),
        Cow::Owned(ascii),
        Cow::Owned(compacted),
        Cow::Owned(strip_marks(text)),
    ]
}

/// Labels of every term matching any normalized form of `text`.
pub fn get_pattern_matches(terms: &[Term], text: &str) -> BTreeSet<String> {
    if terms.is_empty() || text.is_empty() {
        return BTreeSet::new();
    }
    let haystacks = haystacks(text);
    terms
        .iter()
        .filter(|term| haystacks.iter().any(|h| term.pattern.is_match(h)))
        .map(|term| term.label.clone())
        .collect()
}

/// Lines of `description` that do not also appear in any of `older`.
///
/// Lines are compared right-trimmed and the original order is kept, so
/// boilerplate shared across a channel's items does not trigger matches.
pub fn unique_description_lines(description: &str, older: &[&str]) -> String {
    let seen: HashSet<&str> = older
        .iter()
        .flat_map(|text| text.lines())
        .map(str::trim_end)
        .collect();

    description
        .lines()
        .map(str::trim_end)
        .filter(|line| !seen.contains(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Match one item's title and its unique description text.
pub fn match_item(terms: &[Term], title: &str, description: &str, older: &[&str]) -> BTreeSet<String> {
    let mut matched = get_pattern_matches(terms, title);
    matched.extend(get_pattern_matches(
        terms,
        &unique_description_lines(description, older),
    ));
    matched
}

/// Whether the entry at `index` has an older neighbour to compare its
/// description against.
pub fn has_window(lookbehind: usize, index: usize, entries: usize) -> bool {
    lookbehind == 0 || index + 1 < entries
}

/// Match every entry of a poll. Each entry's description is compared against
/// the descriptions of up to `lookbehind` entries after it (older items, as
/// feeds list newest first). The oldest entry has no such window, so only its
/// title is matched.
pub fn match_entries(terms: &[Term], lookbehind: usize, entries: &[FeedEntry]) -> Vec<ItemMatch> {
    if terms.is_empty() {
        return Vec::new();
    }

    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let terms = if has_window(lookbehind, index, entries.len()) {
                let end = (index + 1 + lookbehind).min(entries.len());
                let older: Vec<&str> = entries[index + 1..end]
                    .iter()
                    .map(|e| e.description.as_str())
                    .collect();
                match_item(terms, &entry.title, &entry.description, &older)
            } else {
                get_pattern_matches(terms, &entry.title)
            };
            (!terms.is_empty()).then_some(ItemMatch { index, terms })
        })
        .collect()
}
