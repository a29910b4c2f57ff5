//! Just enough HTML slicing for the status and listing pages the adapters
//! scrape: tables, rows, cells, and tag stripping. Problem statements are
//! stored as raw HTML fragments and are not run through `strip_tags`.

use once_cell::sync::Lazy;
use regex::Regex;

static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<table[^>]*>(.*?)</table>").expect("table regex"));
static TR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").expect("tr regex"));
static TD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>").expect("td regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));

/// All tables on the page as `(opening_tag_and_body, body)` pairs; the full
/// slice keeps the `<table ...>` attributes so callers can match on classes.
pub(crate) fn tables(page: &str) -> Vec<(&str, &str)> {
    TABLE_RE
        .captures_iter(page)
        .filter_map(|caps| {
            let full = caps.get(0)?.as_str();
            let body = caps.get(1)?.as_str();
            Some((full, body))
        })
        .collect()
}

pub(crate) fn rows(fragment: &str) -> Vec<&str> {
    TR_RE
        .captures_iter(fragment)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Cell texts of one row, tags stripped and whitespace collapsed.
pub(crate) fn cells(row: &str) -> Vec<String> {
    TD_RE
        .captures_iter(row)
        .filter_map(|caps| caps.get(1).map(|m| strip_tags(m.as_str())))
        .collect()
}

pub(crate) fn strip_tags(fragment: &str) -> String {
    let text = TAG_RE.replace_all(fragment, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
