//! Site naming. A contest bound to an upstream site is addressed through a
//! derived "clone name" of the form `<site>_ct_<contest_id>`.

use once_cell::sync::Lazy;
use regex::Regex;

static CLONE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)_ct_([0-9]+)$").expect("clone name regex"));

/// Split a clone name into `(site, contest_id)`. Returns `None` for plain
/// practice-site names.
pub fn split_clone_name(name: &str) -> Option<(&str, &str)> {
    let caps = CLONE_NAME.captures(name)?;
    let site = caps.get(1)?.as_str();
    let contest_id = caps.get(2)?.as_str();
    Some((site, contest_id))
}

pub fn clone_name(site: &str, contest_id: &str) -> String {
    format!("{site}_ct_{contest_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_contest_names() {
        assert_eq!(split_clone_name("hdu_ct_1001"), Some(("hdu", "1001")));
        assert_eq!(split_clone_name("a_b_ct_7"), Some(("a_b", "7")));
    }

    #[test]
    fn rejects_plain_and_malformed_names() {
        assert_eq!(split_clone_name("hdu"), None);
        assert_eq!(split_clone_name("hdu_ct_"), None);
        assert_eq!(split_clone_name("hdu_ct_12x"), None);
        assert_eq!(split_clone_name("_ct_5x_"), None);
    }

    #[test]
    fn round_trips_through_clone_name() {
        let name = clone_name("scu", "42");
        assert_eq!(split_clone_name(&name), Some(("scu", "42")));
    }
}
