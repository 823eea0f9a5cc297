use std::sync::OnceLock;

use regex::Regex;

fn year_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\(\d{4}\)\s*$").expect("valid year suffix regex"))
}

/// Key used to order the movie listing.
/// Lowercases, strips a leading article and punctuation, drops a "(YYYY)" suffix.
pub fn make_sort_title(title: &str) -> String {
    let mut sort_title = title.trim().to_lowercase();

    for article in ["the ", "a ", "an "] {
        if let Some(rest) = sort_title.strip_prefix(article) {
            sort_title = rest.trim_start().to_string();
            break;
        }
    }

    let sort_title = sort_title
        .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation());

    year_suffix().replace(sort_title, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_sort_title() {
        assert_eq!(make_sort_title("The Matrix"), "matrix");
        assert_eq!(make_sort_title("A Beautiful Mind"), "beautiful mind");
        assert_eq!(make_sort_title("An Inconvenient Truth"), "inconvenient truth");
        assert_eq!(make_sort_title("Heat (1995)"), "heat");
        assert_eq!(make_sort_title("  ...And Justice for All"), "and justice for all");
        assert_eq!(make_sort_title("Theodore Rex"), "theodore rex");
    }
}
