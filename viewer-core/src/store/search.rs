//! Search query grammar: `tag:X`, `-tag:X`, `NOT tag:X`, and free text.
//! Parsing only — execution lives in [`super::CatalogueStore::search`].

/// A parsed search query: free-text terms plus included/excluded tag sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Free-text terms, joined with spaces, matched against the FTS index.
    pub text: String,
    /// Tags every result must carry.
    pub include_tags: Vec<String>,
    /// Tags no result may carry.
    pub exclude_tags: Vec<String>,
}

/// Parse a raw query string into its structured form. Never fails: terms
/// that don't match a recognized prefix are treated as free text.
#[must_use]
pub fn parse(query: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut text_terms = Vec::new();
    let mut tokens = query.split_whitespace().peekable();

    while let Some(token) = tokens.next() {
        if let Some(tag) = token.strip_prefix("-tag:") {
            if !tag.is_empty() {
                parsed.exclude_tags.push(tag.to_string());
            }
            continue;
        }
        if let Some(tag) = token.strip_prefix("tag:") {
            if !tag.is_empty() {
                parsed.include_tags.push(tag.to_string());
            }
            continue;
        }
        if token.eq_ignore_ascii_case("not") {
            if let Some(next) = tokens.peek() {
                if let Some(tag) = next.strip_prefix("tag:") {
                    if !tag.is_empty() {
                        parsed.exclude_tags.push(tag.to_string());
                    }
                    tokens.next();
                    continue;
                }
            }
        }
        text_terms.push(token);
    }

    parsed.text = text_terms.join(" ");
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_free_text_and_tags() {
        let parsed = parse("beach -tag:2023");
        assert_eq!(parsed.text, "beach");
        assert_eq!(parsed.exclude_tags, vec!["2023".to_string()]);
        assert!(parsed.include_tags.is_empty());
    }

    #[test]
    fn tag_only_query() {
        let parsed = parse("tag:beach");
        assert_eq!(parsed.include_tags, vec!["beach".to_string()]);
        assert!(parsed.text.is_empty());
    }

    #[test]
    fn not_tag_excludes() {
        let parsed = parse("NOT tag:beach");
        assert_eq!(parsed.exclude_tags, vec!["beach".to_string()]);
        assert!(parsed.include_tags.is_empty());
    }

    #[test]
    fn mixed_terms() {
        let parsed = parse("sunset tag:2024 -tag:private NOT tag:draft");
        assert_eq!(parsed.text, "sunset");
        assert_eq!(parsed.include_tags, vec!["2024".to_string()]);
        assert_eq!(
            parsed.exclude_tags,
            vec!["private".to_string(), "draft".to_string()]
        );
    }
}
