/// A tag that can be attached to files.
///
/// Identity is the name: case-sensitive, unicode, at most 64 characters.
/// Tags are implicitly created on first assignment and persist after their
/// usage count drops to zero, until explicitly deleted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag {
    /// Tag name, unique, max 64 chars.
    pub name: String,
    /// Optional UI color, e.g. `"#ff8800"`.
    pub color: Option<String>,
    /// Number of files currently carrying this tag.
    pub item_count: u64,
}

impl Tag {
    /// Maximum allowed length of a tag name, in characters.
    pub const MAX_NAME_LEN: usize = 64;

    /// Validate a candidate tag name against the length invariant.
    pub fn validate_name(name: &str) -> Result<(), TagNameError> {
        if name.is_empty() {
            return Err(TagNameError::Empty);
        }
        if name.chars().count() > Self::MAX_NAME_LEN {
            return Err(TagNameError::TooLong);
        }
        Ok(())
    }
}

/// A validation failure for a candidate tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TagNameError {
    /// The name was empty.
    #[error("tag name must not be empty")]
    Empty,
    /// The name exceeded [`Tag::MAX_NAME_LEN`] characters.
    #[error("tag name exceeds {} characters", Tag::MAX_NAME_LEN)]
    TooLong,
}

/// The many-to-many relation between a [`crate::File`] and a [`Tag`].
///
/// `(file, tag)` is unique; rows cascade on deletion of either side.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileTag {
    /// Path of the tagged file.
    pub file_path: String,
    /// Name of the attached tag.
    pub tag_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_overlong_names() {
        assert!(Tag::validate_name("vacation").is_ok());
        assert_eq!(Tag::validate_name(""), Err(TagNameError::Empty));
        let long = "a".repeat(65);
        assert_eq!(Tag::validate_name(&long), Err(TagNameError::TooLong));
        let max = "a".repeat(64);
        assert!(Tag::validate_name(&max).is_ok());
    }
}
