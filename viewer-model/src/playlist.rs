/// A single resolved entry from a parsed playlist file.
///
/// Unresolved `src` values (no match found under the media root) are kept
/// verbatim as opaque, non-navigable entries per the resolver's rule 4.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlaylistEntry {
    /// The name to display for this entry (basename or opaque `src`).
    pub display_name: String,
    /// The resolved repository-relative path, if one was found.
    pub resolved_path: Option<String>,
}
