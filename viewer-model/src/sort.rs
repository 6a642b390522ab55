use crate::kind::MediaKind;

/// Column directory listings and search results can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SortKey {
    /// Sort by basename.
    Name,
    /// Sort by size in bytes.
    Size,
    /// Sort by modification time.
    Modified,
}

impl Default for SortKey {
    fn default() -> Self {
        Self::Name
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Asc
    }
}

/// An optional restriction to a single media kind, used by listing and
/// search endpoints. `All` means no restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TypeFilter {
    /// No restriction.
    All,
    /// Only entries of the given kind.
    Only(MediaKind),
}

impl Default for TypeFilter {
    fn default() -> Self {
        Self::All
    }
}

impl TypeFilter {
    /// Whether `kind` passes this filter.
    #[must_use]
    pub fn matches(self, kind: MediaKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(k) => k == kind,
        }
    }
}

/// A 1-indexed page request with a bounded page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Page {
    /// 1-indexed page number.
    pub number: u32,
    /// Items per page.
    pub size: u32,
}

impl Page {
    /// Largest page size the store will honor regardless of request.
    pub const MAX_SIZE: u32 = 500;
    /// Default page size when none is supplied.
    pub const DEFAULT_SIZE: u32 = 50;

    /// Construct a page request, clamping `size` into `1..=MAX_SIZE`.
    #[must_use]
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: number.max(1),
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    /// Row offset implied by this page (0-indexed).
    #[must_use]
    pub fn offset(self) -> u32 {
        (self.number - 1) * self.size
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_SIZE)
    }
}
