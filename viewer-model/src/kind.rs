use std::fmt::{self, Display, Formatter};

/// The four kinds of catalogue entries the indexer distinguishes.
///
/// Folders are synthetic: the store never persists a `File` row of kind
/// [`MediaKind::Folder`], but directory listings synthesize one per
/// subdirectory so clients can render a unified tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MediaKind {
    /// A still image (jpg, png, webp, gif, …).
    Image,
    /// A video file (mp4, mkv, webm, …).
    Video,
    /// A playlist file (currently only Windows Media Player WPL).
    Playlist,
    /// A synthetic directory row.
    Folder,
}

impl MediaKind {
    /// Classify a file by its extension, matching the table the indexer
    /// uses when walking the media tree. Returns `None` for extensions the
    /// server does not treat as media (the indexer skips such files).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "heic" | "avif" => {
                Some(Self::Image)
            }
            "mp4" | "mkv" | "webm" | "avi" | "mov" | "m4v" | "flv" | "wmv" | "mpg" | "mpeg"
            | "ts" | "m2ts" | "3gp" | "ogv" => Some(Self::Video),
            "wpl" => Some(Self::Playlist),
            _ => None,
        }
    }

    /// A MIME type hint derived from the same extension table used for
    /// classification. This is a hint only: the store never sniffs content.
    #[must_use]
    pub fn mime_hint(self, ext: &str) -> &'static str {
        match (self, ext.to_ascii_lowercase().as_str()) {
            (Self::Image, "jpg" | "jpeg") => "image/jpeg",
            (Self::Image, "png") => "image/png",
            (Self::Image, "gif") => "image/gif",
            (Self::Image, "webp") => "image/webp",
            (Self::Image, "bmp") => "image/bmp",
            (Self::Image, "heic") => "image/heic",
            (Self::Image, "avif") => "image/avif",
            (Self::Video, "mp4" | "m4v") => "video/mp4",
            (Self::Video, "mkv") => "video/x-matroska",
            (Self::Video, "avi") => "video/x-msvideo",
            (Self::Video, "mov") => "video/quicktime",
            (Self::Video, "webm") => "video/webm",
            (Self::Video, "flv") => "video/x-flv",
            (Self::Video, "wmv") => "video/x-ms-wmv",
            (Self::Video, "mpg" | "mpeg") => "video/mpeg",
            (Self::Video, "3gp") => "video/3gpp",
            (Self::Video, "ogv") => "video/ogg",
            (Self::Video, "ts" | "m2ts") => "video/mp2t",
            (Self::Playlist, _) => "application/vnd.ms-wpl+xml",
            _ => "application/octet-stream",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Playlist => "playlist",
            Self::Folder => "folder",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_extensions() {
        assert_eq!(MediaKind::from_extension("JPG"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_extension("mkv"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_extension("wpl"), Some(MediaKind::Playlist));
        assert_eq!(MediaKind::from_extension("txt"), None);
    }

    #[test]
    fn mime_hint_falls_back_to_octet_stream() {
        assert_eq!(MediaKind::Video.mime_hint("mp4"), "video/mp4");
        assert_eq!(MediaKind::Image.mime_hint("xyz"), "application/octet-stream");
    }
}
