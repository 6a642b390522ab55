//! Playlist resolver, part of the catalogue store.
//!
//! Playlists are Files whose kind is [`viewer_model::MediaKind::Playlist`];
//! their body (Windows Media Player WPL: `<smil><body><seq><media
//! src="…"/></seq></body></smil>`) is parsed lazily on read. Parsing is
//! synchronous and pure; resolving parsed `src` values against the
//! catalogue needs store access, so that half is expressed over the
//! [`PlaylistLookup`] trait the store implements.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ViewerError, ViewerResult};
use viewer_model::PlaylistEntry;

/// Extract the ordered list of raw `src` attribute values from a WPL
/// document's `<media>` elements.
pub fn parse_wpl_sources(xml: &[u8]) -> ViewerResult<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text = true;
    let mut sources = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Empty(tag)) | Ok(Event::Start(tag)) if tag.name().as_ref() == b"media" => {
                for attr in tag.attributes().flatten() {
                    if attr.key.as_ref() == b"src" {
                        let value = attr
                            .decode_and_unescape_value(reader.decoder())
                            .map_err(|err| {
                                ViewerError::Validation(format!("malformed playlist: {err}"))
                            })?;
                        sources.push(value.into_owned());
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                return Err(ViewerError::Validation(format!(
                    "malformed playlist xml: {err}"
                )))
            }
        }
        buf.clear();
    }

    Ok(sources)
}

/// Store access the resolver needs: existence checks and basename search,
/// scoped to a directory subtree.
#[async_trait]
pub trait PlaylistLookup: Send + Sync {
    /// Whether a repository-relative path is a known file.
    async fn file_exists(&self, path: &str) -> ViewerResult<bool>;

    /// Find the first (in sort order) file under `dir_prefix` whose
    /// basename equals `basename`.
    async fn find_by_basename(
        &self,
        dir_prefix: &str,
        basename: &str,
    ) -> ViewerResult<Option<String>>;
}

/// Resolve every `<media src>` entry in a WPL document relative to
/// `playlist_path`, applying the four resolution rules in order.
pub async fn resolve(
    playlist_path: &str,
    xml: &[u8],
    lookup: &dyn PlaylistLookup,
) -> ViewerResult<Vec<PlaylistEntry>> {
    let sources = parse_wpl_sources(xml)?;
    let playlist_dir = match playlist_path.rfind('/') {
        Some(idx) => &playlist_path[..idx],
        None => "",
    };

    let mut entries = Vec::with_capacity(sources.len());
    for src in sources {
        entries.push(resolve_one(playlist_dir, &src, lookup).await?);
    }
    Ok(entries)
}

async fn resolve_one(
    playlist_dir: &str,
    src: &str,
    lookup: &dyn PlaylistLookup,
) -> ViewerResult<PlaylistEntry> {
    let basename = src.rsplit(['/', '\\']).next().unwrap_or(src).to_string();

    // Rule 1: absolute (drive letter, UNC, or POSIX-absolute).
    if let Some(normalized) = strip_absolute_prefix(src) {
        if lookup.file_exists(&normalized).await? {
            return Ok(PlaylistEntry {
                display_name: basename,
                resolved_path: Some(normalized),
            });
        }
    }

    // Rule 2: relative to the playlist's directory.
    let relative = join(playlist_dir, &src.replace('\\', "/"));
    if lookup.file_exists(&relative).await? {
        return Ok(PlaylistEntry {
            display_name: basename,
            resolved_path: Some(relative),
        });
    }

    // Rule 3: basename fallback within the playlist's directory subtree.
    if let Some(found) = lookup.find_by_basename(playlist_dir, &basename).await? {
        return Ok(PlaylistEntry {
            display_name: basename,
            resolved_path: Some(found),
        });
    }

    // Rule 4: unresolved, kept verbatim.
    Ok(PlaylistEntry {
        display_name: src.to_string(),
        resolved_path: None,
    })
}

fn join(dir: &str, rest: &str) -> String {
    let rest = rest.trim_start_matches('/');
    let combined = if dir.is_empty() {
        rest.to_string()
    } else {
        format!("{dir}/{rest}")
    };

    let mut stack: Vec<&str> = Vec::new();
    for segment in combined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    stack.join("/")
}

/// If `src` looks absolute (POSIX `/...`, a drive letter `C:\...`, or a UNC
/// path `\\host\share\...`), normalize separators to `/` and strip the
/// drive letter / UNC host+share so the remainder can be looked up under
/// the media root. Returns `None` for anything that isn't absolute.
fn strip_absolute_prefix(src: &str) -> Option<String> {
    if let Some(rest) = src.strip_prefix("\\\\") {
        let normalized = rest.replace('\\', "/");
        let mut parts = normalized.splitn(3, '/');
        let _host = parts.next()?;
        let _share = parts.next()?;
        let remainder = parts.next().unwrap_or("");
        return Some(remainder.trim_start_matches('/').to_string());
    }
    if src.len() >= 2 && src.as_bytes()[1] == b':' && src.as_bytes()[0].is_ascii_alphabetic() {
        let normalized = src[2..].replace('\\', "/");
        return Some(normalized.trim_start_matches('/').to_string());
    }
    if let Some(rest) = src.strip_prefix('/') {
        return Some(rest.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeLookup {
        existing: HashSet<String>,
    }

    #[async_trait]
    impl PlaylistLookup for FakeLookup {
        async fn file_exists(&self, path: &str) -> ViewerResult<bool> {
            Ok(self.existing.contains(path))
        }

        async fn find_by_basename(
            &self,
            dir_prefix: &str,
            basename: &str,
        ) -> ViewerResult<Option<String>> {
            let mut candidates: Vec<&String> = self
                .existing
                .iter()
                .filter(|p| p.starts_with(dir_prefix) && p.ends_with(basename))
                .collect();
            candidates.sort();
            Ok(candidates.into_iter().next().cloned())
        }
    }

    const WPL: &str = r#"<?xml version="1.0"?>
<smil>
  <body>
    <seq>
      <media src="beach.jpg"/>
      <media src="../other/sunset.jpg"/>
      <media src="does-not-exist.jpg"/>
    </seq>
  </body>
</smil>"#;

    #[tokio::test]
    async fn resolves_relative_and_leaves_missing_opaque() {
        let lookup = FakeLookup {
            existing: ["vacation/2024/beach.jpg", "vacation/other/sunset.jpg"]
                .into_iter()
                .map(String::from)
                .collect(),
        };
        let entries = resolve("vacation/2024/trip.wpl", WPL.as_bytes(), &lookup)
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].resolved_path.as_deref(), Some("vacation/2024/beach.jpg"));
        assert_eq!(entries[2].resolved_path, None);
        assert_eq!(entries[2].display_name, "does-not-exist.jpg");
    }
}
