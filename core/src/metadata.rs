//! Metadata provider (SPEC_FULL.md supplement to spec §4.A).
//!
//! The reference `detect_song_metadata` runs two tiers: embedded tags, then
//! an AcoustID acoustic-fingerprint lookup. The fingerprint tier depends on
//! a network service and is out of scope for this offline core (spec §1);
//! only the tag tier is implemented, as a pluggable `MetadataProvider` in
//! the style of `mecomp-analysis`'s `Decoder` trait, read through `lofty`
//! the same way `storage::db::schemas::song::Song::load_from_path` does.

use std::path::Path;

use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;

/// Tags discovered from a file's embedded metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectedMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
}

impl DetectedMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none() && self.genre.is_none()
    }

    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec!["ai-generated".to_string(), "metadata:detected".to_string()];
        if let Some(genre) = &self.genre {
            tags.push(genre.to_lowercase());
        }
        tags
    }
}

pub trait MetadataProvider {
    fn detect(&self, path: &Path) -> DetectedMetadata;

    fn name(&self) -> &'static str;
}

/// Reads embedded ID3/Vorbis/etc. tags via `lofty`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagMetadataProvider;

impl MetadataProvider for TagMetadataProvider {
    fn detect(&self, path: &Path) -> DetectedMetadata {
        let Ok(probe) = Probe::open(path) else {
            return DetectedMetadata::default();
        };
        let Ok(tagged_file) = probe.read() else {
            return DetectedMetadata::default();
        };
        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return DetectedMetadata::default();
        };

        DetectedMetadata {
            title: tag.title().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            artist: tag.artist().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            album: tag.album().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            genre: tag.genre().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        }
    }

    fn name(&self) -> &'static str {
        "embedded_tags"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metadata_has_no_tags_beyond_defaults() {
        let metadata = DetectedMetadata::default();
        assert!(metadata.is_empty());
    }

    #[test]
    fn tags_include_genre_when_present() {
        let metadata = DetectedMetadata {
            genre: Some("Rock".to_string()),
            ..Default::default()
        };
        let tags = metadata.tags();
        assert!(tags.contains(&"rock".to_string()));
        assert!(tags.contains(&"ai-generated".to_string()));
    }

    #[test]
    fn missing_file_yields_empty_metadata() {
        let provider = TagMetadataProvider;
        let detected = provider.detect(Path::new("/nonexistent/path/does-not-exist.flac"));
        assert!(detected.is_empty());
    }
}
