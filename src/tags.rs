//! Tag parsing with Symphonia.
//!
//! Extracts [`Tags`] from the leading bytes of an audio file. The data comes
//! from untrusted hosts, so parsing never panics and never reads more than
//! it was given: anything that cannot be probed or carries no useful tags is
//! an error, which the [`pipeline`](crate::pipeline) turns into an
//! unavailable result.
//!
//! Tags are read from two places, in this order:
//! * metadata found while probing, in front of the container (ID3v2)
//! * metadata inside the container (Vorbis comments, MP4 atoms, RIFF INFO)
//!
//! The first non-empty value for a field wins.

use std::io::Cursor;

use symphonia::core::{
    formats::FormatOptions,
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::{Limit, MetadataOptions, MetadataRevision, StandardTagKey},
    probe::Hint,
};

use crate::{
    error::{Error, Result},
    protocol::Tags,
};

/// Parses the tags out of `data`.
///
/// `extension` is a hint for the container format, usually taken from the
/// file name in the URL.
///
/// # Errors
///
/// Returns error if:
/// * `data` is empty
/// * the container format is not recognised
/// * no title, artist or album could be found
pub fn parse(data: &[u8], extension: Option<&str>) -> Result<Tags> {
    if data.is_empty() {
        return Err(Error::invalid_argument("no data to read tags from"));
    }

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let stream = MediaSourceStream::new(
        Box::new(Cursor::new(data.to_vec())),
        MediaSourceStreamOptions::default(),
    );

    // Cover art is not passed on, so don't spend memory on it.
    let options = MetadataOptions {
        limit_visual_bytes: Limit::Maximum(0),
        ..Default::default()
    };

    let mut probed =
        symphonia::default::get_probe().format(&hint, stream, &FormatOptions::default(), &options)?;

    let mut tags = Tags::default();
    let mut found = Found::default();

    if let Some(mut metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.skip_to_latest() {
            apply(revision, &mut tags, &mut found);
        }
    }

    if let Some(revision) = probed.format.metadata().skip_to_latest() {
        apply(revision, &mut tags, &mut found);
    }

    if tags.title.is_none() && tags.artist.is_none() && tags.album.is_none() {
        return Err(Error::not_found("no tags found"));
    }

    Ok(tags)
}

/// Returns the size of the ID3v2 tag at the start of `data`, header and
/// footer included.
///
/// Cover art easily makes such a tag larger than a read window, and the
/// container behind it can only be probed once the whole tag is read.
#[must_use]
pub fn id3v2_len(data: &[u8]) -> Option<u64> {
    let header = data.get(..10)?;
    if &header[..3] != b"ID3" {
        return None;
    }

    // Synchsafe integer: 7 bits per byte, most significant byte first.
    let size = header[6..10].iter().try_fold(0u64, |size, &byte| {
        (byte & 0x80 == 0).then_some((size << 7) | u64::from(byte))
    })?;
    let footer = if header[5] & 0x10 == 0 { 0 } else { 10 };

    Some(10 + size + footer)
}

/// Returns the file extension of the last path segment of `locator`.
///
/// Query strings and fragments are ignored, so that signed URLs still yield
/// a hint.
#[must_use]
pub fn extension(locator: &str) -> Option<&str> {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let name = path.rsplit('/').next()?;
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }

    Some(extension)
}

/// Which numeric fields were set from tags rather than defaulted.
#[derive(Default)]
struct Found {
    nr: bool,
    disc: bool,
}

fn apply(revision: &MetadataRevision, tags: &mut Tags, found: &mut Found) {
    for tag in revision.tags() {
        let Some(key) = tag.std_key else {
            continue;
        };

        let value = tag.value.to_string();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key {
            StandardTagKey::TrackTitle => set_text(&mut tags.title, value),
            StandardTagKey::Artist => set_text(&mut tags.artist, value),
            StandardTagKey::AlbumArtist => {
                // Only a fallback: the track artist is more specific.
                if tags.artist.is_none() {
                    set_text(&mut tags.artist, value);
                }
            }
            StandardTagKey::Album => set_text(&mut tags.album, value),
            StandardTagKey::Genre => set_text(&mut tags.genre, value),
            StandardTagKey::Date | StandardTagKey::ReleaseDate | StandardTagKey::OriginalDate => {
                if tags.year.is_none() {
                    tags.year = year(value);
                }
            }
            StandardTagKey::TrackNumber => {
                if !found.nr {
                    if let Some(nr) = ordinal(value) {
                        tags.nr = nr;
                        found.nr = true;
                    }
                }
            }
            StandardTagKey::DiscNumber => {
                if !found.disc {
                    if let Some(disc) = ordinal(value) {
                        tags.disc = disc;
                        found.disc = true;
                    }
                }
            }
            _ => {}
        }
    }
}

fn set_text(field: &mut Option<String>, value: &str) {
    if field.is_none() {
        *field = Some(value.to_owned());
    }
}

/// Parses positions like `3` or `3/12`.
fn ordinal(value: &str) -> Option<u32> {
    let position = value.split('/').next()?.trim();
    position.parse().ok().filter(|n| *n > 0)
}

/// Takes the year from dates like `1999`, `1999-04-01` or `1999-04-01T12:00`.
fn year(value: &str) -> Option<u32> {
    let digits = value.get(..4)?;
    if digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}
