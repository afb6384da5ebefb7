// HLS playlist parser: line-oriented scan of master and media playlists.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::attributes::{MapAttributes, RenditionAttributes, VariantAttributes};
use crate::error::HlsError;
use crate::model::{
    AudioRendition, MapSegment, MasterPlaylist, MediaKind, MediaPlaylist, RenditionGroup, Segment,
    VariantLevel, resolve_url,
};

const MEDIA_TAG: &str = "#EXT-X-MEDIA:";
const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF:";
const MAP_TAG: &str = "#EXT-X-MAP:";
const EXTINF_TAG: &str = "#EXTINF:";

/// A variant read from the master playlist before ranking.
#[derive(Debug)]
struct UnrankedVariant {
    attributes: VariantAttributes,
    url: Option<String>,
}

fn is_uri_line(line: &str) -> bool {
    !line.is_empty() && !line.starts_with('#')
}

/// Order two variants by average bitrate when both advertise one, by peak bitrate otherwise.
fn compare_bitrate(a: &VariantAttributes, b: &VariantAttributes) -> Ordering {
    match (a.average_bandwidth, b.average_bandwidth) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.bandwidth.unwrap_or(0).cmp(&b.bandwidth.unwrap_or(0)),
    }
}

/// Stable insertion sort with [`compare_bitrate`].
///
/// The comparator is not a total order when only some variants carry `AVERAGE-BANDWIDTH`,
/// which `slice::sort_by` may reject; insertion sort accepts it.
fn sort_variants(variants: &mut [UnrankedVariant]) {
    for i in 1..variants.len() {
        let mut j = i;
        while j > 0 && compare_bitrate(&variants[j - 1].attributes, &variants[j].attributes).is_gt()
        {
            variants.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// Parse a master playlist fetched from `url`.
///
/// Variant levels come back sorted ascending by bitrate with rank indices assigned;
/// audio renditions are bucketed by `GROUP-ID`.
pub fn parse_master_playlist(url: &str, text: &str) -> Result<MasterPlaylist, HlsError> {
    let mut unranked: Vec<UnrankedVariant> = Vec::new();
    let mut audio_groups: HashMap<String, RenditionGroup> = HashMap::new();
    let mut awaiting_uri = false;

    for line in text.lines().map(str::trim) {
        if awaiting_uri {
            if is_uri_line(line) {
                if let Some(variant) = unranked.last_mut() {
                    variant.url = Some(resolve_url(url, line));
                }
                awaiting_uri = false;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(MEDIA_TAG) {
            let attrs = RenditionAttributes::parse(rest);
            if !attrs.is_audio() {
                debug!(media_type = ?attrs.media_type, "Skipping non-audio rendition");
                continue;
            }
            let (Some(group_id), Some(uri)) = (attrs.group_id.clone(), attrs.uri.as_deref()) else {
                warn!(line, "Skipping audio rendition without GROUP-ID or URI");
                continue;
            };

            let id = format!("{}-{}", attrs.language.as_deref().unwrap_or("en"), group_id);
            let rendition = Arc::new(AudioRendition {
                playlist: MediaPlaylist::new(id.as_str(), resolve_url(url, uri), MediaKind::Audio),
                group_id: group_id.clone(),
                id,
                name: attrs.name,
                language: attrs.language,
                is_default: attrs.is_default,
            });

            audio_groups
                .entry(group_id)
                .or_insert_with_key(|key| RenditionGroup::new(MediaKind::Audio, key.as_str()))
                .add_rendition(rendition);
        } else if let Some(rest) = line.strip_prefix(STREAM_INF_TAG) {
            unranked.push(UnrankedVariant {
                attributes: VariantAttributes::parse(rest),
                url: None,
            });
            awaiting_uri = true;
        }
    }

    sort_variants(&mut unranked);

    let variants: Vec<Arc<VariantLevel>> = unranked
        .into_iter()
        .filter_map(|variant| {
            if variant.url.is_none() {
                warn!(attributes = ?variant.attributes, "Dropping variant without a playlist URL");
            }
            variant.url.map(|u| (variant.attributes, u))
        })
        .enumerate()
        .map(|(index, (attrs, variant_url))| {
            let id = match &attrs.resolution {
                Some(res) => format!("[{index}]{res}"),
                None => format!("[{index}]"),
            };
            Arc::new(VariantLevel {
                playlist: MediaPlaylist::new(id.as_str(), variant_url, MediaKind::Video),
                index,
                id,
                peak_bitrate: attrs.bandwidth,
                average_bitrate: attrs.average_bandwidth,
                resolution: attrs.resolution,
                audio_group_id: attrs.audio,
                codecs: attrs.codecs,
            })
        })
        .collect();

    if variants.is_empty() {
        return Err(HlsError::NoVariants {
            url: url.to_string(),
        });
    }

    debug!(
        url,
        variants = variants.len(),
        audio_groups = audio_groups.len(),
        "Parsed master playlist"
    );

    Ok(MasterPlaylist {
        url: url.to_string(),
        variants,
        audio_groups,
    })
}

/// Parse a media playlist body into `playlist`.
///
/// Returns `true` if the playlist was populated by this call, `false` if it had
/// already been loaded (the text is not parsed again).
pub fn parse_media_playlist(playlist: &MediaPlaylist, text: &str) -> bool {
    if playlist.is_loaded() {
        return false;
    }

    let mut map: Option<Arc<MapSegment>> = None;
    let mut segments: Vec<Arc<Segment>> = Vec::new();
    let mut total_duration = 0.0_f64;
    let mut pending_length: Option<f64> = None;
    let mut skip_next_uri = false;

    for line in text.lines().map(str::trim) {
        if pending_length.is_some() || skip_next_uri {
            if !is_uri_line(line) {
                continue;
            }
            if let Some(length) = pending_length.take() {
                segments.push(Arc::new(Segment::new(
                    playlist.kind,
                    playlist.id.clone(),
                    total_duration,
                    length,
                    resolve_url(&playlist.url, line),
                )));
                total_duration += length;
            }
            skip_next_uri = false;
            continue;
        }

        if let Some(rest) = line.strip_prefix(MAP_TAG) {
            match MapAttributes::parse(rest).uri {
                Some(uri) => map = Some(Arc::new(MapSegment::new(resolve_url(&playlist.url, &uri)))),
                None => warn!(playlist = %playlist.id, "EXT-X-MAP without URI ignored"),
            }
        } else if let Some(rest) = line.strip_prefix(EXTINF_TAG) {
            let raw = rest.split(',').next().unwrap_or_default().trim();
            match raw.parse::<f64>() {
                Ok(length) if length.is_finite() && length >= 0.0 => pending_length = Some(length),
                _ => {
                    warn!(playlist = %playlist.id, duration = raw, "Skipping segment with invalid duration");
                    skip_next_uri = true;
                }
            }
        }
    }

    let populated = playlist.add_segments(map, segments, total_duration);
    if populated {
        debug!(
            kind = %playlist.kind,
            id = %playlist.id,
            url = %playlist.url,
            segments = playlist.segments().len(),
            duration = total_duration,
            "Parsed media playlist"
        );
    }
    populated
}
