// Attribute-list parsing for HLS tags and the typed views built on top of it.

use media_types::Resolution;
use tracing::trace;

/// Split an attribute list (`KEY=VALUE,KEY="quoted,value"`) into raw key/value pairs.
///
/// Quoted values keep their inner commas and have the surrounding quotes removed.
/// Entries without `=` are dropped.
pub fn parse_attribute_list(input: &str) -> Vec<(&str, &str)> {
    let mut attrs = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().trim_start_matches(',').trim();
        let after = &rest[eq + 1..];

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(close) => {
                    let tail = &quoted[close + 1..];
                    let tail = tail.find(',').map_or("", |c| &tail[c + 1..]);
                    (&quoted[..close], tail)
                }
                // Unterminated quote: take the rest verbatim.
                None => (after, ""),
            }
        } else {
            match after.find(',') {
                Some(c) => (&after[..c], &after[c + 1..]),
                None => (after, ""),
            }
        };

        if !key.is_empty() {
            attrs.push((key, value.trim()));
        }
        rest = remainder;
    }

    attrs
}

/// Attributes of an `#EXT-X-STREAM-INF` tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantAttributes {
    pub bandwidth: Option<u64>,
    pub average_bandwidth: Option<u64>,
    pub resolution: Option<Resolution>,
    pub audio: Option<String>,
    pub codecs: Vec<String>,
}

impl VariantAttributes {
    pub fn parse(input: &str) -> Self {
        let mut attrs = Self::default();
        for (key, value) in parse_attribute_list(input) {
            match key {
                "BANDWIDTH" => attrs.bandwidth = value.parse().ok(),
                "AVERAGE-BANDWIDTH" => attrs.average_bandwidth = value.parse().ok(),
                "RESOLUTION" => attrs.resolution = value.parse().ok(),
                "AUDIO" => attrs.audio = Some(value.to_string()),
                "CODECS" => {
                    attrs.codecs = value
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(String::from)
                        .collect();
                }
                other => trace!(key = other, "Ignoring variant attribute"),
            }
        }
        attrs
    }
}

/// `TYPE` of an `#EXT-X-MEDIA` rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenditionType {
    Audio,
    Video,
    Subtitles,
    ClosedCaptions,
    Other(String),
}

impl RenditionType {
    fn parse(value: &str) -> Self {
        match value {
            "AUDIO" => Self::Audio,
            "VIDEO" => Self::Video,
            "SUBTITLES" => Self::Subtitles,
            "CLOSED-CAPTIONS" => Self::ClosedCaptions,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Attributes of an `#EXT-X-MEDIA` tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenditionAttributes {
    pub media_type: Option<RenditionType>,
    pub group_id: Option<String>,
    pub uri: Option<String>,
    pub name: Option<String>,
    pub language: Option<String>,
    pub is_default: bool,
}

impl RenditionAttributes {
    pub fn parse(input: &str) -> Self {
        let mut attrs = Self::default();
        for (key, value) in parse_attribute_list(input) {
            match key {
                "TYPE" => attrs.media_type = Some(RenditionType::parse(value)),
                "GROUP-ID" => attrs.group_id = Some(value.to_string()),
                "URI" => attrs.uri = Some(value.to_string()),
                "NAME" => attrs.name = Some(value.to_string()),
                "LANGUAGE" => attrs.language = Some(value.to_string()),
                "DEFAULT" => attrs.is_default = value.eq_ignore_ascii_case("YES"),
                other => trace!(key = other, "Ignoring rendition attribute"),
            }
        }
        attrs
    }

    /// Whether this rendition belongs in an audio group. Untyped renditions are treated as audio.
    pub fn is_audio(&self) -> bool {
        matches!(self.media_type, None | Some(RenditionType::Audio))
    }
}

/// Attributes of an `#EXT-X-MAP` tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapAttributes {
    pub uri: Option<String>,
}

impl MapAttributes {
    pub fn parse(input: &str) -> Self {
        let mut attrs = Self::default();
        for (key, value) in parse_attribute_list(input) {
            match key {
                "URI" => attrs.uri = Some(value.to_string()),
                other => trace!(key = other, "Ignoring map attribute"),
            }
        }
        attrs
    }
}
