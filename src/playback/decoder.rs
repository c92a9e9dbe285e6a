/// Metadata decoder: turns raw state-variable notifications into typed
/// playback updates.
///
/// Track metadata arrives as a DIDL-Lite document embedded in the variable's
/// value. Fields are extracted by local element name, so vendor prefixes
/// (`dc:`, `upnp:`, `song:`) do not matter, and each field is optional.
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::model::{parse_time, ArtReference, PlaybackItem, TransportState};
use crate::upnp::event::Notification;

/// The result of decoding one notification
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// New track metadata; supersedes the current item entirely. Fields that
    /// could not be read are left empty and listed in `skipped`.
    Item {
        item: PlaybackItem,
        skipped: Vec<FieldError>,
    },
    Transport(TransportState),
    /// Track length from `CurrentTrackDuration`
    Duration(Option<Duration>),
    /// Track position from `RelativeTimePosition`
    Position(Duration),
    /// A variable this display does not use, or an empty value
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{variable}: malformed XML: {source}")]
    Xml {
        variable: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("{variable}: DIDL-Lite payload has no <item>")]
    MissingItem { variable: String },

    #[error("{variable}: unparseable time value {value:?}")]
    BadTime { variable: String, value: String },
}

/// A single DIDL-Lite field that was dropped while the rest of the item was kept
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{variable}: skipped <{field}>: {reason}")]
pub struct FieldError {
    pub variable: String,
    pub field: String,
    pub reason: String,
}

const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";

/// Decode a single state-variable update
pub fn decode(notification: &Notification) -> Result<Decoded, DecodeError> {
    let variable = notification.variable_name.as_str();
    let payload = notification.raw_payload.trim();

    match variable {
        "TransportState" => Ok(Decoded::Transport(TransportState::from_token(payload))),
        "CurrentTrackMetaData" | "AVTransportURIMetaData" => {
            if payload.is_empty() || payload == NOT_IMPLEMENTED {
                return Ok(Decoded::Ignored);
            }
            let (item, skipped) = parse_didl_item(variable, payload)?;
            Ok(Decoded::Item { item, skipped })
        }
        "CurrentTrackDuration" => {
            if payload.is_empty() || payload == NOT_IMPLEMENTED {
                return Ok(Decoded::Duration(None));
            }
            parse_time(payload)
                .map(|d| Decoded::Duration(Some(d)))
                .ok_or_else(|| DecodeError::BadTime {
                    variable: variable.to_string(),
                    value: payload.to_string(),
                })
        }
        "RelativeTimePosition" => {
            if payload.is_empty() || payload == NOT_IMPLEMENTED {
                return Ok(Decoded::Ignored);
            }
            parse_time(payload)
                .map(Decoded::Position)
                .ok_or_else(|| DecodeError::BadTime {
                    variable: variable.to_string(),
                    value: payload.to_string(),
                })
        }
        _ => Ok(Decoded::Ignored),
    }
}

/// Extract the first `<item>` of a DIDL-Lite document.
///
/// Only direct children of the item are fields. A field's value is all the
/// text below it, so `<upnp:albumArtURI>` reads the same whether it is a bare
/// string or wraps its URI in attributes or nested markup.
///
/// A field whose text cannot be unescaped is dropped on its own and reported
/// back alongside the item. Only a broken document fails the whole item.
pub fn parse_didl_item(
    variable: &str,
    xml: &str,
) -> Result<(PlaybackItem, Vec<FieldError>), DecodeError> {
    let xml_err = |source| DecodeError::Xml {
        variable: variable.to_string(),
        source,
    };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut item_depth: Option<usize> = None;
    let mut found_item = false;
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut current_field: Option<String> = None;
    let mut res_duration: Option<String> = None;
    let mut failed: HashSet<String> = HashSet::new();
    let mut skipped: Vec<FieldError> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                depth += 1;
                if item_depth.is_none() && !found_item && e.local_name().as_ref() == b"item" {
                    item_depth = Some(depth);
                    found_item = true;
                } else if item_depth == Some(depth - 1) {
                    current_field = open_field(&e, &mut fields, &mut res_duration);
                }
            }
            Event::Empty(e) => {
                if item_depth.is_none() && !found_item && e.local_name().as_ref() == b"item" {
                    found_item = true;
                } else if item_depth == Some(depth) {
                    open_field(&e, &mut fields, &mut res_duration);
                }
            }
            Event::Text(t) => {
                if let Some(field) = current_field.as_ref().filter(|f| !failed.contains(*f)) {
                    match t.unescape() {
                        Ok(text) => fields.entry(field.clone()).or_default().push_str(&text),
                        Err(e) => {
                            skipped.push(FieldError {
                                variable: variable.to_string(),
                                field: field.clone(),
                                reason: e.to_string(),
                            });
                            failed.insert(field.clone());
                        }
                    }
                }
            }
            Event::CData(c) => {
                if let Some(field) = current_field.as_ref().filter(|f| !failed.contains(*f)) {
                    let text = String::from_utf8_lossy(&c.into_inner()).to_string();
                    fields.entry(field.clone()).or_default().push_str(&text);
                }
            }
            Event::End(_) => {
                if item_depth == Some(depth) {
                    // only the first item matters
                    break;
                }
                if depth > 0 && item_depth == Some(depth - 1) {
                    current_field = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !found_item {
        return Err(DecodeError::MissingItem {
            variable: variable.to_string(),
        });
    }

    for field in &failed {
        fields.remove(field);
    }

    let duration = match res_duration.as_deref().map(|v| (v, parse_time(v))) {
        Some((_, Some(d))) => Some(d),
        Some((value, None)) => {
            skipped.push(FieldError {
                variable: variable.to_string(),
                field: "res@duration".to_string(),
                reason: format!("unparseable time value {value:?}"),
            });
            None
        }
        None => None,
    };

    let mut take = |name: &str| {
        fields
            .remove(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let artist = take("artist").or_else(|| take("creator")).unwrap_or_default();
    let item = PlaybackItem {
        title: take("title").unwrap_or_default(),
        artist,
        album: take("album").unwrap_or_default(),
        subtitle: take("subtitle"),
        art_reference: take("albumArtURI").as_deref().and_then(ArtReference::parse),
        duration,
    };
    Ok((item, skipped))
}

/// Start collecting a direct child of `<item>`. Repeated fields keep their
/// first value; returns the field to collect text into, if any.
fn open_field(
    element: &BytesStart<'_>,
    fields: &mut HashMap<String, String>,
    res_duration: &mut Option<String>,
) -> Option<String> {
    let name = String::from_utf8_lossy(element.local_name().as_ref()).to_string();

    if name == "res" {
        if res_duration.is_none() {
            *res_duration = element
                .attributes()
                .flatten()
                .find(|a| a.key.local_name().as_ref() == b"duration")
                .and_then(|a| a.unescape_value().ok())
                .map(|v| v.into_owned());
        }
        return None;
    }

    if fields.contains_key(&name) {
        return None;
    }
    fields.insert(name.clone(), String::new());
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = "urn:upnp-org:serviceId:AVTransport";

    fn note(variable: &str, payload: &str) -> Notification {
        Notification::new(SERVICE, variable, payload)
    }

    const DIDL: &str = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:song="www.wiimu.com/song/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">
      <upnp:class>object.item.audioItem.musicTrack</upnp:class>
      <item id="0">
        <song:bitrate>320</song:bitrate>
        <dc:title>So What</dc:title>
        <upnp:artist>Miles Davis</upnp:artist>
        <upnp:album>Kind of Blue</upnp:album>
        <upnp:albumArtURI>https://img.example/kob.jpg?w=600&amp;h=600</upnp:albumArtURI>
        <res protocolInfo="http-get:*:audio/flac:*" duration="0:09:22.000">http://stream</res>
      </item>
    </DIDL-Lite>"#;

    #[test]
    fn test_decode_track_metadata() {
        let decoded = decode(&note("CurrentTrackMetaData", DIDL)).unwrap();
        let Decoded::Item { item, skipped } = decoded else {
            panic!("expected item, got {decoded:?}");
        };
        assert!(skipped.is_empty());
        assert_eq!(item.title, "So What");
        assert_eq!(item.artist, "Miles Davis");
        assert_eq!(item.album, "Kind of Blue");
        assert_eq!(item.subtitle, None);
        assert_eq!(
            item.art_reference,
            Some(ArtReference::Uri("https://img.example/kob.jpg?w=600&h=600".into()))
        );
        assert_eq!(item.duration, Some(Duration::from_secs(562)));
    }

    #[test]
    fn test_album_art_with_attributes_and_nested_text() {
        let xml = r#"<DIDL-Lite><item>
            <dc:title>T</dc:title>
            <upnp:albumArtURI dlna:profileID="JPEG_TN">http://host/art.jpg</upnp:albumArtURI>
        </item></DIDL-Lite>"#;
        let (item, _) = parse_didl_item("CurrentTrackMetaData", xml).unwrap();
        assert_eq!(item.art_reference.unwrap().as_str(), "http://host/art.jpg");

        let nested = r#"<DIDL-Lite><item>
            <upnp:albumArtURI><uri>http://host/nested.jpg</uri></upnp:albumArtURI>
        </item></DIDL-Lite>"#;
        let (item, _) = parse_didl_item("CurrentTrackMetaData", nested).unwrap();
        assert_eq!(item.art_reference.unwrap().as_str(), "http://host/nested.jpg");
    }

    #[test]
    fn test_missing_album_and_subtitle_are_empty() {
        let xml = r#"<DIDL-Lite><item><dc:title>Intro</dc:title></item></DIDL-Lite>"#;
        let (item, _) = parse_didl_item("CurrentTrackMetaData", xml).unwrap();
        assert_eq!(item.album, "");
        assert_eq!(item.subtitle, None);
        assert_eq!(item.display_album(), "");
        assert_eq!(item.art_reference, None);
    }

    #[test]
    fn test_subtitle_and_creator_fallbacks() {
        let xml = r#"<DIDL-Lite><item>
            <dc:title>News</dc:title>
            <dc:creator>Radio Paradise</dc:creator>
            <upnp:album></upnp:album>
            <dc:subtitle>Main Mix</dc:subtitle>
        </item></DIDL-Lite>"#;
        let (item, _) = parse_didl_item("AVTransportURIMetaData", xml).unwrap();
        assert_eq!(item.artist, "Radio Paradise");
        assert_eq!(item.display_album(), "Main Mix");
    }

    #[test]
    fn test_repeated_field_keeps_first() {
        let xml = r#"<DIDL-Lite><item>
            <upnp:artist>First</upnp:artist><upnp:artist>Second</upnp:artist>
        </item></DIDL-Lite>"#;
        let (item, _) = parse_didl_item("CurrentTrackMetaData", xml).unwrap();
        assert_eq!(item.artist, "First");
    }

    #[test]
    fn test_bad_field_is_skipped_and_rest_of_item_kept() {
        let xml = r#"<DIDL-Lite><item>
            <dc:title>Caf&eacute; Society</dc:title>
            <upnp:artist>Ella &amp; Louis</upnp:artist>
            <upnp:album>Porgy</upnp:album>
            <upnp:albumArtURI>http://host/art.jpg</upnp:albumArtURI>
            <res duration="later">http://stream</res>
        </item></DIDL-Lite>"#;
        let decoded = decode(&note("CurrentTrackMetaData", xml)).unwrap();
        let Decoded::Item { item, skipped } = decoded else {
            panic!("expected item, got {decoded:?}");
        };

        assert_eq!(item.title, "");
        assert_eq!(item.artist, "Ella & Louis");
        assert_eq!(item.album, "Porgy");
        assert_eq!(item.art_reference.unwrap().as_str(), "http://host/art.jpg");
        assert_eq!(item.duration, None);

        let fields: Vec<&str> = skipped.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["title", "res@duration"]);
        assert!(skipped.iter().all(|e| e.variable == "CurrentTrackMetaData"));
    }

    #[test]
    fn test_unknown_transport_tokens_never_fail() {
        for token in ["TRANSITIONING", "NO_MEDIA_PRESENT", "", "💿"] {
            assert_eq!(
                decode(&note("TransportState", token)).unwrap(),
                Decoded::Transport(TransportState::Unknown)
            );
        }
        assert_eq!(
            decode(&note("TransportState", " PLAYING ")).unwrap(),
            Decoded::Transport(TransportState::Playing)
        );
    }

    #[test]
    fn test_malformed_metadata_is_an_error_not_a_panic() {
        let err = decode(&note("CurrentTrackMetaData", "<DIDL-Lite><item><dc:title>x</dc:ti"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Xml { .. }), "{err}");

        let err = decode(&note("CurrentTrackMetaData", "<DIDL-Lite></DIDL-Lite>")).unwrap_err();
        assert!(matches!(err, DecodeError::MissingItem { .. }));
    }

    #[test]
    fn test_not_implemented_and_unrelated_variables_are_ignored() {
        assert_eq!(
            decode(&note("CurrentTrackMetaData", "NOT_IMPLEMENTED")).unwrap(),
            Decoded::Ignored
        );
        assert_eq!(decode(&note("Volume", "42")).unwrap(), Decoded::Ignored);
    }

    #[test]
    fn test_durations() {
        assert_eq!(
            decode(&note("CurrentTrackDuration", "0:03:00")).unwrap(),
            Decoded::Duration(Some(Duration::from_secs(180)))
        );
        assert_eq!(
            decode(&note("RelativeTimePosition", "0:01:05")).unwrap(),
            Decoded::Position(Duration::from_secs(65))
        );
        assert!(matches!(
            decode(&note("CurrentTrackDuration", "soon")),
            Err(DecodeError::BadTime { .. })
        ));
    }
}
