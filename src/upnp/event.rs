/// GENA event payloads: the NOTIFY property set and the DLNA `LastChange`
/// aggregate, both flattened into per-variable notifications.
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

/// One state-variable update from a subscribed service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub service_id: String,
    pub variable_name: String,
    pub raw_payload: String,
}

impl Notification {
    pub fn new(service_id: &str, variable_name: &str, raw_payload: impl Into<String>) -> Self {
        Self {
            service_id: service_id.to_string(),
            variable_name: variable_name.to_string(),
            raw_payload: raw_payload.into(),
        }
    }
}

pub const LAST_CHANGE: &str = "LastChange";

/// Parse a NOTIFY body (`<e:propertyset>`) into notifications.
/// `LastChange` properties are expanded into the variables they carry.
pub fn parse_property_set(
    service_id: &str,
    body: &str,
) -> Result<Vec<Notification>, quick_xml::Error> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut notifications = Vec::new();
    let mut in_property = false;
    // variable currently open directly under <e:property>, with its text so far
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "property" {
                    in_property = true;
                } else if in_property && current.is_none() {
                    current = Some((name, String::new()));
                }
            }
            Event::Empty(e) => {
                if in_property && current.is_none() {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    notifications.push(Notification::new(service_id, &name, ""));
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = current.as_mut() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some((_, text)) = current.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "property" {
                    in_property = false;
                } else if current.as_ref().is_some_and(|(open, _)| *open == name) {
                    if let Some((variable, value)) = current.take() {
                        if variable == LAST_CHANGE {
                            notifications.extend(expand_last_change(service_id, &value));
                        } else {
                            notifications.push(Notification::new(service_id, &variable, value));
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(notifications)
}

/// Expand a `LastChange` payload into one notification per variable:
/// `<Event><InstanceID val="0"><TransportState val="PLAYING"/>...</InstanceID></Event>`.
/// A malformed payload yields whatever was decoded before the error.
pub fn expand_last_change(service_id: &str, payload: &str) -> Vec<Notification> {
    let mut reader = Reader::from_str(payload);
    reader.config_mut().trim_text(true);

    let mut notifications = Vec::new();
    let mut depth = 0usize;
    let mut instance_depth: Option<usize> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    service = service_id,
                    error = %e,
                    "Malformed LastChange payload, keeping {} decoded variable(s)",
                    notifications.len()
                );
                break;
            }
        };

        match event {
            Event::Start(e) => {
                depth += 1;
                if e.local_name().as_ref() == b"InstanceID" {
                    instance_depth = Some(depth);
                } else if instance_depth == Some(depth - 1) {
                    push_val(service_id, &e, &mut notifications);
                }
            }
            Event::Empty(e) => {
                if instance_depth == Some(depth) {
                    push_val(service_id, &e, &mut notifications);
                }
            }
            Event::End(_) => {
                if instance_depth == Some(depth) {
                    instance_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    notifications
}

fn push_val(
    service_id: &str,
    element: &quick_xml::events::BytesStart<'_>,
    out: &mut Vec<Notification>,
) {
    let variable = String::from_utf8_lossy(element.local_name().as_ref()).to_string();
    for attr in element.attributes().flatten() {
        if attr.key.local_name().as_ref() != b"val" {
            continue;
        }
        match attr.unescape_value() {
            Ok(value) => out.push(Notification::new(service_id, &variable, value)),
            Err(e) => warn!(
                service = service_id,
                variable = variable.as_str(),
                error = %e,
                "Skipping LastChange variable with undecodable value"
            ),
        }
        return;
    }
}
