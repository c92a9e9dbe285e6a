/// Device description: the services a renderer exposes and where to
/// subscribe to their events.
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use super::error::SubscriptionError;

/// Service name that selects every service of the device
pub const ALL_SERVICES: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_type: String,
    pub service_id: String,
    /// Absolute event subscription URL
    pub event_sub_url: String,
}

impl ServiceDescriptor {
    /// Last `:`-separated segment of the service id, e.g. `AVTransport`
    pub fn short_name(&self) -> &str {
        self.service_id.rsplit(':').next().unwrap_or(&self.service_id)
    }

    /// Uppercase letters of the short name, e.g. `AVT` for `AVTransport`
    pub fn abbreviation(&self) -> String {
        self.short_name().chars().filter(|c| c.is_uppercase()).collect()
    }

    /// Match by full service type, short name, or abbreviation
    pub fn matches(&self, name: &str) -> bool {
        name == self.service_type || name == self.short_name() || name == self.abbreviation()
    }
}

#[derive(Debug, Clone)]
pub struct DeviceDescription {
    pub friendly_name: String,
    pub services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RootXml {
    #[serde(rename = "URLBase")]
    url_base: Option<String>,
    device: DeviceXml,
}

#[derive(Debug, Deserialize)]
struct DeviceXml {
    #[serde(rename = "friendlyName", default)]
    friendly_name: String,
    #[serde(rename = "serviceList")]
    service_list: Option<ServiceListXml>,
    #[serde(rename = "deviceList")]
    device_list: Option<DeviceListXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceListXml {
    #[serde(rename = "service", default)]
    services: Vec<ServiceXml>,
}

#[derive(Debug, Deserialize)]
struct DeviceListXml {
    #[serde(rename = "device", default)]
    devices: Vec<DeviceXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceXml {
    #[serde(rename = "serviceType")]
    service_type: String,
    #[serde(rename = "serviceId")]
    service_id: String,
    #[serde(rename = "eventSubURL", default)]
    event_sub_url: String,
}

impl DeviceDescription {
    /// Download and parse the description document
    pub async fn fetch(
        http: &reqwest::Client,
        description_url: &str,
    ) -> Result<Self, SubscriptionError> {
        debug!("Fetching device description from {}", description_url);
        let response = http.get(description_url).send().await?;
        if !response.status().is_success() {
            return Err(SubscriptionError::Rejected {
                method: "GET",
                url: description_url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let xml = response.text().await?;
        let description = Self::parse(description_url, &xml)?;
        info!(
            "Device '{}' exposes {} service(s)",
            description.friendly_name,
            description.services.len()
        );
        Ok(description)
    }

    /// Parse a description document. Relative event URLs are resolved
    /// against `URLBase` when present, otherwise against the description URL.
    pub fn parse(description_url: &str, xml: &str) -> Result<Self, SubscriptionError> {
        let root: RootXml = quick_xml::de::from_str(xml)?;

        let base_str = root
            .url_base
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(description_url);
        let base = Url::parse(base_str).map_err(|e| SubscriptionError::InvalidUrl {
            url: base_str.to_string(),
            reason: e.to_string(),
        })?;

        let mut services = Vec::new();
        collect_services(&root.device, &base, &mut services)?;

        Ok(Self {
            friendly_name: root.device.friendly_name.trim().to_string(),
            services,
        })
    }

    pub fn find_service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.matches(name))
    }

    /// Resolve every requested name, `*` meaning all services.
    /// Fails on the first name that matches nothing.
    pub fn resolve_services(
        &self,
        names: &[String],
    ) -> Result<Vec<ServiceDescriptor>, SubscriptionError> {
        if names.iter().any(|n| n == ALL_SERVICES) {
            return Ok(self.services.clone());
        }

        let mut resolved: Vec<ServiceDescriptor> = Vec::new();
        for name in names {
            let service = self
                .find_service(name)
                .ok_or_else(|| SubscriptionError::UnknownService(name.clone()))?;
            if !resolved.contains(service) {
                resolved.push(service.clone());
            }
        }
        Ok(resolved)
    }
}

fn collect_services(
    device: &DeviceXml,
    base: &Url,
    out: &mut Vec<ServiceDescriptor>,
) -> Result<(), SubscriptionError> {
    if let Some(list) = &device.service_list {
        for service in &list.services {
            let raw = service.event_sub_url.trim();
            let event_sub_url = base.join(raw).map_err(|e| SubscriptionError::InvalidUrl {
                url: raw.to_string(),
                reason: e.to_string(),
            })?;
            out.push(ServiceDescriptor {
                service_type: service.service_type.trim().to_string(),
                service_id: service.service_id.trim().to_string(),
                event_sub_url: event_sub_url.to_string(),
            });
        }
    }
    if let Some(list) = &device.device_list {
        for child in &list.devices {
            collect_services(child, base, out)?;
        }
    }
    Ok(())
}
