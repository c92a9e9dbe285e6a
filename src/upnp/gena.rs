/// GENA client: SUBSCRIBE / renew / UNSUBSCRIBE over HTTP.
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::Method;
use tracing::debug;

use super::device::ServiceDescriptor;
use super::error::SubscriptionError;
use super::subscription::{EventSource, Lease};

/// Lease length we ask the device for
pub const REQUESTED_TIMEOUT: Duration = Duration::from_secs(1800);

/// Lease assumed when the device sends no usable TIMEOUT header
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct GenaClient {
    http: reqwest::Client,
    requested_timeout: Duration,
}

impl GenaClient {
    pub fn new() -> Result<Self, SubscriptionError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            requested_timeout: REQUESTED_TIMEOUT,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn timeout_header(&self) -> String {
        format!("Second-{}", self.requested_timeout.as_secs())
    }

    fn lease_from(&self, sid: String, headers: &HeaderMap) -> Lease {
        let timeout = headers
            .get("TIMEOUT")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_timeout)
            .unwrap_or(FALLBACK_TIMEOUT);
        Lease {
            sid,
            timeout,
            granted_at: Instant::now(),
        }
    }
}

fn gena_method(name: &'static str) -> Result<Method, SubscriptionError> {
    Method::from_bytes(name.as_bytes()).map_err(|e| SubscriptionError::InvalidUrl {
        url: name.to_string(),
        reason: e.to_string(),
    })
}

fn check_status(
    method: &'static str,
    url: &str,
    response: &reqwest::Response,
) -> Result<(), SubscriptionError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(SubscriptionError::Rejected {
            method,
            url: url.to_string(),
            status: response.status().as_u16(),
        })
    }
}

impl EventSource for GenaClient {
    async fn subscribe(
        &self,
        service: &ServiceDescriptor,
        callback_url: &str,
    ) -> Result<Lease, SubscriptionError> {
        let url = service.event_sub_url.as_str();
        let response = self
            .http
            .request(gena_method("SUBSCRIBE")?, url)
            .header("CALLBACK", format!("<{}>", callback_url))
            .header("NT", "upnp:event")
            .header("TIMEOUT", self.timeout_header())
            .send()
            .await?;
        check_status("SUBSCRIBE", url, &response)?;

        let sid = response
            .headers()
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SubscriptionError::MissingSid(url.to_string()))?;

        let lease = self.lease_from(sid, response.headers());
        debug!(
            service = service.service_id.as_str(),
            sid = lease.sid.as_str(),
            "Subscribed (lease {}s)",
            lease.timeout.as_secs()
        );
        Ok(lease)
    }

    async fn renew(
        &self,
        service: &ServiceDescriptor,
        lease: &Lease,
    ) -> Result<Lease, SubscriptionError> {
        let url = service.event_sub_url.as_str();
        let response = self
            .http
            .request(gena_method("SUBSCRIBE")?, url)
            .header("SID", lease.sid.as_str())
            .header("TIMEOUT", self.timeout_header())
            .send()
            .await?;
        check_status("SUBSCRIBE", url, &response)?;

        // Devices may hand out a new SID on renewal
        let sid = response
            .headers()
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| lease.sid.clone());
        Ok(self.lease_from(sid, response.headers()))
    }

    async fn unsubscribe(
        &self,
        service: &ServiceDescriptor,
        lease: &Lease,
    ) -> Result<(), SubscriptionError> {
        let url = service.event_sub_url.as_str();
        let response = self
            .http
            .request(gena_method("UNSUBSCRIBE")?, url)
            .header("SID", lease.sid.as_str())
            .send()
            .await?;
        check_status("UNSUBSCRIBE", url, &response)
    }
}

/// Parse a GENA `TIMEOUT` header (`Second-1800`, `Second-infinite`)
pub fn parse_timeout(value: &str) -> Option<Duration> {
    let lower = value.trim().to_ascii_lowercase();
    let seconds = lower.strip_prefix("second-")?;
    if seconds == "infinite" {
        return Some(REQUESTED_TIMEOUT);
    }
    seconds.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> ServiceDescriptor {
        ServiceDescriptor {
            service_type: "urn:schemas-upnp-org:service:AVTransport:1".into(),
            service_id: "urn:upnp-org:serviceId:AVTransport".into(),
            event_sub_url: format!("{}/upnp/event/rendertransport1", server.uri()),
        }
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("Second-1800"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_timeout(" second-300 "), Some(Duration::from_secs(300)));
        assert_eq!(parse_timeout("Second-infinite"), Some(REQUESTED_TIMEOUT));
        assert_eq!(parse_timeout("1800"), None);
        assert_eq!(parse_timeout("Second-soon"), None);
    }

    #[tokio::test]
    async fn test_subscribe_sends_gena_headers() {
        let server = MockServer::start().await;
        Mock::given(method("SUBSCRIBE"))
            .and(path("/upnp/event/rendertransport1"))
            .and(header("NT", "upnp:event"))
            .and(header("CALLBACK", "<http://10.0.0.5:4000/notify/0>"))
            .and(header("TIMEOUT", "Second-1800"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("SID", "uuid:1234")
                    .insert_header("TIMEOUT", "Second-600"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GenaClient::new().unwrap();
        let lease = client
            .subscribe(&service(&server), "http://10.0.0.5:4000/notify/0")
            .await
            .unwrap();
        assert_eq!(lease.sid, "uuid:1234");
        assert_eq!(lease.timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_subscribe_without_sid_fails() {
        let server = MockServer::start().await;
        Mock::given(method("SUBSCRIBE"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = GenaClient::new().unwrap();
        let err = client
            .subscribe(&service(&server), "http://10.0.0.5:4000/notify/0")
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::MissingSid(_)));
    }

    #[tokio::test]
    async fn test_renew_rejected_with_412() {
        let server = MockServer::start().await;
        Mock::given(method("SUBSCRIBE"))
            .and(header("SID", "uuid:gone"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let client = GenaClient::new().unwrap();
        let lease = Lease {
            sid: "uuid:gone".into(),
            timeout: Duration::from_secs(1800),
            granted_at: Instant::now(),
        };
        let err = client.renew(&service(&server), &lease).await.unwrap_err();
        assert!(err.is_precondition_failed(), "{err}");
    }

    #[tokio::test]
    async fn test_unsubscribe_sends_sid() {
        let server = MockServer::start().await;
        Mock::given(method("UNSUBSCRIBE"))
            .and(header("SID", "uuid:1234"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = GenaClient::new().unwrap();
        let lease = Lease {
            sid: "uuid:1234".into(),
            timeout: Duration::from_secs(1800),
            granted_at: Instant::now(),
        };
        client.unsubscribe(&service(&server), &lease).await.unwrap();
    }
}
