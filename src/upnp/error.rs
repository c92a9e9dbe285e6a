/// Errors raised while talking to the renderer's UPnP services

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// A configured service name matches nothing in the device description
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// HTTP transport failed (connect, timeout, body)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The device answered with a non-success status
    #[error("{method} {url} returned HTTP {status}")]
    Rejected {
        method: &'static str,
        url: String,
        status: u16,
    },

    /// SUBSCRIBE succeeded but no SID came back
    #[error("SUBSCRIBE to {0} returned no SID")]
    MissingSid(String),

    #[error("Malformed device description: {0}")]
    Description(#[from] quick_xml::DeError),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl SubscriptionError {
    /// The device no longer knows our SID (GENA 412 Precondition Failed)
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, SubscriptionError::Rejected { status: 412, .. })
    }
}
