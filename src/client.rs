//! Root API client.

use std::sync::Arc;

use crate::error::Result;
use crate::measure::MeasureService;
use crate::net::{HttpClient, HttpExecutor};
use crate::oauth::{HIPAA_API_BASE, PUBLIC_API_BASE};
use crate::transport::Transport;

/// Withings API client.
///
/// One [`Transport`] is shared by every resource service. Clones share it
/// too. Authorization is a property of the executor: build clients through
/// [`OAuthConfig::client`](crate::oauth::OAuthConfig::client) to attach and
/// refresh tokens automatically.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<Transport>,
    measure: MeasureService,
}

impl Client {
    /// Client for the API rooted at `base_url` (must end in `/`).
    pub fn new(executor: Arc<dyn HttpExecutor>, base_url: &str) -> Result<Self> {
        Ok(Self::from_transport(Transport::new(executor, base_url)?))
    }

    /// Public cloud client using `executor`.
    pub fn public(executor: Arc<dyn HttpExecutor>) -> Result<Self> {
        Self::new(executor, PUBLIC_API_BASE)
    }

    /// HIPAA cloud client using `executor`.
    pub fn hipaa(executor: Arc<dyn HttpExecutor>) -> Result<Self> {
        Self::new(executor, HIPAA_API_BASE)
    }

    /// Unauthenticated client with a default HTTP executor.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Self::new(Arc::new(HttpClient::new()), base_url)
    }

    pub fn from_transport(transport: Transport) -> Self {
        let transport = Arc::new(transport);
        Self {
            measure: MeasureService::new(Arc::clone(&transport)),
            transport,
        }
    }

    /// The shared transport, for calls without a typed service.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Measure endpoints.
    pub fn measure(&self) -> &MeasureService {
        &self.measure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_services_share_transport() {
        let client = Client::with_base_url("https://example.test/").unwrap();
        let clone = client.clone();
        assert!(Arc::ptr_eq(client.transport(), clone.transport()));
        assert_eq!(Arc::strong_count(client.transport()), 4);
    }

    #[test]
    fn test_region_bases() {
        let client = Client::public(Arc::new(HttpClient::new())).unwrap();
        assert_eq!(client.transport().base_url().as_str(), PUBLIC_API_BASE);

        let client = Client::hipaa(Arc::new(HttpClient::new())).unwrap();
        assert_eq!(client.transport().base_url().as_str(), HIPAA_API_BASE);
    }

    #[test]
    fn test_invalid_base_rejected() {
        assert!(Client::with_base_url("https://example.test/api").is_err());
        assert!(Client::with_base_url("https://example.test").is_err());
    }
}
