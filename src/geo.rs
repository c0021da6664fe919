//! IP → location resolution.
//!
//! A sorted, non-overlapping table of IPv4 ranges is searched first. On a miss
//! the configured external providers are asked in order, and if all of them
//! fail the default range is used when fallback is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("invalid IPv4 address '{0}'")]
    InvalidIp(String),

    #[error("location lookup failed: {0}")]
    Lookup(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Table,
    Provider,
    Default,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub city: String,
    pub state: String,
    pub country: String,
    pub isp: String,
    pub source: LocationSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpRange {
    pub start: u32,
    pub end: u32,
    pub city: &'static str,
    pub state: &'static str,
    pub country: &'static str,
    pub isp: &'static str,
}

impl IpRange {
    fn location(&self, source: LocationSource) -> Location {
        Location {
            city: self.city.to_string(),
            state: self.state.to_string(),
            country: self.country.to_string(),
            isp: self.isp.to_string(),
            source,
        }
    }
}

const fn ip(a: u8, b: u8, c: u8, d: u8) -> u32 {
    ((a as u32) << 24) | ((b as u32) << 16) | ((c as u32) << 8) | d as u32
}

const fn range(
    start: u32,
    end: u32,
    city: &'static str,
    state: &'static str,
    country: &'static str,
    isp: &'static str,
) -> IpRange {
    IpRange {
        start,
        end,
        city,
        state,
        country,
        isp,
    }
}

/// Built-in ranges, sorted by start address.
pub fn default_ranges() -> Vec<IpRange> {
    vec![
        range(ip(8, 8, 4, 0), ip(8, 8, 4, 255), "Mountain View", "California", "United States", "Google LLC"),
        range(ip(8, 8, 8, 0), ip(8, 8, 8, 255), "Mountain View", "California", "United States", "Google LLC"),
        range(ip(14, 139, 0, 0), ip(14, 139, 255, 255), "New Delhi", "Delhi", "India", "National Knowledge Network"),
        range(ip(27, 4, 0, 0), ip(27, 7, 255, 255), "Bengaluru", "Karnataka", "India", "Tata Teleservices"),
        range(ip(49, 32, 0, 0), ip(49, 47, 255, 255), "Mumbai", "Maharashtra", "India", "Reliance Jio"),
        range(ip(59, 88, 0, 0), ip(59, 99, 255, 255), "Chennai", "Tamil Nadu", "India", "BSNL"),
        range(ip(103, 21, 244, 0), ip(103, 21, 247, 255), "Mumbai", "Maharashtra", "India", "Cloudflare"),
        range(ip(106, 192, 0, 0), ip(106, 223, 255, 255), "Gurugram", "Haryana", "India", "Bharti Airtel"),
        range(ip(117, 192, 0, 0), ip(117, 255, 255, 255), "Kolkata", "West Bengal", "India", "BSNL"),
        range(ip(122, 160, 0, 0), ip(122, 187, 255, 255), "Hyderabad", "Telangana", "India", "Bharti Airtel"),
        range(ip(151, 101, 0, 0), ip(151, 101, 255, 255), "San Francisco", "California", "United States", "Fastly"),
        range(ip(182, 64, 0, 0), ip(182, 79, 255, 255), "Pune", "Maharashtra", "India", "Bharti Airtel"),
        range(ip(203, 192, 192, 0), ip(203, 192, 255, 255), "Ahmedabad", "Gujarat", "India", "Sify"),
    ]
}

/// Range used when nothing matched and fallback is enabled.
pub fn default_range() -> IpRange {
    range(ip(103, 21, 244, 0), ip(103, 21, 247, 255), "Mumbai", "Maharashtra", "India", "Unknown")
}

/// Dotted-quad IPv4 string to its 32-bit value.
pub fn ip_to_u32(addr: &str) -> Result<u32, GeoError> {
    addr.trim()
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| GeoError::InvalidIp(addr.to_string()))
}

/// Binary search over ranges sorted by `start`.
pub fn find_range(ranges: &[IpRange], value: u32) -> Option<&IpRange> {
    ranges
        .binary_search_by(|r| {
            if r.end < value {
                Ordering::Less
            } else if r.start > value {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        })
        .ok()
        .map(|i| &ranges[i])
}

/// External lookup consulted when the local table misses.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn lookup(&self, addr: Ipv4Addr) -> Result<Option<Location>, GeoError>;
}

/// ip-api.com style JSON provider (`{status, city, regionName, country, isp}`).
pub struct HttpLocationProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: Option<String>,
    city: Option<String>,
    region_name: Option<String>,
    country: Option<String>,
    isp: Option<String>,
}

impl HttpLocationProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LocationProvider for HttpLocationProvider {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn lookup(&self, addr: Ipv4Addr) -> Result<Option<Location>, GeoError> {
        let body: IpApiResponse = self
            .client
            .get(format!("{}/{}", self.base_url, addr))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if body.status.as_deref().is_some_and(|s| s != "success") {
            return Ok(None);
        }
        Ok(body.city.filter(|c| !c.is_empty()).map(|city| Location {
            city,
            state: body.region_name.unwrap_or_default(),
            country: body.country.unwrap_or_default(),
            isp: body.isp.unwrap_or_default(),
            source: LocationSource::Provider,
        }))
    }
}

pub struct GeoLocator {
    ranges: Vec<IpRange>,
    providers: Vec<Box<dyn LocationProvider>>,
    fallback_to_default: bool,
}

impl GeoLocator {
    /// Built-in table, no providers, default fallback enabled.
    pub fn new() -> Self {
        Self::with_ranges(default_ranges())
    }

    pub fn with_ranges(mut ranges: Vec<IpRange>) -> Self {
        ranges.sort_by_key(|r| r.start);
        Self {
            ranges,
            providers: vec![],
            fallback_to_default: true,
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn LocationProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn fallback_to_default(mut self, enabled: bool) -> Self {
        self.fallback_to_default = enabled;
        self
    }

    /// Table lookup only.
    pub fn lookup_local(&self, addr: &str) -> Result<Option<Location>, GeoError> {
        let value = ip_to_u32(addr)?;
        Ok(find_range(&self.ranges, value).map(|r| r.location(LocationSource::Table)))
    }

    /// Table, then providers in order, then the default range if enabled.
    pub async fn resolve(&self, addr: &str) -> Result<Option<Location>, GeoError> {
        if let Some(location) = self.lookup_local(addr)? {
            debug!(ip = addr, city = %location.city, "resolved from table");
            return Ok(Some(location));
        }

        let parsed: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| GeoError::InvalidIp(addr.to_string()))?;
        for provider in &self.providers {
            match provider.lookup(parsed).await {
                Ok(Some(location)) => {
                    debug!(ip = addr, provider = provider.name(), city = %location.city, "resolved from provider");
                    return Ok(Some(location));
                }
                Ok(None) => {}
                Err(e) => warn!(ip = addr, provider = provider.name(), error = %e, "location provider failed"),
            }
        }

        Ok(self.fallback())
    }

    /// Like `resolve`, but an address that cannot be looked up (IPv6,
    /// malformed) is logged and gets the fallback location.
    pub async fn locate(&self, addr: &str) -> Option<Location> {
        match self.resolve(addr).await {
            Ok(location) => location,
            Err(e) => {
                warn!(ip = addr, error = %e, "location lookup failed");
                self.fallback()
            }
        }
    }

    /// The default location when fallback is enabled.
    pub fn fallback(&self) -> Option<Location> {
        self.fallback_to_default
            .then(|| default_range().location(LocationSource::Default))
    }
}

impl Default for GeoLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(Option<Location>);

    #[async_trait]
    impl LocationProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn lookup(&self, _addr: Ipv4Addr) -> Result<Option<Location>, GeoError> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LocationProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        async fn lookup(&self, _addr: Ipv4Addr) -> Result<Option<Location>, GeoError> {
            Err(GeoError::Lookup("timed out".to_string()))
        }
    }

    #[test]
    fn test_ip_to_u32() {
        assert_eq!(ip_to_u32("8.8.8.8").unwrap(), 0x0808_0808);
        assert_eq!(ip_to_u32(" 1.2.3.4 ").unwrap(), 16_909_060);
        assert!(matches!(ip_to_u32("300.1.1.1"), Err(GeoError::InvalidIp(_))));
        assert!(ip_to_u32("not-an-ip").is_err());
    }

    #[test]
    fn test_default_ranges_sorted_and_disjoint() {
        let ranges = default_ranges();
        for pair in ranges.windows(2) {
            assert!(pair[0].start <= pair[0].end);
            assert!(pair[0].end < pair[1].start);
        }
    }

    #[test]
    fn test_table_lookups() {
        let geo = GeoLocator::new();
        assert_eq!(geo.lookup_local("103.21.244.5").unwrap().unwrap().city, "Mumbai");
        assert_eq!(geo.lookup_local("8.8.8.8").unwrap().unwrap().city, "Mountain View");
        assert_eq!(geo.lookup_local("203.192.200.1").unwrap().unwrap().city, "Ahmedabad");
        assert!(geo.lookup_local("1.2.3.4").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_miss_without_fallback_is_none() {
        let geo = GeoLocator::new().fallback_to_default(false);
        assert!(geo.resolve("1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_miss_with_fallback_uses_default() {
        let geo = GeoLocator::new();
        let location = geo.resolve("1.2.3.4").await.unwrap().unwrap();
        assert_eq!(location.city, "Mumbai");
        assert_eq!(location.source, LocationSource::Default);
    }

    #[tokio::test]
    async fn test_locate_unparseable_address_falls_back() {
        let geo = GeoLocator::new();
        for addr in ["2001:db8::1", "not-an-ip"] {
            let location = geo.locate(addr).await.unwrap();
            assert_eq!(location.source, LocationSource::Default);
            assert_eq!(location.city, "Mumbai");
        }
        assert!(matches!(geo.resolve("2001:db8::1").await, Err(GeoError::InvalidIp(_))));

        let strict = GeoLocator::new().fallback_to_default(false);
        assert!(strict.locate("2001:db8::1").await.is_none());
        assert_eq!(strict.locate("8.8.8.8").await.unwrap().city, "Mountain View");
    }

    #[tokio::test]
    async fn test_providers_consulted_in_order_after_failures() {
        let remote = Location {
            city: "Jaipur".to_string(),
            state: "Rajasthan".to_string(),
            country: "India".to_string(),
            isp: "Test".to_string(),
            source: LocationSource::Provider,
        };
        let geo = GeoLocator::new()
            .fallback_to_default(false)
            .with_provider(Box::new(FailingProvider))
            .with_provider(Box::new(FixedProvider(None)))
            .with_provider(Box::new(FixedProvider(Some(remote.clone()))));

        assert_eq!(geo.resolve("1.2.3.4").await.unwrap(), Some(remote));
        // Table hits never reach the providers
        assert_eq!(geo.resolve("8.8.8.8").await.unwrap().unwrap().source, LocationSource::Table);
    }
}
