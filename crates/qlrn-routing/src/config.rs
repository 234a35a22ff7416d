//! Protocol configuration
//!
//! [`RoutingConfig`] carries every tunable constant of the protocol. The
//! defaults follow the AODV timing model scaled for small wireless meshes.
//! Attributes can also be set by name through
//! [`RoutingConfig::set_attribute`], which is what the control plane's
//! `Set(name, value)` passthrough calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Routing protocol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Capacity of the pending-packet queue (packets)
    pub max_queue_len: usize,
    /// Longest a packet may wait in the pending queue
    pub max_queue_time: Duration,
    /// How long a (packet id, source) pair is remembered for duplicate detection
    pub duplicate_window: Duration,
    /// Discovery attempts at network diameter before giving up
    pub rreq_retries: u8,
    /// TTL of the first discovery attempt
    pub ttl_start: u16,
    /// TTL growth per expanding-ring retry
    pub ttl_increment: u16,
    /// Above this TTL the search jumps straight to the network diameter
    pub ttl_threshold: u16,
    /// Maximum hop count between any two nodes
    pub net_diameter: u16,
    /// Conservative per-hop traversal estimate
    pub node_traversal_time: Duration,
    /// Extra hops of slack added to discovery timeouts
    pub timeout_buffer: u16,
    /// Lifetime granted to a route on every successful use
    pub active_route_timeout: Duration,
    /// Period between neighbor HELLO broadcasts
    pub hello_interval: Duration,
    /// HELLO intervals that may pass before a neighbor is considered lost
    pub allowed_hello_loss: u16,
    /// Whether periodic HELLO broadcasts are sent
    pub enable_hello: bool,
    /// How long an invalidated route lingers before it is deleted
    pub delete_period: Duration,
    /// Lifetime of a freshly learned one-hop route to a neighbor
    pub neighbor_route_lifetime: Duration,
    /// Blacklist duration for unidirectional links; derived when `None`
    pub blacklist_timeout: Option<Duration>,
    /// Period of the housekeeping sweep over table, queue and caches
    pub purge_interval: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_queue_len: 100,
            max_queue_time: Duration::from_secs(10),
            duplicate_window: Duration::from_secs(20),
            rreq_retries: 2,
            ttl_start: 1,
            ttl_increment: 2,
            ttl_threshold: 7,
            net_diameter: 35,
            node_traversal_time: Duration::from_millis(40),
            timeout_buffer: 2,
            active_route_timeout: Duration::from_secs(3),
            hello_interval: Duration::from_secs(2),
            allowed_hello_loss: 2,
            enable_hello: false,
            delete_period: Duration::from_secs(1),
            neighbor_route_lifetime: Duration::from_secs(5),
            blacklist_timeout: None,
            purge_interval: Duration::from_secs(1),
        }
    }
}

impl RoutingConfig {
    /// Worst-case time for a packet to cross the whole network
    pub fn net_traversal_time(&self) -> Duration {
        self.node_traversal_time * 2 * u32::from(self.net_diameter)
    }

    /// How long a discovery attempt keeps a route IN_SEARCH
    pub fn path_discovery_time(&self) -> Duration {
        self.net_traversal_time() * 2
    }

    /// Effective blacklist duration for unidirectional links
    pub fn blacklist_duration(&self) -> Duration {
        self.blacklist_timeout
            .unwrap_or_else(|| self.net_traversal_time() * u32::from(self.rreq_retries))
    }

    /// Lifetime advertised for a neighbor heard in a HELLO
    pub fn hello_lifetime(&self) -> Duration {
        self.hello_interval * u32::from(self.allowed_hello_loss)
    }

    /// How long to wait for a HELLO_ACK before blacklisting the link
    pub fn next_hop_wait(&self) -> Duration {
        self.node_traversal_time + Duration::from_millis(10)
    }

    /// Set the pending queue capacity
    pub fn with_max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len;
        self
    }

    /// Set the maximum queueing delay
    pub fn with_max_queue_time(mut self, time: Duration) -> Self {
        self.max_queue_time = time;
        self
    }

    /// Set the duplicate detection window
    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    /// Set the discovery retry limit
    pub fn with_rreq_retries(mut self, retries: u8) -> Self {
        self.rreq_retries = retries;
        self
    }

    /// Set the HELLO interval
    pub fn with_hello_interval(mut self, interval: Duration) -> Self {
        self.hello_interval = interval;
        self
    }

    /// Enable or disable periodic HELLO broadcasts
    pub fn with_hello(mut self, enabled: bool) -> Self {
        self.enable_hello = enabled;
        self
    }

    /// Set the active route timeout
    pub fn with_active_route_timeout(mut self, timeout: Duration) -> Self {
        self.active_route_timeout = timeout;
        self
    }

    /// Set the per-hop traversal estimate
    pub fn with_node_traversal_time(mut self, time: Duration) -> Self {
        self.node_traversal_time = time;
        self
    }

    /// Set an attribute by its control-plane name
    ///
    /// Durations accept `ms` and `s` suffixes (`"500ms"`, `"10s"`); a bare
    /// number is read as seconds.
    pub fn set_attribute(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name {
            "MaxQueueLen" => self.max_queue_len = parse_number(name, value)?,
            "MaxQueueTime" => self.max_queue_time = parse_duration(name, value)?,
            "DuplicateWindow" => self.duplicate_window = parse_duration(name, value)?,
            "RreqRetries" => self.rreq_retries = parse_number(name, value)?,
            "TtlStart" => self.ttl_start = parse_number(name, value)?,
            "TtlIncrement" => self.ttl_increment = parse_number(name, value)?,
            "TtlThreshold" => self.ttl_threshold = parse_number(name, value)?,
            "NetDiameter" => self.net_diameter = parse_number(name, value)?,
            "NodeTraversalTime" => self.node_traversal_time = parse_duration(name, value)?,
            "TimeoutBuffer" => self.timeout_buffer = parse_number(name, value)?,
            "ActiveRouteTimeout" => self.active_route_timeout = parse_duration(name, value)?,
            "HelloInterval" => self.hello_interval = parse_duration(name, value)?,
            "AllowedHelloLoss" => self.allowed_hello_loss = parse_number(name, value)?,
            "EnableHello" => self.enable_hello = parse_bool(name, value)?,
            "DeletePeriod" => self.delete_period = parse_duration(name, value)?,
            "NeighborRouteLifetime" => {
                self.neighbor_route_lifetime = parse_duration(name, value)?
            }
            "BlacklistTimeout" => self.blacklist_timeout = Some(parse_duration(name, value)?),
            "PurgeInterval" => self.purge_interval = parse_duration(name, value)?,
            _ => return Err(ConfigError::UnknownAttribute(name.to_string())),
        }
        Ok(())
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(name, value))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    let (digits, scale_ms) = if let Some(ms) = trimmed.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(s) = trimmed.strip_suffix('s') {
        (s, 1000)
    } else {
        (trimmed, 1000)
    };
    let amount: u64 = digits.trim().parse().map_err(|_| invalid(name, value))?;
    amount
        .checked_mul(scale_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| invalid(name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_timings() {
        let config = RoutingConfig::default();
        assert_eq!(config.net_traversal_time(), Duration::from_millis(2800));
        assert_eq!(config.path_discovery_time(), Duration::from_millis(5600));
        assert_eq!(config.blacklist_duration(), Duration::from_millis(5600));
        assert_eq!(config.hello_lifetime(), Duration::from_secs(4));
    }

    #[test]
    fn test_set_attribute() {
        let mut config = RoutingConfig::default();
        config.set_attribute("MaxQueueLen", "64").unwrap();
        config.set_attribute("MaxQueueTime", "30s").unwrap();
        config.set_attribute("NodeTraversalTime", "25ms").unwrap();
        config.set_attribute("EnableHello", "true").unwrap();
        config.set_attribute("BlacklistTimeout", "3").unwrap();

        assert_eq!(config.max_queue_len, 64);
        assert_eq!(config.max_queue_time, Duration::from_secs(30));
        assert_eq!(config.node_traversal_time, Duration::from_millis(25));
        assert!(config.enable_hello);
        assert_eq!(config.blacklist_duration(), Duration::from_secs(3));
    }

    #[test]
    fn test_set_attribute_errors() {
        let mut config = RoutingConfig::default();
        assert!(matches!(
            config.set_attribute("NoSuchThing", "1"),
            Err(ConfigError::UnknownAttribute(_))
        ));
        assert!(matches!(
            config.set_attribute("RreqRetries", "many"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.set_attribute("HelloInterval", "2h"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(config, RoutingConfig::default());
    }

    #[test]
    fn test_builder() {
        let config = RoutingConfig::default()
            .with_max_queue_len(3)
            .with_rreq_retries(4)
            .with_hello(true);
        assert_eq!(config.max_queue_len, 3);
        assert_eq!(config.rreq_retries, 4);
        assert!(config.enable_hello);
    }
}
