//! Per-node engine factory
//!
//! [`RoutingHelper`] holds one configuration and stamps out engines from
//! it. Attribute overrides set on the helper apply to every engine it
//! creates afterwards.

use std::sync::Arc;

use qlrn_core::{Clock, NetworkStack, Scheduler};
use tracing::debug;

use crate::config::RoutingConfig;
use crate::engine::{RoutingEngine, RoutingTimer};
use crate::error::ConfigError;

/// Factory for [`RoutingEngine`] instances
#[derive(Debug, Clone, Default)]
pub struct RoutingHelper {
    config: RoutingConfig,
}

impl RoutingHelper {
    /// Create a helper with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a helper from an explicit configuration
    pub fn with_config(config: RoutingConfig) -> Self {
        Self { config }
    }

    /// Override one attribute by name
    pub fn set(&mut self, name: &str, value: &str) -> Result<&mut Self, ConfigError> {
        self.config.set_attribute(name, value)?;
        debug!(name, value, "Helper attribute set");
        Ok(self)
    }

    /// Configuration engines will be created with
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Create an engine bound to one node's stack
    pub fn create<N, S, C>(
        &self,
        stack: Arc<N>,
        scheduler: Arc<S>,
        clock: Arc<C>,
    ) -> RoutingEngine<N, S, C>
    where
        N: NetworkStack,
        S: Scheduler<RoutingTimer>,
        C: Clock,
    {
        RoutingEngine::new(self.config.clone(), stack, scheduler, clock)
    }

    /// Assign consecutive random streams to `engines`, starting at `stream`
    ///
    /// Returns the number of streams consumed.
    pub fn assign_streams<N, S, C>(engines: &[&RoutingEngine<N, S, C>], stream: i64) -> i64
    where
        N: NetworkStack,
        S: Scheduler<RoutingTimer>,
        C: Clock,
    {
        let mut current = stream;
        for engine in engines {
            current += engine.assign_streams(current);
        }
        current - stream
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_set_chains() {
        let mut helper = RoutingHelper::new();
        helper
            .set("EnableHello", "true")
            .unwrap()
            .set("HelloInterval", "500ms")
            .unwrap();
        assert!(helper.config().enable_hello);
        assert_eq!(helper.config().hello_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_set_rejects_unknown() {
        let mut helper = RoutingHelper::new();
        assert!(helper.set("Bogus", "1").is_err());
        assert_eq!(helper.config(), &RoutingConfig::default());
    }
}
