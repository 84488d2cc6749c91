use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use tracing::info;

use crate::circuit_breaker::CircuitBreaker;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::circuit_breaker::CircuitBreakerStats;
use crate::clock::Clock;
use crate::clock::MonotonicClock;

/// One circuit breaker per named service
///
/// Owned by the application root and shared with every client that should
/// see the same breakers. The first configuration supplied for a name wins.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Registry whose breakers fall back to `default_config`
    pub fn with_config(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { breakers: DashMap::new(), default_config, clock }
    }

    /// Get the breaker for `name`, creating it on first use
    pub fn get_breaker(&self, name: &str, config: Option<&CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let config = config.cloned().unwrap_or_else(|| self.default_config.clone());
            debug!(breaker = name, ?config, "Creating circuit breaker");
            Arc::new(CircuitBreaker::with_clock(name, config, Arc::clone(&self.clock)))
        });

        Arc::clone(entry.value())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Stats for every breaker, ordered by name
    pub fn get_all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers.iter().map(|entry| (entry.key().clone(), entry.value().stats())).collect()
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        info!(count = self.breakers.len(), "Reset all circuit breakers");
    }

    /// Drop the breaker for `name`; callers holding it keep their handle
    pub fn remove_breaker(&self, name: &str) -> bool {
        self.breakers.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;

    #[test]
    fn test_get_breaker_returns_same_instance() {
        let registry = CircuitBreakerRegistry::new();

        let first = registry.get_breaker("api.example.com", None);
        let second = registry.get_breaker("api.example.com", None);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_first_config_wins() {
        let registry = CircuitBreakerRegistry::new();
        let custom = CircuitBreakerConfig { failure_threshold: 2, ..Default::default() };

        let first = registry.get_breaker("svc", Some(&custom));
        let second = registry.get_breaker("svc", Some(&CircuitBreakerConfig::conservative()));

        assert_eq!(first.config().failure_threshold, 2);
        assert_eq!(second.config().failure_threshold, 2);
    }

    #[test]
    fn test_default_config_used_when_missing() {
        let registry = CircuitBreakerRegistry::with_config(CircuitBreakerConfig::aggressive());
        let breaker = registry.get_breaker("svc", None);

        assert_eq!(breaker.config(), &CircuitBreakerConfig::aggressive());
    }

    #[test]
    fn test_stats_and_reset_all() {
        let registry = CircuitBreakerRegistry::new();
        registry.get_breaker("b.example.com", None).open();
        registry.get_breaker("a.example.com", None).record_failure();

        let stats = registry.get_all_stats();
        let names: Vec<_> = stats.keys().cloned().collect();
        assert_eq!(names, vec!["a.example.com", "b.example.com"]);
        assert_eq!(stats["a.example.com"].failures, 1);
        assert_eq!(stats["b.example.com"].state, CircuitState::Open);

        registry.reset_all();
        for stats in registry.get_all_stats().values() {
            assert_eq!(stats.state, CircuitState::Closed);
            assert_eq!(stats.total_requests, 0);
        }
    }

    #[test]
    fn test_remove_breaker() {
        let registry = CircuitBreakerRegistry::new();
        let held = registry.get_breaker("svc", None);
        held.open();

        assert!(registry.remove_breaker("svc"));
        assert!(!registry.remove_breaker("svc"));
        assert!(registry.is_empty());

        let fresh = registry.get_breaker("svc", None);
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert_eq!(fresh.state(), CircuitState::Closed);
    }

    #[test]
    fn test_names_sorted() {
        let registry = CircuitBreakerRegistry::new();
        registry.get_breaker("zeta", None);
        registry.get_breaker("alpha", None);

        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
    }
}
