//! Named breaker lookup, grounded on `fc-router::circuit_breaker_registry`
//! (one breaker per dispatch target, shared across concurrent callers).

use std::sync::Arc;

use dashmap::DashMap;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self { breakers: DashMap::new(), default_config }
    }

    /// Returns the breaker for `name`, creating one with the registry's
    /// default config on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        let breaker = Arc::new(CircuitBreaker::new(name, self.default_config.clone()));
        self.breakers.insert(name.to_string(), breaker.clone());
        breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_returns_the_same_breaker_instance() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("mediator.CreateOrder");
        let b = registry.get_or_create("mediator.CreateOrder");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
