//! Configuration types for the dependency engine.

/// Tunables for cascade propagation, buffer display and logging.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    pub verbosity: u8,
    /// Tasks farther than this many links from a cascade source are left in place.
    pub max_cascade_depth: usize,
    /// Highest consumed percentage still shown as healthy.
    pub buffer_caution_pct: f64,
    /// Highest consumed percentage still shown as caution; anything above is critical.
    pub buffer_critical_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            max_cascade_depth: 100,
            buffer_caution_pct: 33.0,
            buffer_critical_pct: 66.0,
        }
    }
}

impl EngineConfig {
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.max_cascade_depth, 100);
        assert!((config.buffer_caution_pct - 33.0).abs() < 1e-9);
        assert!((config.buffer_critical_pct - 66.0).abs() < 1e-9);
    }

    #[test]
    fn test_config_builders() {
        let config = EngineConfig::default()
            .with_verbosity(2)
            .with_max_cascade_depth(5);
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.max_cascade_depth, 5);
    }
}
