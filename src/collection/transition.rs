//! Granularity transitions
//!
//! Granularity may only move towards coarser values over a collection's
//! lifetime. Requests are validated against the live value and published
//! with a compare-and-swap, so two concurrent requests can never combine
//! into a decrease.
use crate::collection::CollectionTimeseriesConfig;
use crate::error::ConfigurationError;
use crate::granularity::{Granularity, GranularityPolicy};
use tracing::{info, warn};

/// Accepted granularity change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Requested value equals the current one; nothing changed
    Unchanged(Granularity),
    /// Granularity moved to a coarser value
    Upgraded {
        /// Previous granularity
        from: Granularity,
        /// New granularity
        to: Granularity,
    },
}

impl Transition {
    /// Granularity in effect after the transition
    pub fn granularity(self) -> Granularity {
        match self {
            Transition::Unchanged(g) => g,
            Transition::Upgraded { to, .. } => to,
        }
    }
}

/// Validates and applies granularity changes
pub struct GranularityTransitionValidator;

impl GranularityTransitionValidator {
    /// Check whether moving from `current` to `requested` is allowed
    ///
    /// ```
    /// use kuba_buckets::collection::{GranularityTransitionValidator, Transition};
    /// use kuba_buckets::granularity::Granularity;
    ///
    /// let t = GranularityTransitionValidator::validate(Granularity::Seconds, Granularity::Hours);
    /// assert_eq!(
    ///     t,
    ///     Ok(Transition::Upgraded { from: Granularity::Seconds, to: Granularity::Hours })
    /// );
    /// assert!(GranularityTransitionValidator::validate(Granularity::Hours, Granularity::Minutes).is_err());
    /// ```
    pub fn validate(
        current: Granularity,
        requested: Granularity,
    ) -> Result<Transition, ConfigurationError> {
        let (cur, req) = (
            GranularityPolicy::rank(current),
            GranularityPolicy::rank(requested),
        );
        if req < cur {
            Err(ConfigurationError::GranularityDecrease { current, requested })
        } else if req == cur {
            Ok(Transition::Unchanged(current))
        } else {
            Ok(Transition::Upgraded {
                from: current,
                to: requested,
            })
        }
    }

    /// Validate `requested` against the live granularity of `config` and publish it
    ///
    /// On rejection the configuration is left untouched.
    pub fn apply(
        collection: &str,
        config: &CollectionTimeseriesConfig,
        requested: Granularity,
    ) -> Result<Transition, ConfigurationError> {
        let mut current = config.granularity();
        loop {
            let transition = match Self::validate(current, requested) {
                Ok(t) => t,
                Err(e) => {
                    crate::metrics::record_granularity_change("rejected");
                    warn!(
                        collection,
                        current = %current,
                        requested = %requested,
                        "Rejected granularity decrease"
                    );
                    return Err(e);
                }
            };

            if let Transition::Unchanged(_) = transition {
                crate::metrics::record_granularity_change("unchanged");
                return Ok(transition);
            }

            match config.compare_exchange_granularity(current, requested) {
                Ok(()) => {
                    crate::metrics::record_granularity_change("upgraded");
                    info!(
                        collection,
                        from = %current,
                        to = %requested,
                        "Granularity changed"
                    );
                    return Ok(transition);
                }
                // Raced with another change; re-validate against what won
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeseriesOptions;
    use std::sync::Arc;

    fn config(g: Granularity) -> CollectionTimeseriesConfig {
        CollectionTimeseriesConfig::new(&TimeseriesOptions::new("t").with_granularity(g))
    }

    #[test]
    fn test_validate_matrix() {
        for current in Granularity::ALL {
            for requested in Granularity::ALL {
                let result = GranularityTransitionValidator::validate(current, requested);
                if requested.rank() < current.rank() {
                    assert_eq!(
                        result,
                        Err(ConfigurationError::GranularityDecrease { current, requested })
                    );
                } else {
                    assert_eq!(result.unwrap().granularity(), requested);
                }
            }
        }
    }

    #[test]
    fn test_apply_upgrade() {
        let cfg = config(Granularity::Seconds);
        let t = GranularityTransitionValidator::apply("c", &cfg, Granularity::Minutes).unwrap();
        assert_eq!(
            t,
            Transition::Upgraded {
                from: Granularity::Seconds,
                to: Granularity::Minutes
            }
        );
        assert_eq!(cfg.granularity(), Granularity::Minutes);
    }

    #[test]
    fn test_apply_decrease_leaves_state() {
        let cfg = config(Granularity::Hours);
        let err = GranularityTransitionValidator::apply("c", &cfg, Granularity::Seconds).unwrap_err();
        assert!(err.to_string().contains("Granularity decrease not supported"));
        assert_eq!(cfg.granularity(), Granularity::Hours);
    }

    #[test]
    fn test_apply_noop() {
        let cfg = config(Granularity::Minutes);
        let t = GranularityTransitionValidator::apply("c", &cfg, Granularity::Minutes).unwrap();
        assert_eq!(t, Transition::Unchanged(Granularity::Minutes));
        assert_eq!(cfg.granularity(), Granularity::Minutes);
    }

    #[test]
    fn test_concurrent_requests_never_decrease() {
        for _ in 0..50 {
            let cfg = Arc::new(config(Granularity::Seconds));
            let handles: Vec<_> = [Granularity::Hours, Granularity::Minutes]
                .into_iter()
                .map(|g| {
                    let cfg = Arc::clone(&cfg);
                    std::thread::spawn(move || GranularityTransitionValidator::apply("c", &cfg, g))
                })
                .collect();
            for h in handles {
                let _ = h.join().unwrap();
            }
            // Whatever the interleaving, hours must win
            assert_eq!(cfg.granularity(), Granularity::Hours);
        }
    }
}
