//! Configured choice of estimator or betting strategy.

use serde::{Deserialize, Serialize};

use crate::assort::Assertion;
use crate::audit_config::AuditType;
use crate::errors::ConfigError;
use crate::risk::{
    AdaptiveComparison, Agrapa, ClcaErrorRates, FixedBet, FixedEta, MartingaleStrategy,
    SampleTracker, ShrinkTrunc,
};

fn default_d() -> f64 {
    100.0
}

fn default_eps() -> f64 {
    1e-5
}

fn default_lambda_init() -> f64 {
    0.5
}

fn default_c0() -> f64 {
    0.6
}

fn default_c_max() -> f64 {
    0.9
}

fn default_c_grow() -> f64 {
    2.0
}

/// Strategy section of `audit.toml`.
///
/// ```toml
/// [strategy]
/// kind = "adaptive_comparison"
/// d = 100
/// eps = 0.00001
/// apriori = { p1o = 0.001, p2o = 0.0001 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    ShrinkTrunc {
        #[serde(default = "default_d")]
        d: f64,
        #[serde(default)]
        c: Option<f64>,
        #[serde(default)]
        f: f64,
    },
    Sprt {
        #[serde(default)]
        eta0: Option<f64>,
    },
    FixedBet {
        lambda: f64,
    },
    Agrapa {
        #[serde(default = "default_lambda_init")]
        lambda_init: f64,
        #[serde(default = "default_c0")]
        c0: f64,
        #[serde(default = "default_c_max")]
        c_max: f64,
        #[serde(default = "default_c_grow")]
        c_grow: f64,
    },
    AdaptiveComparison {
        #[serde(default = "default_d")]
        d: f64,
        #[serde(default = "default_eps")]
        eps: f64,
        #[serde(default)]
        apriori: ClcaErrorRates,
    },
}

impl StrategyConfig {
    /// Default strategy for an audit type: shrink-trunc for polling, the
    /// adaptive comparison bet otherwise.
    pub fn default_for(audit_type: AuditType) -> Self {
        match audit_type {
            AuditType::Polling => StrategyConfig::ShrinkTrunc {
                d: default_d(),
                c: None,
                f: 0.0,
            },
            AuditType::Clca | AuditType::OneAudit => StrategyConfig::AdaptiveComparison {
                d: default_d(),
                eps: default_eps(),
                apriori: ClcaErrorRates::default(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::ShrinkTrunc { .. } => "shrink_trunc",
            StrategyConfig::Sprt { .. } => "sprt",
            StrategyConfig::FixedBet { .. } => "fixed_bet",
            StrategyConfig::Agrapa { .. } => "agrapa",
            StrategyConfig::AdaptiveComparison { .. } => "adaptive_comparison",
        }
    }

    pub fn validate(&self, audit_type: AuditType) -> Result<(), ConfigError> {
        let invalid = |name: &str, message: String| {
            Err(ConfigError::InvalidParameter {
                name: format!("strategy.{name}"),
                message,
            })
        };
        match *self {
            StrategyConfig::ShrinkTrunc { d, .. } | StrategyConfig::AdaptiveComparison { d, .. }
                if d <= 1.0 =>
            {
                invalid("d", format!("must exceed 1, got {d}"))
            }
            StrategyConfig::AdaptiveComparison { .. } if audit_type == AuditType::Polling => {
                invalid("kind", "adaptive_comparison requires a comparison audit".into())
            }
            StrategyConfig::AdaptiveComparison { eps, apriori, .. } => {
                if !(eps > 0.0) {
                    return invalid("eps", format!("must be positive, got {eps}"));
                }
                if apriori.as_array().iter().any(|p| *p < 0.0) || apriori.total() >= 1.0 {
                    return invalid("apriori", "rates must be nonnegative and sum below 1".into());
                }
                Ok(())
            }
            StrategyConfig::FixedBet { lambda } if !(lambda >= 0.0 && lambda < 2.0) => {
                invalid("lambda", format!("must lie in [0, 2), got {lambda}"))
            }
            StrategyConfig::Agrapa { c0, c_max, .. } if !(c0 > 0.0 && c0 <= c_max && c_max < 1.0) => {
                invalid("c_max", format!("need 0 < c0 <= c_max < 1, got c0={c0} c_max={c_max}"))
            }
            StrategyConfig::Agrapa { lambda_init, .. } if !(lambda_init >= 0.0 && lambda_init < 2.0) => {
                invalid("lambda_init", format!("must lie in [0, 2), got {lambda_init}"))
            }
            StrategyConfig::Sprt { eta0: Some(eta0) } if !(eta0 > 0.0 && eta0.is_finite()) => {
                invalid("eta0", format!("must be positive, got {eta0}"))
            }
            StrategyConfig::Sprt { eta0: Some(eta0) }
                if audit_type == AuditType::Polling && eta0 >= 1.0 =>
            {
                invalid("eta0", format!("must lie below the assort bound 1, got {eta0}"))
            }
            _ => Ok(()),
        }
    }

    /// Build the strategy and the draw tracker for one assertion.
    pub fn build(
        &self,
        assertion: &Assertion,
        audit_type: AuditType,
    ) -> (Box<dyn MartingaleStrategy>, SampleTracker) {
        let comparison = audit_type != AuditType::Polling;
        let noerror = assertion.noerror();
        let (eta0, upper) = if comparison {
            (noerror, 2.0 * noerror)
        } else {
            (assertion.reported_mean, assertion.upper_bound())
        };
        let tracker = if comparison {
            SampleTracker::with_error_counts(noerror, assertion.upper_bound())
        } else {
            SampleTracker::new()
        };

        let strategy: Box<dyn MartingaleStrategy> = match *self {
            StrategyConfig::ShrinkTrunc { d, c, f } => {
                let mut st = ShrinkTrunc::new(eta0, 0.5, upper).with_d(d).with_f(f);
                if let Some(c) = c {
                    st = st.with_c(c);
                }
                Box::new(st)
            }
            StrategyConfig::Sprt { eta0: fixed } => Box::new(FixedEta {
                eta0: fixed.unwrap_or(eta0),
            }),
            StrategyConfig::FixedBet { lambda } => Box::new(FixedBet { lambda }),
            StrategyConfig::Agrapa {
                lambda_init,
                c0,
                c_max,
                c_grow,
            } => Box::new(Agrapa {
                lambda_init,
                c0,
                c_max,
                c_grow,
            }),
            StrategyConfig::AdaptiveComparison { d, eps, apriori } => Box::new(AdaptiveComparison {
                noerror,
                assort_upper: assertion.upper_bound(),
                apriori,
                d,
                eps,
            }),
        };
        (strategy, tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_audit_type() {
        assert_eq!(StrategyConfig::default_for(AuditType::Polling).name(), "shrink_trunc");
        assert_eq!(
            StrategyConfig::default_for(AuditType::Clca).name(),
            "adaptive_comparison"
        );
    }

    #[test]
    fn test_parse_agrapa_with_defaults() {
        let s: StrategyConfig = toml::from_str("kind = \"agrapa\"\nc_max = 0.95\n").unwrap();
        assert_eq!(
            s,
            StrategyConfig::Agrapa {
                lambda_init: 0.5,
                c0: 0.6,
                c_max: 0.95,
                c_grow: 2.0
            }
        );
    }

    #[test]
    fn test_adaptive_comparison_rejected_for_polling() {
        let s = StrategyConfig::default_for(AuditType::Clca);
        assert!(s.validate(AuditType::Clca).is_ok());
        assert!(s.validate(AuditType::Polling).is_err());
    }

    #[test]
    fn test_bets_outside_safe_range_are_rejected() {
        let agrapa = StrategyConfig::Agrapa {
            lambda_init: 3.0,
            c0: 0.6,
            c_max: 0.9,
            c_grow: 2.0,
        };
        assert!(agrapa.validate(AuditType::Polling).is_err());
        assert!(StrategyConfig::FixedBet { lambda: -0.1 }.validate(AuditType::Polling).is_err());
        assert!(StrategyConfig::FixedBet { lambda: 1.5 }.validate(AuditType::Polling).is_ok());
        assert!(StrategyConfig::Sprt { eta0: Some(0.0) }.validate(AuditType::Clca).is_err());
        assert!(StrategyConfig::Sprt { eta0: Some(1.0) }.validate(AuditType::Polling).is_err());
        assert!(StrategyConfig::Sprt { eta0: Some(0.55) }.validate(AuditType::Polling).is_ok());
    }

    #[test]
    fn test_agrapa_requires_c_max_below_one() {
        let s = StrategyConfig::Agrapa {
            lambda_init: 0.5,
            c0: 0.6,
            c_max: 1.0,
            c_grow: 2.0,
        };
        assert!(s.validate(AuditType::Polling).is_err());
    }
}
