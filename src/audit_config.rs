//! Audit configuration read from `.riskaudit/audit.toml`.
//!
//! Settings are layered file → environment → CLI. Every parameter has a
//! default, so an empty file is a valid polling audit at a 5% risk limit.
//!
//! # Configuration File Format
//!
//! ```toml
//! [audit]
//! audit_type = "clca"
//! risk_limit = 0.05
//! seed = 20261018
//!
//! [rounds]
//! max_rounds = 5
//! max_sample_fraction = 0.5
//! min_margin = 0.0
//!
//! [estimation]
//! nsim = 100
//! quantile = 0.8
//! nthreads = 4
//! error_model = { kind = "rates", p1o = 0.001, p2o = 0.0001 }
//!
//! [strategy]
//! kind = "adaptive_comparison"
//! d = 100
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::estimate::ErrorModel;
use crate::risk::StrategyConfig;

/// How assort values are produced from sampled cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditType {
    /// Reviewed cards only.
    #[default]
    Polling,
    /// Reviewed cards compared with their cast vote records.
    Clca,
    /// Comparison where some cards are only known through pool tallies.
    OneAudit,
}

impl AuditType {
    pub fn is_comparison(self) -> bool {
        self != AuditType::Polling
    }
}

impl std::fmt::Display for AuditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditType::Polling => write!(f, "polling"),
            AuditType::Clca => write!(f, "clca"),
            AuditType::OneAudit => write!(f, "oneaudit"),
        }
    }
}

impl std::str::FromStr for AuditType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "polling" => Ok(AuditType::Polling),
            "clca" | "comparison" => Ok(AuditType::Clca),
            "oneaudit" => Ok(AuditType::OneAudit),
            _ => anyhow::bail!(
                "Invalid audit type '{}'. Valid values: polling, clca, oneaudit",
                s
            ),
        }
    }
}

/// Core audit parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    #[serde(default)]
    pub audit_type: AuditType,
    #[serde(default = "default_risk_limit")]
    pub risk_limit: f64,
    /// Seed for card prns and simulation.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Sample with replacement (testing only).
    #[serde(default)]
    pub with_replacement: bool,
}

fn default_risk_limit() -> f64 {
    0.05
}

fn default_seed() -> u64 {
    1_234_567_890
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            audit_type: AuditType::default(),
            risk_limit: default_risk_limit(),
            seed: default_seed(),
            with_replacement: false,
        }
    }
}

/// Round ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundsSection {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// A contest needing more than this fraction of `Nc` is escalated.
    #[serde(default = "default_max_sample_fraction")]
    pub max_sample_fraction: f64,
    /// Contests whose smallest diluted margin is at or below this are
    /// escalated before the first round.
    #[serde(default)]
    pub min_margin: f64,
    /// Escalate contests whose phantoms alone could overturn the margin.
    #[serde(default = "default_true")]
    pub check_phantoms: bool,
}

fn default_max_rounds() -> u32 {
    5
}

fn default_max_sample_fraction() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

impl Default for RoundsSection {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_sample_fraction: default_max_sample_fraction(),
            min_margin: 0.0,
            check_phantoms: true,
        }
    }
}

/// Sample size estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationSection {
    #[serde(default = "default_nsim")]
    pub nsim: usize,
    #[serde(default = "default_quantile")]
    pub quantile: f64,
    #[serde(default = "default_nthreads")]
    pub nthreads: usize,
    #[serde(default)]
    pub error_model: ErrorModel,
}

fn default_nsim() -> usize {
    100
}

fn default_quantile() -> f64 {
    0.8
}

fn default_nthreads() -> usize {
    4
}

impl Default for EstimationSection {
    fn default() -> Self {
        Self {
            nsim: default_nsim(),
            quantile: default_quantile(),
            nthreads: default_nthreads(),
            error_model: ErrorModel::default(),
        }
    }
}

/// Root of `audit.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditToml {
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default)]
    pub rounds: RoundsSection,
    #[serde(default)]
    pub estimation: EstimationSection,
    /// Defaults by audit type when absent.
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
}

impl AuditToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).map_err(|e| {
            ConfigError::ParseFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse audit.toml")
    }

    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join("audit.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize audit.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn strategy(&self) -> StrategyConfig {
        self.strategy
            .clone()
            .unwrap_or_else(|| StrategyConfig::default_for(self.audit.audit_type))
    }

    /// Apply `RISKAUDIT_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(seed) = get("RISKAUDIT_SEED") {
            self.audit.seed = seed.parse().context("RISKAUDIT_SEED must be an integer")?;
        }
        if let Some(n) = get("RISKAUDIT_NTHREADS") {
            self.estimation.nthreads = n.parse().context("RISKAUDIT_NTHREADS must be an integer")?;
        }
        if let Some(t) = get("RISKAUDIT_AUDIT_TYPE") {
            self.audit.audit_type = t.parse()?;
        }
        Ok(())
    }

    /// Fail fast on parameters no audit can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let risk_limit = self.audit.risk_limit;
        if !(risk_limit > 0.0 && risk_limit < 1.0) {
            return Err(ConfigError::InvalidRiskLimit { value: risk_limit });
        }
        let quantile = self.estimation.quantile;
        if !(quantile > 0.0 && quantile <= 1.0) {
            return Err(ConfigError::InvalidQuantile { value: quantile });
        }
        let positive = |name: &str, ok: bool, value: String| {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::InvalidParameter {
                    name: name.into(),
                    message: format!("must be positive, got {value}"),
                })
            }
        };
        positive("estimation.nsim", self.estimation.nsim > 0, self.estimation.nsim.to_string())?;
        positive(
            "estimation.nthreads",
            self.estimation.nthreads > 0,
            self.estimation.nthreads.to_string(),
        )?;
        positive(
            "rounds.max_rounds",
            self.rounds.max_rounds > 0,
            self.rounds.max_rounds.to_string(),
        )?;
        let fraction = self.rounds.max_sample_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "rounds.max_sample_fraction".into(),
                message: format!("must lie in (0, 1], got {fraction}"),
            });
        }
        self.estimation.error_model.validate()?;
        self.strategy().validate(self.audit.audit_type)
    }

    /// Settings that are legal but probably unintended.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.audit.with_replacement {
            warnings.push("with_replacement = true: sampling with replacement is for testing".into());
        }
        if self.estimation.nsim < 20 {
            warnings.push(format!(
                "estimation.nsim = {} gives noisy sample size estimates",
                self.estimation.nsim
            ));
        }
        if !self.audit.audit_type.is_comparison()
            && matches!(self.estimation.error_model, ErrorModel::Rates(_))
        {
            warnings.push("error_model 'rates' is ignored by polling audits".into());
        }
        if self.audit.risk_limit > 0.2 {
            warnings.push(format!("risk_limit {} is unusually high", self.audit.risk_limit));
        }
        warnings
    }
}

/// Runtime audit configuration with CLI overrides applied.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub project_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub toml: AuditToml,
    pub verbose: bool,
}

impl AuditConfig {
    /// Load `audit.toml` (or defaults) and apply the environment.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let audit_dir = project_dir.join(crate::config::AUDIT_DIR);
        let mut toml = AuditToml::load_or_default(&audit_dir)?;
        toml.apply_env()?;
        Ok(Self {
            project_dir,
            audit_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, nthreads: Option<usize>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(n) = nthreads {
            config.toml.estimation.nthreads = n;
        }
        Ok(config)
    }

    pub fn audit_type(&self) -> AuditType {
        self.toml.audit.audit_type
    }

    pub fn risk_limit(&self) -> f64 {
        self.toml.audit.risk_limit
    }

    pub fn seed(&self) -> u64 {
        self.toml.audit.seed
    }

    pub fn config_file(&self) -> PathBuf {
        self.audit_dir.join("audit.toml")
    }
}
