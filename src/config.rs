use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::domain::estimate::{DEFAULT_BUDGET_RANGE_RATE, DEFAULT_CONTINGENCY_RATE};
use crate::domain::{EstimateOptions, MaterialGrade};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Agents
    pub analysis_agent_url: String,
    pub summary_agent_url: String,
    pub agent_token: Option<String>,
    pub agent_timeout_seconds: u64,
    pub agent_retry_window_seconds: u64,

    // Estimation
    pub default_grade: MaterialGrade,
    pub contingency_rate: f64,
    pub budget_range_rate: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Environment::Dev,
            server_addr: "0.0.0.0:8080".to_string(),
            cors_allow_origins: vec!["http://localhost:3000".to_string()],
            analysis_agent_url: "http://localhost:8081".to_string(),
            summary_agent_url: "http://localhost:8082".to_string(),
            agent_token: None,
            agent_timeout_seconds: 60,
            agent_retry_window_seconds: 0,
            default_grade: MaterialGrade::Standard,
            contingency_rate: DEFAULT_CONTINGENCY_RATE,
            budget_range_rate: DEFAULT_BUDGET_RANGE_RATE,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary variable source; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let env = lookup("ENV")
            .map(|s| Environment::from_str(&s))
            .unwrap_or(defaults.env);
        let server_addr = lookup("SERVER_ADDR").unwrap_or(defaults.server_addr);

        // CORS
        let cors_allow_origins = match lookup("CORS_ALLOW_ORIGINS") {
            Some(origins) => origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_allow_origins,
        };

        // Agents
        let analysis_agent_url = agent_url(
            "ANALYSIS_AGENT_URL",
            lookup("ANALYSIS_AGENT_URL").unwrap_or(defaults.analysis_agent_url),
        )?;
        let summary_agent_url = agent_url(
            "SUMMARY_AGENT_URL",
            lookup("SUMMARY_AGENT_URL").unwrap_or(defaults.summary_agent_url),
        )?;
        let agent_token = lookup("AGENT_TOKEN").filter(|t| !t.trim().is_empty());
        let agent_timeout_seconds: u64 = parse_var(&lookup, "AGENT_TIMEOUT_SECONDS")?
            .unwrap_or(defaults.agent_timeout_seconds);
        if agent_timeout_seconds == 0 {
            bail!("AGENT_TIMEOUT_SECONDS must be greater than zero");
        }
        let agent_retry_window_seconds = parse_var(&lookup, "AGENT_RETRY_WINDOW_SECONDS")?
            .unwrap_or(defaults.agent_retry_window_seconds);

        // Estimation
        let default_grade = parse_var(&lookup, "DEFAULT_GRADE")?.unwrap_or(defaults.default_grade);
        let contingency_rate = rate(&lookup, "CONTINGENCY_RATE", defaults.contingency_rate)?;
        let budget_range_rate = rate(&lookup, "BUDGET_RANGE_RATE", defaults.budget_range_rate)?;

        Ok(Settings {
            env,
            server_addr,
            cors_allow_origins,
            analysis_agent_url,
            summary_agent_url,
            agent_token,
            agent_timeout_seconds,
            agent_retry_window_seconds,
            default_grade,
            contingency_rate,
            budget_range_rate,
        })
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_seconds)
    }

    pub fn estimate_options(&self) -> EstimateOptions {
        EstimateOptions {
            contingency_rate: self.contingency_rate,
            budget_range_rate: self.budget_range_rate,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(None),
    }
}

fn rate<F>(lookup: &F, key: &str, default: f64) -> Result<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let value: f64 = parse_var(lookup, key)?.unwrap_or(default);
    if !(0.0..=1.0).contains(&value) {
        bail!("{} must be between 0 and 1, got {}", key, value);
    }
    Ok(value)
}

fn agent_url(key: &str, raw: String) -> Result<String> {
    let parsed = Url::parse(&raw).with_context(|| format!("{} is not a valid URL: {}", key, raw))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("{} must use http or https, got {}", key, parsed.scheme());
    }
    Ok(raw.trim_end_matches('/').to_string())
}
