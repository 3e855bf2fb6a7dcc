//! Application configuration management

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::services::{CriteriaSource, RankingOptions, ServiceOptions, UnknownFieldPolicy};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Reject filter keys that name no declared field
    pub filter_strict: bool,

    /// Page size for rankings when the request gives none
    pub ranking_default_limit: u64,

    /// Declared ranking criteria; empty means sample the latest rating
    pub ranking_criteria: Vec<String>,

    /// JSON file with members and ratings to load at start
    pub seed_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            filter_strict: lookup("FILTER_STRICT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            ranking_default_limit: lookup("RANKING_DEFAULT_LIMIT")
                .unwrap_or_else(|| "10".to_string())
                .trim()
                .parse()
                .context("Invalid RANKING_DEFAULT_LIMIT")?,

            ranking_criteria: lookup("RANKING_CRITERIA")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),

            seed_path: lookup("SEED_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn service_options(&self) -> ServiceOptions {
        let criteria = if self.ranking_criteria.is_empty() {
            CriteriaSource::Sampled
        } else {
            CriteriaSource::Declared(self.ranking_criteria.clone())
        };

        ServiceOptions {
            unknown_fields: if self.filter_strict {
                UnknownFieldPolicy::Reject
            } else {
                UnknownFieldPolicy::Ignore
            },
            ranking: RankingOptions {
                default_limit: self.ranking_default_limit,
                criteria,
                ..RankingOptions::default()
            },
        }
    }
}
