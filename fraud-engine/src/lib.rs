//! Fraud engine
//!
//! Hybrid fraud scoring for money-transfer requests: weighted static rules
//! evaluated against per-user behavioral baselines, blended with an optional
//! advisory score, banded into a risk level and mapped to a decision.
//!
//! Evaluation is computation-only and never blocks. The only mutable state is
//! the [`ProfileStore`], which advances solely through
//! [`RiskAggregator::commit`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod advisory;
pub mod aggregator;
pub mod audit;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod profile;
pub mod rules;
pub mod types;

pub use advisory::{AdvisoryUnavailable, LogisticRiskModel, RiskModel, TransactionFeatures};
pub use aggregator::RiskAggregator;
pub use auth::{AmountTier, AuthTier, TierPolicy, TieredAuthPolicy};
pub use config::FraudThresholds;
pub use directory::{InMemoryUserDirectory, UserDirectory};
pub use error::{Error, Result};
pub use locks::UserLocks;
pub use metrics::{FraudStatistics, Metrics};
pub use profile::{BehavioralProfile, ProfileStore};
pub use rules::{rule_score, RuleEvaluator};
pub use types::*;
