//! Server selection.
//!
//! The balancer picks one server from a prefiltered candidate set. The
//! orchestrator owns eligibility (health, breaker state, bans, maintenance,
//! capacity); the balancer owns ranking. Six algorithms are available:
//!
//! - **weighted**: six sub-scores on `[0, 100]` combined by configurable
//!   weights.
//! - **fastest-response**: blended latency with hot-model boost, eviction
//!   and degradation penalties. The default.
//! - **streaming-optimized**: TTFT/estimated-duration blend for streaming
//!   requests, delegating to fastest-response for unary ones.
//! - **round-robin**: rotation with optional sticky sessions.
//! - **least-connections**: lowest load share with a failure-rate penalty.
//! - **random**: uniform choice, for chaos drills and A/B baselines.
//!
//! Every selection produces a [`DecisionEvent`] with the full per-candidate
//! score breakdown, retained in a bounded [`DecisionHistory`].

mod candidate;
mod config;
mod decision;
mod score;
mod selector;

pub use candidate::Candidate;
pub use config::{
    BalancerConfig, BalancerConfigBuilder, BalancerConfigError, LeastConnectionsConfig,
    RoundRobinConfig, ScoreWeights, ScoringThresholds, StreamingSelectConfig,
};
pub use decision::{
    CandidateScore, DecisionEvent, DecisionHistory, DecisionHistoryPersisted, ScoreBreakdown,
};
pub use selector::{Algorithm, LoadBalancer, Selection};
