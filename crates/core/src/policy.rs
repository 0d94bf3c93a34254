use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Topic;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("pass threshold must be within 0..=100")]
    InvalidPassThreshold,

    #[error("root orders must include at least one order")]
    EmptyRootOrders,
}

/// Policy constants governing unlock and completion decisions.
///
/// The defaults reproduce the original gating rules: a quiz attempt passes
/// at 60% or better, and a topic with no prerequisites counts as a root of
/// its subject when its order is 0 or 1. Both knobs are configuration, not
/// literals, so they can be tuned without touching the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingPolicy {
    pass_threshold: f64,
    root_orders: Vec<u32>,
}

impl Default for GatingPolicy {
    fn default() -> Self {
        Self {
            pass_threshold: 60.0,
            root_orders: vec![0, 1],
        }
    }
}

impl GatingPolicy {
    /// Creates a custom policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the threshold is not a percentage or the root
    /// order set is empty.
    pub fn new(pass_threshold: f64, root_orders: Vec<u32>) -> Result<Self, PolicyError> {
        if !pass_threshold.is_finite() || !(0.0..=100.0).contains(&pass_threshold) {
            return Err(PolicyError::InvalidPassThreshold);
        }
        if root_orders.is_empty() {
            return Err(PolicyError::EmptyRootOrders);
        }
        Ok(Self {
            pass_threshold,
            root_orders,
        })
    }

    /// Minimum attempt percentage counted as a passing completion.
    #[must_use]
    pub fn pass_threshold(&self) -> f64 {
        self.pass_threshold
    }

    #[must_use]
    pub fn root_orders(&self) -> &[u32] {
        &self.root_orders
    }

    #[must_use]
    pub fn is_passing(&self, percentage: f64) -> bool {
        percentage >= self.pass_threshold
    }

    /// True when the topic is a root of its subject: no prerequisites and
    /// an order in the configured root set.
    #[must_use]
    pub fn is_root(&self, topic: &Topic) -> bool {
        topic.has_no_prerequisites() && self.root_orders.contains(&topic.order())
    }
}
