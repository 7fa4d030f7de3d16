//! Convergence bookkeeping for the iterative solvers.

use tracing::{debug, trace};

use crate::errors::{RandNLAError, Result};

/// Most history entries reserved up front. Longer runs grow the buffer.
const HISTORY_RESERVE_LIMIT: usize = 1 << 16;

pub trait LoggerConfig {
    type Recipe: Logger;

    fn complete(&self) -> Result<Self::Recipe>;
}

/// What a solver needs from its logger: an iteration budget and a
/// convergence flag.
pub trait Logger {
    fn max_it(&self) -> usize;

    fn converged(&self) -> bool;

    /// Records the error metric observed after `iteration` steps.
    fn update(&mut self, iteration: usize, metric: f64);

    /// Recorded metrics, oldest first.
    fn history(&self) -> &[f64];
}

/// Stops after `max_it` iterations or once the metric drops below
/// `threshold`. Every `collection_rate`-th metric is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicLogger {
    pub max_it: usize,
    pub threshold: f64,
    pub collection_rate: usize,
}

impl Default for BasicLogger {
    fn default() -> Self {
        Self {
            max_it: 1000,
            threshold: 0.0,
            collection_rate: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicLoggerRecipe {
    max_it: usize,
    threshold: f64,
    collection_rate: usize,
    history: Vec<f64>,
    iteration: usize,
    converged: bool,
}

impl BasicLoggerRecipe {
    /// Iteration of the most recent update.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Most recent recorded metric.
    pub fn last(&self) -> Option<f64> {
        self.history.last().copied()
    }
}

impl LoggerConfig for BasicLogger {
    type Recipe = BasicLoggerRecipe;

    fn complete(&self) -> Result<BasicLoggerRecipe> {
        if self.collection_rate == 0 {
            return Err(RandNLAError::invalid_argument(
                "collection_rate",
                "collection rate must be at least 1",
            ));
        }
        if self.threshold.is_nan() || self.threshold < 0.0 {
            return Err(RandNLAError::invalid_argument(
                "threshold",
                format!("threshold must be non-negative, found {}", self.threshold),
            ));
        }
        let reserve = (self.max_it / self.collection_rate)
            .saturating_add(1)
            .min(HISTORY_RESERVE_LIMIT);
        Ok(BasicLoggerRecipe {
            max_it: self.max_it,
            threshold: self.threshold,
            collection_rate: self.collection_rate,
            history: Vec::with_capacity(reserve),
            iteration: 0,
            converged: false,
        })
    }
}

impl Logger for BasicLoggerRecipe {
    fn max_it(&self) -> usize {
        self.max_it
    }

    fn converged(&self) -> bool {
        self.converged
    }

    fn update(&mut self, iteration: usize, metric: f64) {
        self.iteration = iteration;
        if iteration % self.collection_rate == 0 {
            self.history.push(metric);
        }
        trace!(iteration, metric, "solver iteration");
        if metric < self.threshold {
            self.converged = true;
            debug!(iteration, metric, threshold = self.threshold, "error metric below threshold");
        }
    }

    fn history(&self) -> &[f64] {
        &self.history
    }
}
