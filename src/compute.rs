//! The injected scientific computation.
//!
//! The engine reduces each object's payload array to a scalar metric through
//! the [Compute] trait. The reduction itself is caller-supplied and is not
//! part of the engine; [MeanCompute] is the stock implementation.

use ndarray::ArrayView1;

use crate::error::ComputeError;

/// Trait for reductions applied to one payload array.
///
/// Implementations must be synchronous and must not block on shared
/// resources; workers call them concurrently.
pub trait Compute: Send + Sync {
    /// Reduce a payload array to a scalar metric.
    fn apply(&self, payload: &ArrayView1<f64>) -> Result<f64, ComputeError>;
}

/// Arithmetic mean of the payload.
pub struct MeanCompute;

impl Compute for MeanCompute {
    fn apply(&self, payload: &ArrayView1<f64>) -> Result<f64, ComputeError> {
        let mean = payload
            .mean()
            .ok_or(ComputeError::EmptyPayload { operation: "mean" })?;
        if !mean.is_finite() {
            return Err(ComputeError::NonFinite { operation: "mean" });
        }
        Ok(mean)
    }
}
