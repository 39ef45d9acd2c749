//! Partition sizing
//!
//! Finds the smallest partition that still fits an image once its hash tree and
//! FEC data are appended. The overhead is only known through a capacity oracle
//! (usually `avbtool add_hashtree_footer --calc_max_image_size`), which is
//! expensive to call, so the solver binary searches over it.

use crate::error::{Error, Result};

/// Default hard cap on the search ceiling, as a multiple of the image size.
pub const DEFAULT_MAX_GROWTH_FACTOR: u64 = 16;

/// Maps a partition size to the largest image payload it can hold.
///
/// Implementations must be non-decreasing in `partition_size`. Any error aborts
/// the search and is reported as [`Error::OracleFailure`].
pub trait CapacityOracle {
    fn max_payload(&mut self, partition_size: u64) -> Result<u64>;
}

impl<F> CapacityOracle for F
where
    F: FnMut(u64) -> Result<u64>,
{
    fn max_payload(&mut self, partition_size: u64) -> Result<u64> {
        self(partition_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingResult {
    pub minimal_partition_size: u64,
    /// Number of times the oracle was consulted
    pub oracle_calls: u32,
}

/// Binary search solver for the minimal partition size.
#[derive(Debug, Clone, Copy)]
pub struct PartitionSizeSolver {
    /// The ceiling may grow up to `image_size * max_growth_factor`
    pub max_growth_factor: u64,
}

impl Default for PartitionSizeSolver {
    fn default() -> Self {
        Self {
            max_growth_factor: DEFAULT_MAX_GROWTH_FACTOR,
        }
    }
}

struct Probe<'o, O: ?Sized> {
    oracle: &'o mut O,
    image_size: u64,
    calls: u32,
}

impl<O: CapacityOracle + ?Sized> Probe<'_, O> {
    /// Whether a partition of `partition_size` bytes can hold the image.
    fn fits(&mut self, partition_size: u64) -> Result<bool> {
        self.calls += 1;
        let capacity = self
            .oracle
            .max_payload(partition_size)
            .map_err(|e| match e {
                e @ Error::OracleFailure { .. } => e,
                other => Error::OracleFailure {
                    partition_size,
                    reason: other.to_string(),
                },
            })?;
        tracing::trace!(partition_size, capacity, image_size = self.image_size, "Probed capacity");
        Ok(capacity >= self.image_size)
    }
}

impl PartitionSizeSolver {
    pub const fn new(max_growth_factor: u64) -> Self {
        Self { max_growth_factor }
    }

    /// Finds the smallest `p >= image_size` with `oracle(p) >= image_size`.
    ///
    /// The floor is tried first. Otherwise the ceiling starts at twice the image
    /// size and is doubled until the oracle confirms it, failing with
    /// [`Error::NoFeasiblePartitionSize`] once the hard cap does not fit either.
    #[tracing::instrument(level = "debug", skip(self, oracle))]
    pub fn solve<O>(&self, image_size: u64, oracle: &mut O) -> Result<SizingResult>
    where
        O: CapacityOracle + ?Sized,
    {
        let mut probe = Probe {
            oracle,
            image_size,
            calls: 0,
        };

        if probe.fits(image_size)? {
            tracing::debug!(image_size, "Image fits a partition of its own size");
            return Ok(SizingResult {
                minimal_partition_size: image_size,
                oracle_calls: probe.calls,
            });
        }

        let cap = image_size.saturating_mul(self.max_growth_factor.max(2));
        let mut low = image_size.saturating_add(1);
        let mut high = image_size.saturating_mul(2).min(cap);
        while !probe.fits(high)? {
            if high >= cap {
                tracing::warn!(image_size, ceiling = high, "Ceiling reached without a fit");
                return Err(Error::NoFeasiblePartitionSize {
                    image_size,
                    ceiling: high,
                });
            }
            low = high + 1;
            high = high.saturating_mul(2).min(cap);
            tracing::debug!(ceiling = high, "Raising search ceiling");
        }

        // low..=high always contains the answer, high is known to fit
        let mut candidate = high;
        let mut high = high - 1;
        while low <= high {
            let mid = low + (high - low) / 2;
            if probe.fits(mid)? {
                candidate = mid;
                high = mid - 1;
            } else {
                low = mid + 1;
            }
        }

        tracing::info!(
            image_size,
            partition_size = candidate,
            oracle_calls = probe.calls,
            "Found minimal partition size"
        );
        Ok(SizingResult {
            minimal_partition_size: candidate,
            oracle_calls: probe.calls,
        })
    }
}
