use log::warn;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{OptimErr, Result};

/// An exported snapshot of the optimizer's own state.
///
/// `slots` holds the `(m, v)` accumulators of every registered parameter in
/// registration order, interleaved per parameter: `[m_0, v_0, m_1, v_1, ..]`.
/// Together with the global step that is the full payload a host checkpoint
/// needs to rebuild the optimizer; parameter values travel separately through
/// `ParameterStore::export_params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub global_step: u64,
    pub slots: Vec<ArrayD<f32>>,
}

impl OptimizerState {
    /// Reconciles the slot count against the `2 * parameters` entries the
    /// store expects.
    ///
    /// Older checkpoint layouts carried exactly one extra trailing entry;
    /// such a payload is truncated to the expected size instead of rejected.
    /// No meaning is attached to the dropped entry.
    ///
    /// # Arguments
    /// * `parameters` - The number of registered parameters.
    ///
    /// # Returns
    /// A `StateSizeMismatch` error for any count other than `2 * parameters`
    /// or `2 * parameters + 1`.
    pub(crate) fn reconcile(mut self, parameters: usize) -> Result<Self> {
        let expected = 2 * parameters;

        if self.slots.len() == expected + 1 {
            warn!(got = self.slots.len(), expected = expected; "truncating legacy state entry");
            self.slots.truncate(expected);
        }

        if self.slots.len() != expected {
            return Err(OptimErr::StateSizeMismatch {
                expected,
                got: self.slots.len(),
            });
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;

    fn tensor(len: usize, value: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(&[len]), value)
    }

    fn state(entries: usize) -> OptimizerState {
        OptimizerState {
            global_step: 7,
            slots: (0..entries).map(|i| tensor(2, i as f32)).collect(),
        }
    }

    #[test]
    fn test_exact_count_passes_through() {
        let reconciled = state(4).reconcile(2).unwrap();
        assert_eq!(reconciled, state(4));
    }

    #[test]
    fn test_legacy_extra_entry_is_truncated() {
        let reconciled = state(5).reconcile(2).unwrap();

        assert_eq!(reconciled.slots.len(), 4);
        assert_eq!(reconciled.slots, state(4).slots);
        assert_eq!(reconciled.global_step, 7);
    }

    #[test]
    fn test_other_counts_are_rejected() {
        for entries in [0, 3, 6, 7] {
            assert!(matches!(
                state(entries).reconcile(2).unwrap_err(),
                OptimErr::StateSizeMismatch { expected: 4, got } if got == entries
            ));
        }
    }
}
