use serde::{Deserialize, Serialize};

use crate::{OptimErr, Result};

/// The hyperparameters of the blended optimizer.
///
/// Set once when the store is built and immutable afterwards, except for the
/// current learning rate which an external scheduler may overwrite through
/// `ParameterStore::set_learning_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendConfig {
    /// The initial learning rate, also the reference value for the coupled
    /// weight decay policy.
    pub learning_rate: f32,
    /// L2 decay strength, `0.` disables the decay term entirely.
    pub weight_decay: f32,
    /// Per-step geometric decay factor of the momentum-only share of the
    /// update, in `(0, 1]`. The first step is always pure momentum.
    pub sgd_to_adam_factor: f32,
    /// First moment decay rate, in `[0, 1)`.
    pub beta1: f32,
    /// Second moment decay rate, in `[0, 1)`.
    pub beta2: f32,
    /// Small positive floor for numerical stability.
    pub epsilon: f32,
    /// Estimates the second moment from the gradient's deviation off the
    /// momentum instead of the raw gradient.
    pub use_belief: bool,
    /// Scales the decay term by the ratio of the current learning rate to the
    /// initial one, so an external schedule reduces the decay in lockstep.
    pub weight_decay_reduce: bool,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 0.,
            sgd_to_adam_factor: 0.9,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            use_belief: false,
            weight_decay_reduce: false,
        }
    }
}

impl BlendConfig {
    /// Checks every hyperparameter against its documented domain.
    ///
    /// # Returns
    /// An `InvalidConfiguration` error naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.) {
            return Err(OptimErr::InvalidConfiguration {
                field: "learning_rate",
                value: self.learning_rate,
                domain: "(0, inf)",
            });
        }

        if !(self.weight_decay >= 0.) {
            return Err(OptimErr::InvalidConfiguration {
                field: "weight_decay",
                value: self.weight_decay,
                domain: "[0, inf)",
            });
        }

        if !(self.sgd_to_adam_factor > 0. && self.sgd_to_adam_factor <= 1.) {
            return Err(OptimErr::InvalidConfiguration {
                field: "sgd_to_adam_factor",
                value: self.sgd_to_adam_factor,
                domain: "(0, 1]",
            });
        }

        if !(self.beta1 >= 0. && self.beta1 < 1.) {
            return Err(OptimErr::InvalidConfiguration {
                field: "beta1",
                value: self.beta1,
                domain: "[0, 1)",
            });
        }

        if !(self.beta2 >= 0. && self.beta2 < 1.) {
            return Err(OptimErr::InvalidConfiguration {
                field: "beta2",
                value: self.beta2,
                domain: "[0, 1)",
            });
        }

        if !(self.epsilon > 0.) {
            return Err(OptimErr::InvalidConfiguration {
                field: "epsilon",
                value: self.epsilon,
                domain: "(0, inf)",
            });
        }

        Ok(())
    }
}
