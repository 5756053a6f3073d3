use ndarray::ArrayD;

use crate::config::BlendConfig;

/// The blended momentum/adaptive update rule.
///
/// Every step mixes a bias-corrected momentum step with an Adam-style adaptive
/// step. The momentum share starts at 100% and decays geometrically with the
/// global step, so the adaptive term only fades in once the second moment
/// estimate has gathered enough history to be trusted.
///
/// The rule itself is stateless: the caller owns the parameter together with
/// its `m`/`v` accumulators and hands them in on every call. `ParameterStore`
/// does exactly that for registered parameters.
#[derive(Debug, Clone, Copy)]
pub struct BlendAdam {
    config: BlendConfig,
}

impl BlendAdam {
    /// Creates a new `BlendAdam` rule over an already validated configuration.
    ///
    /// # Arguments
    /// * `config` - The hyperparameters driving the update.
    pub fn new(config: BlendConfig) -> Self {
        Self { config }
    }

    /// The share of the update taken by the plain momentum step at the given
    /// 0-indexed global step.
    pub fn sgd_ratio(&self, step_index: u64) -> f32 {
        self.config.sgd_to_adam_factor.powf(step_index as f32)
    }

    /// Applies one update in place.
    ///
    /// `step_index` is the 0-indexed global step the batch is running under;
    /// bias correction uses the 1-indexed step `step_index + 1` while the
    /// momentum share uses `step_index` itself, so the very first update is
    /// pure momentum. All four tensors must share one shape, the caller
    /// guarantees it.
    ///
    /// # Arguments
    /// * `step_index` - The 0-indexed global step counter value.
    /// * `learning_rate` - The current, possibly externally scheduled, rate.
    /// * `param` - The parameter tensor, updated in place.
    /// * `grad` - The gradient for this parameter.
    /// * `m` - The first moment accumulator, updated in place.
    /// * `v` - The second moment accumulator, updated in place.
    pub fn update(
        &self,
        step_index: u64,
        learning_rate: f32,
        param: &mut ArrayD<f32>,
        grad: &ArrayD<f32>,
        m: &mut ArrayD<f32>,
        v: &mut ArrayD<f32>,
    ) {
        let BlendConfig {
            learning_rate: initial_lr,
            weight_decay,
            beta1,
            beta2,
            epsilon,
            use_belief,
            weight_decay_reduce,
            ..
        } = self.config;

        let lr = learning_rate;
        let t = step_index + 1;
        let bias1 = 1. - beta1.powf(t as f32);
        let bias2 = 1. - beta2.powf(t as f32);
        let sgd_ratio = self.sgd_ratio(step_index);

        let decay = if weight_decay_reduce {
            weight_decay * (lr / initial_lr)
        } else {
            weight_decay
        };

        param
            .iter_mut()
            .zip(grad.iter())
            .zip(m.iter_mut())
            .zip(v.iter_mut())
            .for_each(|(((p, &g), m), v)| {
                *m = beta1 * *m + (1. - beta1) * g;
                let m_hat = *m / bias1;

                // The belief estimate centers the gradient on the freshly
                // updated momentum, not the bias-corrected one.
                let centered = if use_belief { g - *m } else { g };
                *v = beta2 * *v + (1. - beta2) * centered * centered + epsilon;
                let v_hat = (*v / bias2).sqrt();

                let momentum_step = m_hat * sgd_ratio;
                let adaptive_step = m_hat / (v_hat.sqrt() + epsilon) * (1. - sgd_ratio);

                let step = if weight_decay_reduce {
                    (momentum_step + adaptive_step) * lr + decay * *p
                } else {
                    (momentum_step + adaptive_step + decay * *p) * lr
                };

                *p -= step;
            });
    }
}
