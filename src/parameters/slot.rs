use ndarray::ArrayD;
use parking_lot::Mutex;

use crate::{OptimErr, Result, optimization::BlendAdam};

/// The tensors of one registered parameter.
#[derive(Debug)]
pub(crate) struct SlotState {
    pub(crate) param: ArrayD<f32>,
    pub(crate) m: ArrayD<f32>,
    pub(crate) v: ArrayD<f32>,
}

/// Storage for one parameter and its two moment accumulators.
///
/// All three tensors live behind a single lock so concurrent updates to the
/// same parameter serialize, while different parameters stay independent.
#[derive(Debug)]
pub(crate) struct ParameterSlot {
    shape: Vec<usize>,
    state: Mutex<SlotState>,
}

impl ParameterSlot {
    /// Creates a new `ParameterSlot`.
    ///
    /// # Arguments
    /// * `param` - The initial value of the parameter; `m` and `v` start as
    ///   zero tensors of the same shape.
    pub(crate) fn new(param: ArrayD<f32>) -> Self {
        let m = ArrayD::zeros(param.raw_dim());
        let v = ArrayD::zeros(param.raw_dim());

        Self {
            shape: param.shape().to_vec(),
            state: Mutex::new(SlotState { param, m, v }),
        }
    }

    /// Returns the shape shared by the parameter and its accumulators.
    pub(crate) fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Checks that `tensor` matches this slot's shape.
    pub(crate) fn check_shape(&self, tensor: &ArrayD<f32>) -> Result<()> {
        if tensor.shape() != self.shape {
            return Err(OptimErr::ShapeMismatch {
                expected: self.shape.clone(),
                got: tensor.shape().to_vec(),
            });
        }

        Ok(())
    }

    /// Applies one optimizer update to this slot.
    ///
    /// The shape guard runs before the lock is taken, so a rejected call
    /// leaves the parameter and both accumulators untouched.
    ///
    /// # Arguments
    /// * `rule` - The update rule.
    /// * `step_index` - The 0-indexed global step counter value.
    /// * `learning_rate` - The current learning rate.
    /// * `grad` - The gradient, must match this slot's shape.
    pub(crate) fn update(
        &self,
        rule: &BlendAdam,
        step_index: u64,
        learning_rate: f32,
        grad: &ArrayD<f32>,
    ) -> Result<()> {
        self.check_shape(grad)?;

        let mut state = self.state.lock();
        let SlotState { param, m, v } = &mut *state;
        rule.update(step_index, learning_rate, param, grad, m, v);

        Ok(())
    }

    /// Returns a copy of the parameter's current value.
    pub(crate) fn param(&self) -> ArrayD<f32> {
        self.state.lock().param.clone()
    }

    /// Copies the parameter's current value into `out`.
    ///
    /// # Returns
    /// A `ShapeMismatch` error if `out` doesn't match this slot's shape.
    pub(crate) fn pull_param(&self, out: &mut ArrayD<f32>) -> Result<()> {
        self.check_shape(out)?;
        out.assign(&self.state.lock().param);

        Ok(())
    }

    /// Overwrites the parameter's value. The caller validates the shape first.
    pub(crate) fn restore_param(&self, param: ArrayD<f32>) {
        self.state.lock().param = param;
    }

    /// Returns copies of the `(m, v)` accumulators.
    pub(crate) fn moments(&self) -> (ArrayD<f32>, ArrayD<f32>) {
        let state = self.state.lock();
        (state.m.clone(), state.v.clone())
    }

    /// Overwrites both accumulators. The caller validates the shapes first.
    pub(crate) fn restore_moments(&self, m: ArrayD<f32>, v: ArrayD<f32>) {
        let mut state = self.state.lock();
        state.m = m;
        state.v = v;
    }
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;
    use crate::BlendConfig;

    fn tensor(shape: &[usize], value: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(shape), value)
    }

    #[test]
    fn test_slot_zeroes_accumulators() {
        let slot = ParameterSlot::new(tensor(&[2, 3], 1.5));

        let (m, v) = slot.moments();
        assert_eq!(m, tensor(&[2, 3], 0.));
        assert_eq!(v, tensor(&[2, 3], 0.));
        assert_eq!(slot.shape(), &[2, 3]);
    }

    #[test]
    fn test_rejected_gradient_leaves_slot_untouched() {
        let rule = BlendAdam::new(BlendConfig::default());
        let slot = ParameterSlot::new(tensor(&[2, 2], 1.));

        let err = slot.update(&rule, 0, 1e-3, &tensor(&[3], 1.)).unwrap_err();

        assert!(matches!(
            err,
            OptimErr::ShapeMismatch { expected, got } if expected == [2, 2] && got == [3]
        ));
        assert_eq!(slot.param(), tensor(&[2, 2], 1.));
        assert_eq!(slot.moments().0, tensor(&[2, 2], 0.));
    }

    #[test]
    fn test_pull_param_checks_shape() {
        let slot = ParameterSlot::new(tensor(&[4], 2.));

        let mut out = tensor(&[4], 0.);
        slot.pull_param(&mut out).unwrap();
        assert_eq!(out, tensor(&[4], 2.));

        let mut wrong = tensor(&[5], 0.);
        assert!(slot.pull_param(&mut wrong).is_err());
    }
}
