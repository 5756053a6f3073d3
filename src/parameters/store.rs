use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use log::debug;
use ndarray::ArrayD;
use rayon::prelude::*;

use crate::{
    BlendConfig, OptimErr, Result,
    checkpoint::OptimizerState,
    optimization::BlendAdam,
    parameters::{ParameterHandle, ParameterSlot},
};

/// The primary storage of registered parameters and their optimizer state.
///
/// One slot per parameter holds the parameter tensor and its `m`/`v`
/// accumulators behind a per-slot lock. The global step counter and the
/// current learning rate are atomics, so the whole update surface works
/// through `&self` and a batch can fan out across threads.
#[derive(Debug)]
pub struct ParameterStore {
    config: BlendConfig,
    rule: BlendAdam,
    global_step: AtomicU64,
    learning_rate: AtomicU32,
    slots: Vec<ParameterSlot>,
}

impl ParameterStore {
    /// Creates a new `ParameterStore`.
    ///
    /// # Arguments
    /// * `config` - The optimizer hyperparameters.
    ///
    /// # Returns
    /// An `InvalidConfiguration` error if any hyperparameter is outside its
    /// domain; no store is produced in that case.
    pub fn new(config: BlendConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            rule: BlendAdam::new(config),
            global_step: AtomicU64::new(0),
            learning_rate: AtomicU32::new(config.learning_rate.to_bits()),
            slots: Vec::new(),
        })
    }

    /// Registers a parameter, allocating zeroed `m`/`v` accumulators shaped
    /// like its initial value.
    ///
    /// Every call allocates one fresh slot and returns its handle; parameter
    /// identity is the handle itself, so a slot can never be double-allocated
    /// behind an existing handle.
    ///
    /// # Arguments
    /// * `init` - The initial value of the parameter.
    ///
    /// # Returns
    /// The handle identifying the parameter from here on.
    pub fn register(&mut self, init: ArrayD<f32>) -> ParameterHandle {
        let handle = ParameterHandle(self.slots.len());

        debug!(handle = handle.0, elements = init.len(); "registered parameter");
        self.slots.push(ParameterSlot::new(init));

        handle
    }

    /// Registers a whole set of parameters at once.
    ///
    /// # Arguments
    /// * `inits` - The initial parameter values, registered in order.
    ///
    /// # Returns
    /// One handle per parameter, in the same order.
    pub fn register_all<I>(&mut self, inits: I) -> Vec<ParameterHandle>
    where
        I: IntoIterator<Item = ArrayD<f32>>,
    {
        inits.into_iter().map(|init| self.register(init)).collect()
    }

    /// Returns the hyperparameters this store was built with.
    pub fn config(&self) -> &BlendConfig {
        &self.config
    }

    /// Returns the number of registered parameters.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no parameter has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the current global step counter value.
    pub fn global_step(&self) -> u64 {
        self.global_step.load(Ordering::Acquire)
    }

    /// Increments the global step counter.
    ///
    /// Called exactly once per optimization step, after every parameter of
    /// the step has been updated. `step` does this on the caller's behalf.
    pub fn advance_step(&self) {
        self.global_step.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the current learning rate.
    pub fn learning_rate(&self) -> f32 {
        f32::from_bits(self.learning_rate.load(Ordering::Acquire))
    }

    /// Overwrites the current learning rate.
    ///
    /// The knob an external schedule turns between steps; the initial value
    /// from the configuration stays fixed as the reference for coupled decay.
    pub fn set_learning_rate(&self, learning_rate: f32) {
        self.learning_rate
            .store(learning_rate.to_bits(), Ordering::Release);
    }

    /// Applies one optimizer update to a single parameter.
    ///
    /// Must be called at most once per parameter per global step; the step
    /// counter itself only moves through `advance_step`.
    ///
    /// # Arguments
    /// * `handle` - The parameter's registration handle.
    /// * `grad` - The gradient, must match the parameter's shape.
    ///
    /// # Returns
    /// An `UnregisteredParameter` or `ShapeMismatch` error; either leaves
    /// every slot untouched.
    pub fn update(&self, handle: ParameterHandle, grad: &ArrayD<f32>) -> Result<()> {
        let step_index = self.global_step();
        let learning_rate = self.learning_rate();

        self.slot(handle)?
            .update(&self.rule, step_index, learning_rate, grad)
    }

    /// Runs one full optimization step.
    ///
    /// Updates every listed parameter in parallel under the same global step
    /// value, then advances the counter once.
    ///
    /// # Arguments
    /// * `grads` - One `(handle, gradient)` pair per parameter of this step.
    ///
    /// # Returns
    /// An error if any pair names an unknown handle or carries a mismatched
    /// gradient. Every pair is validated before any slot is touched, so a
    /// rejected batch leaves the store unchanged and can be retried with
    /// corrected inputs. The step counter does not advance on error.
    pub fn step(&self, grads: &[(ParameterHandle, ArrayD<f32>)]) -> Result<()> {
        for (handle, grad) in grads {
            self.slot(*handle)?.check_shape(grad)?;
        }

        grads
            .par_iter()
            .try_for_each(|(handle, grad)| self.update(*handle, grad))?;

        self.advance_step();

        Ok(())
    }

    /// Returns a copy of a parameter's current value.
    pub fn params(&self, handle: ParameterHandle) -> Result<ArrayD<f32>> {
        Ok(self.slot(handle)?.param())
    }

    /// Copies a parameter's current value into `out`.
    ///
    /// # Arguments
    /// * `handle` - The parameter's registration handle.
    /// * `out` - A tensor of the parameter's shape receiving the value.
    pub fn pull_params(&self, handle: ParameterHandle, out: &mut ArrayD<f32>) -> Result<()> {
        self.slot(handle)?.pull_param(out)
    }

    /// Returns every parameter's current value in registration order.
    pub fn export_params(&self) -> Vec<ArrayD<f32>> {
        self.slots.iter().map(ParameterSlot::param).collect()
    }

    /// Restores every parameter's value from a registration-ordered sequence.
    ///
    /// Validates the count and every shape before anything is written, so a
    /// rejected payload leaves the store unchanged.
    pub fn import_params(&self, params: Vec<ArrayD<f32>>) -> Result<()> {
        if params.len() != self.slots.len() {
            return Err(OptimErr::StateSizeMismatch {
                expected: self.slots.len(),
                got: params.len(),
            });
        }

        for (slot, param) in self.slots.iter().zip(&params) {
            slot.check_shape(param)?;
        }

        for (slot, param) in self.slots.iter().zip(params) {
            slot.restore_param(param);
        }

        Ok(())
    }

    /// Exports the optimizer's own state: the global step plus each
    /// parameter's `(m, v)` pair, in registration order.
    pub fn export_state(&self) -> OptimizerState {
        let mut slots = Vec::with_capacity(2 * self.slots.len());

        for slot in &self.slots {
            let (m, v) = slot.moments();
            slots.push(m);
            slots.push(v);
        }

        OptimizerState {
            global_step: self.global_step(),
            slots,
        }
    }

    /// Restores the optimizer's own state from an exported payload.
    ///
    /// Accepts the canonical `2N` slot tensors, or `2N + 1` from the legacy
    /// layout whose trailing entry is dropped. Count and shapes are validated
    /// before anything is written; a rejected payload leaves the store
    /// unchanged.
    pub fn import_state(&self, state: OptimizerState) -> Result<()> {
        let state = state.reconcile(self.slots.len())?;

        for (slot, pair) in self.slots.iter().zip(state.slots.chunks_exact(2)) {
            slot.check_shape(&pair[0])?;
            slot.check_shape(&pair[1])?;
        }

        for (slot, pair) in self.slots.iter().zip(state.slots.chunks_exact(2)) {
            slot.restore_moments(pair[0].clone(), pair[1].clone());
        }

        self.global_step.store(state.global_step, Ordering::Release);

        Ok(())
    }

    fn slot(&self, handle: ParameterHandle) -> Result<&ParameterSlot> {
        self.slots
            .get(handle.0)
            .ok_or(OptimErr::UnregisteredParameter {
                handle: handle.0,
                registered: self.slots.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;

    fn tensor(shape: &[usize], value: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(shape), value)
    }

    fn create_test_store() -> ParameterStore {
        ParameterStore::new(BlendConfig {
            learning_rate: 0.1,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_configuration_produces_no_store() {
        let config = BlendConfig {
            epsilon: 0.,
            ..Default::default()
        };

        assert!(matches!(
            ParameterStore::new(config),
            Err(OptimErr::InvalidConfiguration { field: "epsilon", .. })
        ));
    }

    #[test]
    fn test_register_assigns_sequential_handles() {
        let mut store = create_test_store();

        let a = store.register(tensor(&[2], 0.));
        let b = store.register(tensor(&[3, 3], 0.));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_unregistered_handle_is_rejected() {
        let mut other = create_test_store();
        other.register(tensor(&[2], 0.));
        let stale = other.register(tensor(&[2], 0.));

        let mut store = create_test_store();
        store.register(tensor(&[2], 0.));

        assert!(matches!(
            store.update(stale, &tensor(&[2], 1.)),
            Err(OptimErr::UnregisteredParameter {
                handle: 1,
                registered: 1,
            })
        ));
    }

    #[test]
    fn test_step_advances_counter_once() {
        let mut store = create_test_store();
        let a = store.register(tensor(&[2], 0.));
        let b = store.register(tensor(&[4], 0.));

        let grads = vec![(a, tensor(&[2], 1.)), (b, tensor(&[4], -1.))];
        store.step(&grads).unwrap();

        assert_eq!(store.global_step(), 1);
    }

    #[test]
    fn test_failed_step_does_not_advance_counter() {
        let mut store = create_test_store();
        let a = store.register(tensor(&[2], 0.));

        let grads = vec![(a, tensor(&[5], 1.))];
        assert!(store.step(&grads).is_err());
        assert_eq!(store.global_step(), 0);
    }

    #[test]
    fn test_failed_step_leaves_every_slot_untouched() {
        let mut store = create_test_store();
        let good = store.register(tensor(&[2], 0.));
        let bad = store.register(tensor(&[2], 0.));

        let grads = vec![(good, tensor(&[2], 1.)), (bad, tensor(&[7], 1.))];
        assert!(store.step(&grads).is_err());

        // The batch is rejected up front, even the well-formed pair must not
        // have been applied.
        assert_eq!(store.params(good).unwrap(), tensor(&[2], 0.));
        assert_eq!(store.params(bad).unwrap(), tensor(&[2], 0.));
    }

    #[test]
    fn test_failed_step_retries_without_double_applying() {
        let mut store = create_test_store();
        let good = store.register(tensor(&[2], 0.));
        let bad = store.register(tensor(&[2], 0.));

        let grads = vec![(good, tensor(&[2], 2.)), (bad, tensor(&[7], 2.))];
        assert!(store.step(&grads).is_err());

        let corrected = vec![(good, tensor(&[2], 2.)), (bad, tensor(&[2], 2.))];
        store.step(&corrected).unwrap();

        // The retried step must apply exactly one update per slot.
        let params = store.params(good).unwrap();
        for &p in params.iter() {
            assert!((p - (-0.1 * 2.)).abs() < 1e-6);
        }
        assert_eq!(store.global_step(), 1);
    }

    #[test]
    fn test_first_step_moves_by_momentum_times_rate() {
        let mut store = create_test_store();
        let handle = store.register(tensor(&[3], 0.));

        store.step(&[(handle, tensor(&[3], 2.))]).unwrap();

        let params = store.params(handle).unwrap();
        for &p in params.iter() {
            assert!((p - (-0.1 * 2.)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_learning_rate_knob() {
        let store = create_test_store();

        assert_eq!(store.learning_rate(), 0.1);
        store.set_learning_rate(0.05);
        assert_eq!(store.learning_rate(), 0.05);
    }

    #[test]
    fn test_import_params_is_all_or_nothing() {
        let mut store = create_test_store();
        let a = store.register(tensor(&[2], 1.));
        store.register(tensor(&[3], 1.));

        // Second entry has the wrong shape, the first must not be applied.
        let payload = vec![tensor(&[2], 9.), tensor(&[4], 9.)];
        assert!(store.import_params(payload).is_err());
        assert_eq!(store.params(a).unwrap(), tensor(&[2], 1.));
    }
}
