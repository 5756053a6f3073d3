mod handle;
mod slot;
mod store;

pub use handle::ParameterHandle;
pub(crate) use slot::ParameterSlot;
pub use store::ParameterStore;
