use serde::{Deserialize, Serialize};

/// The identity of a registered parameter.
///
/// Handles are assigned sequentially at registration and are only meaningful
/// to the `ParameterStore` that produced them. They double as the position of
/// the parameter in every order-preserving sequence the store exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterHandle(pub(crate) usize);

impl ParameterHandle {
    /// Returns the registration index of this handle.
    pub fn index(&self) -> usize {
        self.0
    }
}
