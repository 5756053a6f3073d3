use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire optimizer crate.
pub type Result<T> = std::result::Result<T, OptimErr>;

/// The optimizer crate's error type.
#[derive(Debug)]
pub enum OptimErr {
    InvalidConfiguration {
        field: &'static str,
        value: f32,
        domain: &'static str,
    },
    UnregisteredParameter {
        handle: usize,
        registered: usize,
    },
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    StateSizeMismatch {
        expected: usize,
        got: usize,
    },
}

impl Display for OptimErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimErr::InvalidConfiguration {
                field,
                value,
                domain,
            } => {
                format!("The hyperparameter {field} is {value}, outside its domain {domain}")
            }
            OptimErr::UnregisteredParameter { handle, registered } => format!(
                "The handle {handle} doesn't belong to this store, it only has {registered} registered parameters"
            ),
            OptimErr::ShapeMismatch { expected, got } => format!(
                "There's a shape mismatch between the parameter and the provided tensor, got {got:?} and expected {expected:?}"
            ),
            OptimErr::StateSizeMismatch { expected, got } => format!(
                "The state payload has {got} entries where the store expects {expected}"
            ),
        };

        write!(f, "{s}")
    }
}

impl Error for OptimErr {}
