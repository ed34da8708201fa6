pub mod convergence;
pub mod errors;
pub mod evaluation;
pub mod filter;
pub mod history;
pub mod integrator;
pub mod posterior;
pub mod prior;
pub mod proposal;
pub mod registry;
pub mod surrogate;

pub use errors::{MarginalError, MarginalResult};
