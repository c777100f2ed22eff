pub mod orchestrator;
pub mod state;

pub use orchestrator::*;
pub use state::*;
