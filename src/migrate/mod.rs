pub mod duplicates;
pub mod orchestrator;
pub mod transform;


pub use orchestrator::{Orchestrator, RunReport};
