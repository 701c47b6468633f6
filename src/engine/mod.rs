//! Load engine: ramp-up admission, virtual-user workers, weighted scenario
//! selection, scenario execution and run orchestration.

pub mod executor;
pub mod ramp;
pub mod run;
pub mod selector;
pub mod signals;
pub mod worker;
