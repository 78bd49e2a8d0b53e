//! Bootstrap orchestration: the init/unseal state machine and the steps
//! that follow it (session, KV engine, AppRole).

mod backoff;
mod driver;
mod lock;
mod provision;
mod session;


pub use driver::{BootstrapPhase, BootstrapReport, Bootstrapper, Collaborators};
pub use provision::EngineOutcome;
