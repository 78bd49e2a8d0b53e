mod approle;
mod setup;
mod status;

pub use approle::run_approle;
pub use setup::run_setup;
pub use status::run_status;
