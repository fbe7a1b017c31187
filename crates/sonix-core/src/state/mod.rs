//! State machine module.

mod handlers;
pub mod machine;

pub use machine::{CancelToken, UpdateSession, UpdateState, run_update};
