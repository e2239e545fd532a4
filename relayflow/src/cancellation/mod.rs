//! Cooperative cancellation for sessions.

mod token;

pub use token::{Cancellation, CancellationToken};
