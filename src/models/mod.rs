pub mod agents;
pub mod artifact;
pub mod billing;
pub mod credits;
pub mod error;
pub mod runs;
pub mod users;
