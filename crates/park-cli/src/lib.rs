//! park-cli library target.
//!
//! Command logic that does not need a live database, exposed for tests.

pub mod commands;
