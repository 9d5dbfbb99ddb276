//! eventgate - role-based route guards for the event dashboard
//!
//! Session state, the role predicate, route and query-parameter guards, and
//! the security event log for denied attempts. The HTTP service and CLI in
//! `main.rs` are thin layers over these modules.

pub mod audit;
pub mod errors;
pub mod guard;
pub mod session;
pub mod settings;
pub mod web;
