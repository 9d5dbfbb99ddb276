#![allow(dead_code, unused_imports)]

pub mod builders;

pub use builders::{PolicyDir, SessionBuilder, DASHBOARD_POLICY};
