//! Competitive-programming judge: pulls submissions and hacks off a lease
//! queue, compiles and runs them in sandboxed containers, grades the output
//! with the problem's checker and stores the verdicts.

pub mod assets;
pub mod config;
pub mod context;
pub mod error;
pub mod hack;
pub mod lang;
pub mod lease;
pub mod status;
pub mod store;
pub mod submission;
pub mod testcase;
pub mod toolchain;
pub mod verdict;
pub mod worker;

#[cfg(test)]
mod testing;
