//! Month-bucketed sweeping of a directory tree: discovery, grouping, dispatch
//! and the two terminal sinks.

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod grouper;
pub mod lock;
pub mod month;
pub mod progress;
pub mod relocate;
pub mod runner;
pub mod sink;
pub mod walker;

#[cfg(test)]
mod test_support;
