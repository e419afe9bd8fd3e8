//! Git smart-HTTP gateway server: configuration, logging, metrics and the
//! HTTP listener around the `git-http` router.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics_exporter;
pub mod state;
pub mod supervisor;
