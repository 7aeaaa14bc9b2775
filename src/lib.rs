//! xdna-upscale library
//!
//! Single-tile streaming pipelines for row-windowed image convolution and
//! up-scaling on AMD XDNA NPUs: object FIFOs, the sliding-window worker,
//! and the host runtime that drives them.

pub mod config;
pub mod fifo;
pub mod host;
pub mod kernel;
pub mod pipeline;
pub mod scheduler;
pub mod window;
