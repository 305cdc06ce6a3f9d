pub mod accumulator;
pub mod api;
pub mod config;
pub mod contracts;
pub mod flusher;
pub mod metrics;
pub mod storage;
