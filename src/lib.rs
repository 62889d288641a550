//! Radarloop: Weather-Radar Frame Acquisition & Sequencing
//!
//! Fetches time-stamped weather-radar raster frames (observed history plus a
//! short-horizon forecast tail), deduplicates and prioritizes the downloads,
//! keeps a persistent on-disk cache, and maintains an ordered loaded sequence
//! that a renderer can scrub and animate.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod logging;
pub mod pipeline;
pub mod timegrid;
