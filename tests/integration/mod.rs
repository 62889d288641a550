//! Integration tests for the radar frame pipeline

mod cache_store;
mod fetch_client;
mod pipeline_rounds;
mod test_utils;
