//! Dispatcher Integration Tests
//!
//! End-to-end flows through `ActionDispatcher` over the in-memory store.

pub mod campaign_linkage_test;
pub mod execution_creation_test;
pub mod job_lifecycle_test;
pub mod listing_test;
pub mod saved_search_test;
