// Test entry point for sync engine tests
// All sync-related integration tests organized here

mod common;
mod download_tests;
mod scheduler_tests;
