//! Integration tests for complot-crawler

mod common;
mod crawl_tests;
mod resume_tests;
mod worker_tests;
