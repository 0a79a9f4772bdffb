#![allow(clippy::unwrap_used, clippy::expect_used)]

mod bulk_load_test;
mod health_test;
mod observability_test;
mod pipeline_test;
mod reload_test;
