#![allow(dead_code)]

pub mod fixtures;
pub mod mock_loki;

pub use fixtures::{app_labels, fast_builder, started_http, started_with};
pub use mock_loki::{Behaviour, CapturedRequest, MockLoki};
