//! Utilities

mod time;

pub use time::{format_datetime, parse_datetime};
