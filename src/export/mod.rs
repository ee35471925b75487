//! Run reports

pub mod json;

pub use json::{write_process_info, ProcessInfo, PROCESS_INFO_FILE};
