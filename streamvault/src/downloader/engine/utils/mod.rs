//! Utilities shared by downloader implementations.

mod output_record_reader;
mod process_runner;

pub use output_record_reader::OutputRecordReader;
pub use process_runner::spawn_process_waiter;
