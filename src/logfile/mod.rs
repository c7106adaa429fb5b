mod reader;
mod sequencer;

pub use reader::LogReader;
pub use sequencer::{first_log_file, next_log_file};
