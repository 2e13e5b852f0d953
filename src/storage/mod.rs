mod reader;
mod schema;
mod writer;

pub use reader::{RecordingSummary, load_recording, read_summary};
pub use schema::{HEADER, SCHEMA_VERSION};
pub use writer::save_recording;
