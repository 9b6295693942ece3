pub mod filter;
pub mod records;

pub use filter::RecordFilter;
pub use records::{RecordStore, SNAPSHOT_FILE};
