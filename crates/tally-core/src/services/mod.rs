//! Service facades shared by clients

mod records;

pub use records::{FlushReport, RecordService};
