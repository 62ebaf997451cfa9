//! Request extractors.

mod process;
pub use process::{ProcessId, PROCESS_ID_HEADER};
