//! Write-ahead log: framed records, segment writer, and replay.
//!
//! Every mutation is appended here before any state change becomes
//! visible. Records are framed as
//! `magic | version | length | payload | crc32` so partial writes and
//! bit rot are detectable on the way back in.

mod manager;
mod record;
mod replay;

pub use manager::WalManager;
pub use record::{compute_crc32, encode_record, LoggedOperation, Operation};
pub use replay::WalReplay;
