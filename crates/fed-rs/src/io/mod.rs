//! On-disk formats.

pub mod state_archive;

pub use state_archive::{StateArchive, StateArchiveEntry, StateArchiveReader};
