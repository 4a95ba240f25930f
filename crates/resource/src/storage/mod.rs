//! Storage layer for participant data

mod files;
mod shadow;
mod table;

pub use files::ParticipantFiles;
pub use shadow::ShadowTable;
pub use table::Table;
