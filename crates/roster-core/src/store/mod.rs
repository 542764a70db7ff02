//! Repository implementations behind the persistence ports.

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileGroupRepository;
pub use memory::{InMemoryGroupRepository, InMemoryIdentifierAudit};
