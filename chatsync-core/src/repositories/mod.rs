// src/repositories/mod.rs

pub mod file;
pub mod memory;

pub use chatsync_common::traits::KeyValueStore;
pub use file::FileStore;
pub use memory::MemoryStore;
