pub mod storage_traits;

pub use storage_traits::KeyValueStore;
