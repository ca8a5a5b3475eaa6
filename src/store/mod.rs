pub mod memory;
pub mod rocks;
pub mod variant;

pub use memory::MemoryStore;
pub use rocks::RocksStore;
pub use variant::RecordStoreVariant;
