pub mod memory;

pub use memory::{MemoryProvider, ProviderEvent};
