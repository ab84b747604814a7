mod adapter;
mod fs;
mod memory;
mod throttle;

pub use adapter::{Adapter, AdapterError};
pub use fs::FsAdapter;
pub use memory::MemoryAdapter;
pub use throttle::ThrottledSaves;
