mod binary;
mod exact;
mod unique;

pub use binary::{BinaryIndex, IndexRange};
pub use exact::ExactIndex;
pub use unique::UniqueIndex;
