mod correlative;
mod correlative_store;
mod errors;
mod order_metadata;

pub use correlative::{normalize_value, Correlative, CorrelativeState, Origin};
pub use correlative_store::{CorrelativeStore, InMemoryCorrelativeStore};
pub use errors::CorrelativeError;
pub use order_metadata::OrderMetadata;
