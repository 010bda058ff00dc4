//! Content-addressed store of immutable image layers.

mod layer;
mod store;

pub use layer::{compute_layer_id, LayerId, LayerMetadata};
pub use store::Graph;
