// Shared domain types, used by the engine layer and the coordinator.
// Neither layer depends on the other; both import from this module.

pub mod batch;
pub mod item;

pub use batch::*;
pub use item::*;
