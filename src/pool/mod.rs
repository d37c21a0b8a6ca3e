mod coordinator;
mod reorder;
mod state;

pub use coordinator::{ChunkHook, PoolCoordinator, predict};
pub use state::RunState;

use reorder::ReorderBuffer;
