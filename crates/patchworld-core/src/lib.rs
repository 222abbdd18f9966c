//! Lazily materialized, patch-sharded 2D world with Gibbs-sampled items.
//!
//! The world is an infinite integer grid cut into `n × n` patches. Patches do
//! not exist until a caller asks for the fixed neighborhood of a world
//! position; at that point the four covering patches and their surroundings
//! are jointly resampled as a conditional Markov random field against
//! everything already committed, then frozen. Item statistics therefore look
//! the same across tile seams as within a tile.
//!
//! The map owns its RNG and serializes together with it, so a snapshot
//! resumes the exact world, draw for draw.

mod field;
mod map;
mod patch;
mod position;
mod rng;
mod snapshot;

pub use field::ItemType;
pub use map::{FixedNeighborhood, Map, MapConfig, MapError, Neighborhood};
pub use patch::{Item, Patch, PatchStore};
pub use position::{Position, world_to_patch, world_to_patch_offset};
pub use rng::Lcg64;
pub use snapshot::{
    DefaultScribe, PatchData, SNAPSHOT_FORMAT_VERSION, SNAPSHOT_MAGIC, Scribe, SnapshotError,
};
