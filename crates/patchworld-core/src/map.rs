//! The map facade: lazy materialization, the fixing protocol, range queries.

use crate::field::{GibbsField, InteractionCache, ItemType};
use crate::patch::{Item, Patch, PatchStore};
use crate::position::{self, Position};
use crate::rng::{self, Lcg64};
use crate::snapshot::PatchData;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced by map construction and patch materialization.
#[derive(Debug, Error)]
pub enum MapError {
    /// Indicates configuration or catalog values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The patch store could not reserve room for new patches. Existing
    /// patches are untouched.
    #[error("patch storage reservation failed: {0}")]
    Capacity(#[from] TryReserveError),
}

/// Static configuration for a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// Side length of a patch in world cells. At least 2 and even, so a patch
    /// splits into four equal quadrants.
    pub patch_size: u32,
    /// Gibbs sweeps executed per fixing operation.
    pub gibbs_iterations: u32,
    /// Optional RNG seed. Defaults to 0 in debug builds and wall-clock
    /// milliseconds otherwise; supply one to reproduce a world.
    pub rng_seed: Option<u64>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            patch_size: 32,
            gibbs_iterations: 10,
            rng_seed: None,
        }
    }
}

impl MapConfig {
    pub(crate) fn validate(&self) -> Result<(), MapError> {
        if self.patch_size < 2 {
            return Err(MapError::InvalidConfig("patch_size must be at least 2"));
        }
        if self.patch_size % 2 != 0 {
            return Err(MapError::InvalidConfig("patch_size must be even"));
        }
        if self.patch_size > 1 << 16 {
            return Err(MapError::InvalidConfig("patch_size must fit in 16 bits"));
        }
        Ok(())
    }
}

/// The four covering patches of a world position, all fixed.
#[derive(Debug)]
pub struct FixedNeighborhood<'a, D> {
    /// Patches in the order of `positions`.
    pub patches: [&'a Patch<D>; 4],
    /// Patch keys: `positions[1]` is right of `positions[0]`, `positions[2]`
    /// below it, `positions[3]` below-right.
    pub positions: [Position; 4],
    /// Index of the patch containing the queried world position.
    pub index: usize,
}

/// The already-existing covering patches of a world position.
#[derive(Debug)]
pub struct Neighborhood<'a, D> {
    /// Existing covering patches with their keys, at most four.
    pub patches: Vec<(Position, &'a Patch<D>)>,
    /// Index into `patches` of the patch containing the queried world
    /// position, when that patch exists.
    pub index: Option<usize>,
}

/// A lazily materialized infinite world of item-bearing patches.
///
/// Patches spring into existence the first time a fixed neighborhood covers
/// them, get jointly Gibbs-sampled with their neighbors, and never change
/// again once fixed. `D` is the caller's per-patch payload; `T` the item-type
/// catalog entry.
pub struct Map<D, T> {
    store: PatchStore<D>,
    patch_size: u32,
    gibbs_iterations: u32,
    rng: Lcg64,
    types: Vec<T>,
    cache: InteractionCache,
}

impl<D, T> std::fmt::Debug for Map<D, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("patch_size", &self.patch_size)
            .field("gibbs_iterations", &self.gibbs_iterations)
            .field("patch_count", &self.store.len())
            .field("type_count", &self.types.len())
            .finish()
    }
}

impl<D: PatchData, T: ItemType> Map<D, T> {
    /// Builds an empty map over the given item-type catalog.
    pub fn new(config: MapConfig, types: Vec<T>) -> Result<Self, MapError> {
        let rng = Lcg64::seed_from_u64(config.rng_seed.unwrap_or_else(rng::default_seed));
        Self::from_parts(
            config.patch_size,
            config.gibbs_iterations,
            rng,
            PatchStore::new(),
            types,
        )
    }

    pub(crate) fn from_parts(
        patch_size: u32,
        gibbs_iterations: u32,
        rng: Lcg64,
        store: PatchStore<D>,
        types: Vec<T>,
    ) -> Result<Self, MapError> {
        let config = MapConfig {
            patch_size,
            gibbs_iterations,
            rng_seed: None,
        };
        config.validate()?;
        let cache = InteractionCache::build(&types, patch_size)?;
        Ok(Self {
            store,
            patch_size,
            gibbs_iterations,
            rng,
            types,
            cache,
        })
    }

    /// Reseeds the RNG. Existing patches keep their contents; only future
    /// sampling is affected.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = Lcg64::seed_from_u64(seed);
    }

    /// Side length of a patch in world cells.
    #[must_use]
    pub const fn patch_size(&self) -> u32 {
        self.patch_size
    }

    /// Gibbs sweeps executed per fixing operation.
    #[must_use]
    pub const fn gibbs_iterations(&self) -> u32 {
        self.gibbs_iterations
    }

    /// The item-type catalog the map was built over.
    #[must_use]
    pub fn item_types(&self) -> &[T] {
        &self.types
    }

    /// Number of materialized patches, fixed or not.
    #[must_use]
    pub fn patch_count(&self) -> usize {
        self.store.len()
    }

    /// Iterate over all materialized patches in unspecified order.
    pub fn patches(&self) -> impl Iterator<Item = (Position, &Patch<D>)> {
        self.store.iter()
    }

    /// Raw RNG state, for snapshots and determinism checks.
    #[must_use]
    pub fn rng_state(&self) -> u64 {
        self.rng.state()
    }

    /// Read-only view of the backing patch store.
    #[must_use]
    pub fn store(&self) -> &PatchStore<D> {
        &self.store
    }

    /// The patch at `patch_position`, if it has been materialized.
    #[must_use]
    pub fn patch_if_exists(&self, patch_position: Position) -> Option<&Patch<D>> {
        self.store.get(patch_position)
    }

    /// The patch at `patch_position`.
    ///
    /// # Panics
    ///
    /// Panics when no patch exists there; prefer [`Map::patch_if_exists`]
    /// unless materialization is already guaranteed.
    #[must_use]
    pub fn existing_patch(&self, patch_position: Position) -> &Patch<D> {
        match self.store.get(patch_position) {
            Some(patch) => patch,
            None => {
                warn!(%patch_position, "requested patch does not exist");
                panic!("no patch at {patch_position}");
            }
        }
    }

    /// Mutable access to a patch's payload, available only while the patch is
    /// unfixed. Fixed patches are frozen, payload included.
    pub fn patch_data_mut(&mut self, patch_position: Position) -> Option<&mut D> {
        self.store
            .get_mut(patch_position)
            .filter(|patch| !patch.is_fixed())
            .map(|patch| &mut patch.data)
    }

    /// The four patches covering the `patch_size × patch_size` box centered at
    /// `world`, creating and fixing them as needed. After this returns, every
    /// returned patch has been jointly sampled with all eight of its
    /// neighbors, so item statistics do not distort at tile seams.
    ///
    /// This is the only path by which patches become fixed.
    pub fn get_fixed_neighborhood(
        &mut self,
        world: Position,
    ) -> Result<FixedNeighborhood<'_, D>, MapError> {
        let (positions, index) = self.neighborhood_positions(world);

        // The 3x3 unions of a 2x2 input block cover at most 16 patches.
        self.store.try_reserve(16)?;
        for &patch_position in &positions {
            self.store.get_or_insert(patch_position);
        }
        self.fix_patches(positions);

        let patches = positions.map(|patch_position| self.existing_patch(patch_position));
        Ok(FixedNeighborhood {
            patches,
            positions,
            index,
        })
    }

    /// Read-only variant of [`Map::get_fixed_neighborhood`]: returns only the
    /// covering patches that already exist and neither creates nor fixes
    /// anything.
    #[must_use]
    pub fn get_neighborhood(&self, world: Position) -> Neighborhood<'_, D> {
        let (positions, containing) = self.neighborhood_positions(world);
        let mut patches = Vec::with_capacity(4);
        let mut index = None;
        for (slot, &patch_position) in positions.iter().enumerate() {
            if let Some(patch) = self.store.get(patch_position) {
                if slot == containing {
                    index = Some(patches.len());
                }
                patches.push((patch_position, patch));
            }
        }
        Neighborhood { patches, index }
    }

    /// Visits every existing patch whose key lies in the patch rectangle
    /// covering the inclusive world rectangle `[bottom_left, top_right]`,
    /// x-major then y. Stops early and returns false when `visit` does.
    /// Never creates or fixes patches.
    pub fn visit_patches<F>(&self, bottom_left: Position, top_right: Position, mut visit: F) -> bool
    where
        F: FnMut(&Patch<D>, Position) -> bool,
    {
        let low = position::world_to_patch(bottom_left, self.patch_size);
        let high = position::world_to_patch(top_right, self.patch_size);
        for x in low.x..=high.x {
            for y in low.y..=high.y {
                let patch_position = Position::new(x, y);
                if let Some(patch) = self.store.get(patch_position) {
                    if !visit(patch, patch_position) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Appends to `out` every item of an existing patch whose location lies in
    /// the inclusive world rectangle, in patch-major then insertion order.
    pub fn collect_items(&self, bottom_left: Position, top_right: Position, out: &mut Vec<Item>) {
        self.visit_patches(bottom_left, top_right, |patch, _| {
            for item in patch.items() {
                if item.location.x >= bottom_left.x
                    && item.location.x <= top_right.x
                    && item.location.y >= bottom_left.y
                    && item.location.y <= top_right.y
                {
                    out.push(*item);
                }
            }
            true
        });
    }

    /// Keys of the four covering patches in the fixed row layout, plus the
    /// slot holding `world`'s own patch. Which quadrant of its patch `world`
    /// falls in decides the block, so the covering box is always centered on
    /// the position to within half a patch.
    fn neighborhood_positions(&self, world: Position) -> ([Position; 4], usize) {
        let (patch_position, offset) = position::world_to_patch_offset(world, self.patch_size);
        let half = i64::from(self.patch_size / 2);
        let (base, index) = if offset.x < half {
            if offset.y < half {
                (patch_position.left(), 1)
            } else {
                (patch_position.left().up(), 3)
            }
        } else if offset.y < half {
            (patch_position, 0)
        } else {
            (patch_position.up(), 2)
        };
        (
            [base, base.right(), base.down(), base.down().right()],
            index,
        )
    }

    /// Fixes the input patches: gathers the 3x3 neighborhoods of the unfixed
    /// ones, materializes every member, jointly resamples all that are not
    /// already fixed, then marks the inputs fixed. Neighbors outside the input
    /// set stay unfixed and may be resampled again before their own fixing.
    ///
    /// Requires store capacity for the full union (reserved by the caller).
    fn fix_patches(&mut self, inputs: [Position; 4]) {
        let mut to_sample: Vec<Position> = Vec::with_capacity(36);
        for &patch_position in &inputs {
            if self
                .store
                .get(patch_position)
                .is_some_and(Patch::is_fixed)
            {
                continue;
            }
            to_sample.extend([
                patch_position.up().left(),
                patch_position.up(),
                patch_position.up().right(),
                patch_position.left(),
                patch_position,
                patch_position.right(),
                patch_position.down().left(),
                patch_position.down(),
                patch_position.down().right(),
            ]);
        }
        to_sample.sort_unstable();
        to_sample.dedup();
        to_sample.retain(|&patch_position| !self.store.get_or_insert(patch_position).is_fixed());

        if !to_sample.is_empty() {
            debug!(
                targets = to_sample.len(),
                sweeps = self.gibbs_iterations,
                "sampling unfixed patches"
            );
            let mut field =
                GibbsField::new(&mut self.store, &self.cache, self.patch_size, &to_sample);
            let mut weights = Vec::new();
            for _ in 0..self.gibbs_iterations {
                field.sweep(&mut self.rng, &mut weights);
            }
            field.commit(&mut self.store);
        }

        for &patch_position in &inputs {
            if let Some(patch) = self.store.get_mut(patch_position) {
                patch.set_fixed();
            }
        }
    }
}
