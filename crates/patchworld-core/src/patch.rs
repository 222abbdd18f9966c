//! Items, patches, and the position-keyed patch store.

use crate::position::Position;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::TryReserveError;

/// A typed occurrence at a world cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Index into the map's item-type catalog.
    pub item_type: u32,
    /// World coordinates of the cell the item occupies.
    pub location: Position,
    /// Tick the item appeared; 0 means it has always existed.
    pub creation_time: u64,
    /// Tick the item was removed; 0 means it was never deleted.
    pub deletion_time: u64,
}

impl Item {
    /// An item present since the world began, as the sampler places them.
    #[must_use]
    pub const fn initial(item_type: u32, location: Position) -> Self {
        Self {
            item_type,
            location,
            creation_time: 0,
            deletion_time: 0,
        }
    }
}

/// One tile of the world: its items, fix flag, and the caller's payload.
///
/// An unfixed patch may still be rewritten by later sampling; once fixed it is
/// frozen and only the map's destruction releases it.
#[derive(Debug, Clone)]
pub struct Patch<D> {
    items: Vec<Item>,
    fixed: bool,
    /// Caller payload. Readable at any time; mutable through
    /// [`crate::Map::patch_data_mut`] only while the patch is unfixed.
    pub data: D,
}

impl<D: Default> Patch<D> {
    pub(crate) fn empty() -> Self {
        Self {
            items: Vec::with_capacity(8),
            fixed: false,
            data: D::default(),
        }
    }
}

impl<D> Patch<D> {
    pub(crate) fn from_parts(items: Vec<Item>, fixed: bool, data: D) -> Self {
        Self { items, fixed, data }
    }

    /// Items in insertion order.
    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Whether the patch has been committed and can no longer be resampled.
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub(crate) fn set_fixed(&mut self) {
        self.fixed = true;
    }

    pub(crate) fn take_items(&mut self) -> Vec<Item> {
        std::mem::take(&mut self.items)
    }

    pub(crate) fn restore_items(&mut self, items: Vec<Item>) {
        self.items = items;
    }
}

/// Hash map from patch key to patch, with fallible bulk reservation.
#[derive(Debug)]
pub struct PatchStore<D> {
    entries: HashMap<Position, Patch<D>>,
}

impl<D> PatchStore<D> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, position: Position) -> Option<&Patch<D>> {
        self.entries.get(&position)
    }

    pub(crate) fn get_mut(&mut self, position: Position) -> Option<&mut Patch<D>> {
        self.entries.get_mut(&position)
    }

    #[must_use]
    pub fn contains(&self, position: Position) -> bool {
        self.entries.contains_key(&position)
    }

    /// Number of materialized patches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all patches in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (Position, &Patch<D>)> {
        self.entries.iter().map(|(&position, patch)| (position, patch))
    }

    /// Patch keys sorted lexicographically, for order-stable serialization.
    #[must_use]
    pub(crate) fn sorted_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.entries.keys().copied().collect();
        positions.sort_unstable();
        positions
    }

    /// Reserve room for `additional` patches, surfacing allocation failure
    /// instead of aborting. Inserts that stay within a successful reservation
    /// cannot fail.
    pub(crate) fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.entries.try_reserve(additional)
    }

    pub(crate) fn insert(&mut self, position: Position, patch: Patch<D>) -> Option<Patch<D>> {
        self.entries.insert(position, patch)
    }
}

impl<D: Default> PatchStore<D> {
    /// Single-lookup entry access: returns the existing patch or inserts a
    /// fresh empty, unfixed one.
    pub(crate) fn get_or_insert(&mut self, position: Position) -> &mut Patch<D> {
        self.entries.entry(position).or_insert_with(Patch::empty)
    }
}
