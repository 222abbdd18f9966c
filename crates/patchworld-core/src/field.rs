//! Conditional Markov field over target patches and its Gibbs sampler.

use crate::map::MapError;
use crate::patch::{Item, Patch, PatchStore};
use crate::position::Position;
use crate::rng::Lcg64;
use rand::Rng;
use std::collections::HashMap;
use std::ops::Range;
use tracing::trace;

/// Catalog entry describing one item type: its placement intensity and its
/// pairwise couplings with other types.
///
/// The core treats the catalog as opaque beyond this trait; it is consulted
/// once at map construction to precompute the interaction cache.
pub trait ItemType {
    /// Relative per-cell placement weight before interactions. The empty cell
    /// has weight 1, so an intensity of 1.0 fills about half the cells when
    /// nothing couples.
    fn intensity(&self) -> f64;

    /// Chebyshev radius (in cells) beyond which [`ItemType::interaction_energy`]
    /// with `other` is zero. Must not exceed half the patch size.
    fn interaction_radius(&self, other: &Self) -> u32;

    /// Energy added when an item of this type sits `(dx, dy)` cells away from
    /// an item of `other`'s type. Positive energies repel, negative attract.
    fn interaction_energy(&self, other: &Self, dx: i64, dy: i64) -> f64;
}

/// Precomputed intensities and per-pair energy tables, so a single-site update
/// is table lookups only. Built once per map, never mutated, never serialized.
#[derive(Debug, Clone)]
pub(crate) struct InteractionCache {
    type_count: usize,
    intensities: Vec<f64>,
    // Row-major by (site type, neighbor type).
    pairs: Vec<PairTable>,
}

#[derive(Debug, Clone)]
struct PairTable {
    radius: i64,
    // (2 * radius + 1)^2 energies, dy-major; empty when the pair never couples.
    energies: Vec<f64>,
}

impl InteractionCache {
    pub(crate) fn build<T: ItemType>(types: &[T], patch_size: u32) -> Result<Self, MapError> {
        if u32::try_from(types.len()).is_err() {
            return Err(MapError::InvalidConfig("too many item types"));
        }
        let max_radius = i64::from(patch_size / 2);

        let mut intensities = Vec::with_capacity(types.len());
        for item_type in types {
            let intensity = item_type.intensity();
            if !intensity.is_finite() || intensity < 0.0 {
                return Err(MapError::InvalidConfig(
                    "item intensities must be finite and non-negative",
                ));
            }
            intensities.push(intensity);
        }

        let mut pairs = Vec::with_capacity(types.len() * types.len());
        for site in types {
            for neighbor in types {
                let radius = i64::from(site.interaction_radius(neighbor));
                if radius > max_radius {
                    return Err(MapError::InvalidConfig(
                        "interaction radius exceeds half the patch size",
                    ));
                }
                let side = 2 * radius + 1;
                let mut energies = Vec::with_capacity((side * side) as usize);
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let energy = site.interaction_energy(neighbor, dx, dy);
                        if !energy.is_finite() {
                            return Err(MapError::InvalidConfig(
                                "interaction energies must be finite",
                            ));
                        }
                        energies.push(energy);
                    }
                }
                if energies.iter().all(|&energy| energy == 0.0) {
                    energies = Vec::new();
                }
                pairs.push(PairTable { radius, energies });
            }
        }

        Ok(Self {
            type_count: types.len(),
            intensities,
            pairs,
        })
    }

    pub(crate) fn type_count(&self) -> usize {
        self.type_count
    }

    #[inline]
    fn intensity(&self, item_type: usize) -> f64 {
        self.intensities[item_type]
    }

    #[inline]
    fn pair_energy(&self, site_type: usize, neighbor_type: u32, dx: i64, dy: i64) -> f64 {
        let table = &self.pairs[site_type * self.type_count + neighbor_type as usize];
        if table.energies.is_empty() || dx.abs() > table.radius || dy.abs() > table.radius {
            return 0.0;
        }
        let side = 2 * table.radius + 1;
        table.energies[((dy + table.radius) * side + (dx + table.radius)) as usize]
    }
}

/// One conditioning source for a quadrant: another sampling target's working
/// item list, or a slice of the frozen boundary pool.
enum NeighborRef {
    Target(usize),
    Boundary(Range<usize>),
}

struct TargetPatch {
    key: Position,
    // World coordinates of the patch's lowest cell.
    base: Position,
    items: Vec<Item>,
    quadrants: [Vec<NeighborRef>; 4],
}

/// The conditional field over a set of unfixed target patches, given the items
/// of every existing non-target patch around them.
///
/// Target item lists are moved out of the store while sweeps run and written
/// back by [`GibbsField::commit`]; boundary items are snapshotted once.
pub(crate) struct GibbsField<'a> {
    cache: &'a InteractionCache,
    patch_size: u32,
    targets: Vec<TargetPatch>,
    boundary: Vec<Item>,
}

// Quadrant indices: 0 bottom-left, 1 top-left, 2 bottom-right, 3 top-right.
// With every interaction radius at most patch_size / 2, a cell in a quadrant
// can only couple to items in the patch itself and the three neighbors on the
// quadrant's side, which is what makes the per-quadrant update a valid Gibbs
// scan.
fn quadrant_neighbor_keys(key: Position, quadrant: usize) -> [Position; 4] {
    match quadrant {
        0 => [key, key.left(), key.down(), key.down().left()],
        1 => [key, key.left(), key.up(), key.up().left()],
        2 => [key, key.right(), key.down(), key.down().right()],
        _ => [key, key.right(), key.up(), key.up().right()],
    }
}

impl<'a> GibbsField<'a> {
    /// Builds the field for `target_positions`, all of which must already be
    /// materialized and unfixed. Every other existing patch adjacent to a
    /// target contributes conditioning items.
    pub(crate) fn new<D>(
        store: &mut PatchStore<D>,
        cache: &'a InteractionCache,
        patch_size: u32,
        target_positions: &[Position],
    ) -> Self {
        let target_index: HashMap<Position, usize> = target_positions
            .iter()
            .enumerate()
            .map(|(index, &position)| (position, index))
            .collect();

        let mut working: Vec<Vec<Item>> = Vec::with_capacity(target_positions.len());
        for &position in target_positions {
            working.push(
                store
                    .get_mut(position)
                    .map(Patch::take_items)
                    .unwrap_or_default(),
            );
        }

        let mut boundary: Vec<Item> = Vec::new();
        let mut boundary_ranges: HashMap<Position, Range<usize>> = HashMap::new();
        let mut targets = Vec::with_capacity(target_positions.len());
        for (index, &key) in target_positions.iter().enumerate() {
            let quadrants = std::array::from_fn(|quadrant| {
                let mut refs = Vec::with_capacity(4);
                for neighbor_key in quadrant_neighbor_keys(key, quadrant) {
                    if let Some(&target) = target_index.get(&neighbor_key) {
                        refs.push(NeighborRef::Target(target));
                    } else if let Some(patch) = store.get(neighbor_key) {
                        let range = boundary_ranges
                            .entry(neighbor_key)
                            .or_insert_with(|| {
                                let start = boundary.len();
                                boundary.extend_from_slice(patch.items());
                                start..boundary.len()
                            })
                            .clone();
                        refs.push(NeighborRef::Boundary(range));
                    }
                }
                refs
            });
            targets.push(TargetPatch {
                key,
                base: Position::new(
                    key.x * i64::from(patch_size),
                    key.y * i64::from(patch_size),
                ),
                items: std::mem::take(&mut working[index]),
                quadrants,
            });
        }

        Self {
            cache,
            patch_size,
            targets,
            boundary,
        }
    }

    /// One sweep: for every target patch, `patch_size²` single-site updates,
    /// each at a uniformly drawn cell of a uniformly drawn quadrant.
    pub(crate) fn sweep(&mut self, rng: &mut Lcg64, weights: &mut Vec<f64>) {
        let half = self.patch_size / 2;
        let updates = u64::from(self.patch_size) * u64::from(self.patch_size);
        trace!(targets = self.targets.len(), updates, "gibbs sweep");
        for target in 0..self.targets.len() {
            let base = self.targets[target].base;
            for _ in 0..updates {
                let quadrant = rng.random_range(0..4u32) as usize;
                let dx = i64::from(rng.random_range(0..half));
                let dy = i64::from(rng.random_range(0..half));
                let (shift_x, shift_y) = match quadrant {
                    0 => (0, 0),
                    1 => (0, i64::from(half)),
                    2 => (i64::from(half), 0),
                    _ => (i64::from(half), i64::from(half)),
                };
                let site = Position::new(base.x + shift_x + dx, base.y + shift_y + dy);
                self.update_site(target, quadrant, site, rng, weights);
            }
        }
    }

    /// Resamples the cell at `site`: conditional on every coupled item in the
    /// quadrant's neighbor set, draws from the categorical over "empty" and
    /// each item type, then rewrites the site accordingly.
    fn update_site(
        &mut self,
        target: usize,
        quadrant: usize,
        site: Position,
        rng: &mut Lcg64,
        weights: &mut Vec<f64>,
    ) {
        let type_count = self.cache.type_count();
        weights.clear();
        weights.resize(type_count, 0.0);

        let current = &self.targets[target];
        for neighbor in &current.quadrants[quadrant] {
            let (items, own) = match neighbor {
                NeighborRef::Target(index) => (&self.targets[*index].items[..], *index == target),
                NeighborRef::Boundary(range) => (&self.boundary[range.clone()], false),
            };
            for item in items {
                if own && item.location == site {
                    continue;
                }
                let dx = site.x - item.location.x;
                let dy = site.y - item.location.y;
                for site_type in 0..type_count {
                    weights[site_type] +=
                        self.cache.pair_energy(site_type, item.item_type, dx, dy);
                }
            }
        }

        for (site_type, energy) in weights.iter_mut().enumerate() {
            *energy = self.cache.intensity(site_type) * (-*energy).exp();
        }
        let total: f64 = 1.0 + weights.iter().sum::<f64>();
        let mut draw = rng.random::<f64>() * total - 1.0;
        let mut chosen = None;
        if draw >= 0.0 && type_count > 0 {
            for (site_type, &weight) in weights.iter().enumerate() {
                draw -= weight;
                if draw < 0.0 {
                    chosen = Some(site_type as u32);
                    break;
                }
            }
            // Rounding at the top of the range lands on the last type.
            if chosen.is_none() {
                chosen = Some((type_count - 1) as u32);
            }
        }

        let items = &mut self.targets[target].items;
        if let Some(existing) = items.iter().position(|item| item.location == site) {
            items.remove(existing);
        }
        if let Some(item_type) = chosen {
            items.push(Item::initial(item_type, site));
        }
    }

    /// Writes every target's item list back into its patch.
    pub(crate) fn commit<D>(self, store: &mut PatchStore<D>) {
        for target in self.targets {
            if let Some(patch) = store.get_mut(target.key) {
                patch.restore_items(target.items);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Coupled {
        intensity: f64,
        radius: u32,
        energy: f64,
    }

    impl ItemType for Coupled {
        fn intensity(&self) -> f64 {
            self.intensity
        }

        fn interaction_radius(&self, _other: &Self) -> u32 {
            self.radius
        }

        fn interaction_energy(&self, _other: &Self, dx: i64, dy: i64) -> f64 {
            if dx.abs().max(dy.abs()) <= i64::from(self.radius) {
                self.energy
            } else {
                0.0
            }
        }
    }

    #[test]
    fn cache_tabulates_pair_energies() {
        let types = [Coupled {
            intensity: 1.5,
            radius: 2,
            energy: 0.75,
        }];
        let cache = InteractionCache::build(&types, 8).expect("cache");
        assert_eq!(cache.type_count(), 1);
        assert_eq!(cache.intensity(0), 1.5);
        assert_eq!(cache.pair_energy(0, 0, 0, 0), 0.75);
        assert_eq!(cache.pair_energy(0, 0, -2, 2), 0.75);
        assert_eq!(cache.pair_energy(0, 0, 3, 0), 0.0);
        assert_eq!(cache.pair_energy(0, 0, 0, -3), 0.0);
    }

    #[test]
    fn cache_elides_zero_tables() {
        let types = [Coupled {
            intensity: 1.0,
            radius: 3,
            energy: 0.0,
        }];
        let cache = InteractionCache::build(&types, 8).expect("cache");
        assert!(cache.pairs[0].energies.is_empty());
        assert_eq!(cache.pair_energy(0, 0, 1, 1), 0.0);
    }

    #[test]
    fn cache_rejects_wide_radii_and_bad_intensities() {
        let wide = [Coupled {
            intensity: 1.0,
            radius: 5,
            energy: 1.0,
        }];
        assert!(matches!(
            InteractionCache::build(&wide, 8),
            Err(MapError::InvalidConfig(_))
        ));

        let negative = [Coupled {
            intensity: -0.5,
            radius: 0,
            energy: 0.0,
        }];
        assert!(matches!(
            InteractionCache::build(&negative, 8),
            Err(MapError::InvalidConfig(_))
        ));
    }

    #[test]
    fn quadrant_neighbors_stay_on_their_side() {
        let key = Position::new(0, 0);
        assert_eq!(
            quadrant_neighbor_keys(key, 0),
            [key, key.left(), key.down(), key.down().left()]
        );
        assert_eq!(
            quadrant_neighbor_keys(key, 3),
            [key, key.right(), key.up(), key.up().right()]
        );
    }
}
