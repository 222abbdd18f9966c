use patchworld_core::{DefaultScribe, Map, MapConfig, Position};
use patchworld_kinds::{Kernel, Kind};

fn map_with(kinds: Vec<Kind>, seed: u64) -> Map<(), Kind> {
    let config = MapConfig {
        patch_size: 8,
        gibbs_iterations: 10,
        rng_seed: Some(seed),
    };
    Map::new(config, kinds).expect("map")
}

fn occupancy(map: &Map<(), Kind>, bottom_left: Position, top_right: Position) -> f64 {
    let mut items = Vec::new();
    map.collect_items(bottom_left, top_right, &mut items);
    let cells = (top_right.x - bottom_left.x + 1) * (top_right.y - bottom_left.y + 1);
    items.len() as f64 / cells as f64
}

#[test]
fn seams_carry_the_same_density_as_interiors() {
    let mut map = map_with(vec![Kind::new("scrub", 1.0)], 42);
    // Fix a two-patch-wide column so the x = 0 seam is interior to the
    // committed region.
    for y in [0i64, 8, 16, 24] {
        map.get_fixed_neighborhood(Position::new(0, y)).expect("fixing");
    }

    let seam = occupancy(&map, Position::new(-2, -8), Position::new(1, 31));
    let interior = occupancy(&map, Position::new(2, -8), Position::new(5, 31));

    // With intensity 1 and no couplings each cell is a fair coin; both strips
    // hold 160 cells, so anything outside these bands is not sampler noise.
    assert!((0.3..=0.7).contains(&seam), "seam occupancy {seam}");
    assert!(
        (0.3..=0.7).contains(&interior),
        "interior occupancy {interior}"
    );
    assert!(
        (seam - interior).abs() <= 0.25,
        "seam {seam} vs interior {interior}"
    );
}

#[test]
fn strong_repulsion_leaves_no_close_pairs() {
    let boulder = Kind::new("boulder", 1.0).with_coupling(
        "boulder",
        Kernel::Plateau {
            radius: 2,
            energy: 50.0,
        },
    );
    let mut map = map_with(vec![boulder], 99);
    map.get_fixed_neighborhood(Position::new(0, 0)).expect("fixing");

    let mut items = Vec::new();
    map.collect_items(Position::new(-8, -8), Position::new(7, 7), &mut items);
    assert!(!items.is_empty());

    for (index, a) in items.iter().enumerate() {
        for b in &items[index + 1..] {
            let dx = (a.location.x - b.location.x).abs();
            let dy = (a.location.y - b.location.y).abs();
            assert!(
                dx.max(dy) > 2,
                "items at {} and {} violate the exclusion radius",
                a.location,
                b.location
            );
        }
    }
}

#[test]
fn coupled_catalogs_stay_deterministic() {
    let catalog = || {
        let tree = Kind::new("tree", 0.8)
            .with_coupling(
                "tree",
                Kernel::Plateau {
                    radius: 1,
                    energy: 2.0,
                },
            )
            .with_coupling(
                "shrub",
                Kernel::Ramp {
                    radius: 2,
                    peak: -1.0,
                },
            );
        let shrub = Kind::new("shrub", 0.6).with_coupling(
            "tree",
            Kernel::Ramp {
                radius: 2,
                peak: -1.0,
            },
        );
        vec![tree, shrub]
    };

    let mut map_a = map_with(catalog(), 7);
    let mut map_b = map_with(catalog(), 7);
    for map in [&mut map_a, &mut map_b] {
        map.get_fixed_neighborhood(Position::new(0, 0)).expect("fixing");
        map.get_fixed_neighborhood(Position::new(-30, 12)).expect("fixing");
    }

    let bytes = |map: &Map<(), Kind>| {
        let mut out = Vec::new();
        map.write_to(&mut out, &mut DefaultScribe).expect("write");
        out
    };
    assert_eq!(bytes(&map_a), bytes(&map_b));

    // Catalog indices in items stay inside the two-kind catalog.
    for (_, patch) in map_a.patches() {
        for item in patch.items() {
            assert!(item.item_type < 2);
        }
    }
}
