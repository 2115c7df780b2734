use std::collections::HashSet;

use borderfield::synth::{self, SyntheticMap};
use borderfield::{
    BorderConfig, BorderError, BorderPipeline, Rgba8, SoftwareDevice, TerritorySource, TilePolicy,
};

const SIZE: u32 = 64;

fn setup() -> (SyntheticMap, BorderPipeline<SoftwareDevice>) {
    let map = synth::generate(SIZE, SIZE, 12, 3).unwrap();
    let mut pipeline = BorderPipeline::initialize(
        SoftwareDevice::new(),
        BorderConfig::default(),
        Some(&map.identifier),
        Some(&map.lookup),
    )
    .unwrap();
    pipeline.recolor(&map.registry).unwrap();
    (map, pipeline)
}

fn brute_force(map: &SyntheticMap, color: Rgba8) -> HashSet<(u32, u32)> {
    let mut set = HashSet::new();
    for y in 0..map.identifier.height {
        for x in 0..map.identifier.width {
            if map.identifier.get(x, y) == color {
                set.insert((x, y));
            }
        }
    }
    set
}

#[test]
fn territory_matches_a_full_scan() {
    let (map, mut pipeline) = setup();
    for province in map.registry.iter() {
        let expected = brute_force(&map, province.color());
        for source in [TerritorySource::Identifier, TerritorySource::DisplayColors] {
            let list = pipeline.territory_pixels(province.color(), source).unwrap();
            let got: HashSet<_> = list.to_pixels(SIZE, SIZE).collect();
            assert_eq!(list.len(), expected.len(), "{source:?}");
            assert_eq!(got, expected, "{source:?}");
        }
    }
}

#[test]
fn absent_color_yields_nothing() {
    let (_, mut pipeline) = setup();
    let list = pipeline
        .territory_pixels(Rgba8::TRANSPARENT, TerritorySource::Identifier)
        .unwrap();
    assert!(list.is_empty());
    let list = pipeline
        .territory_pixels(Rgba8::TRANSPARENT, TerritorySource::DisplayColors)
        .unwrap();
    assert!(list.is_empty());
}

#[test]
fn edge_pixels_lie_inside_the_territory() {
    let (map, mut pipeline) = setup();
    for province in map.registry.iter() {
        let territory = brute_force(&map, province.color());
        let edges = pipeline.edge_pixels(province.color()).unwrap();
        assert!(edges.len() <= territory.len());
        for p in edges.to_pixels(SIZE, SIZE) {
            assert!(territory.contains(&p));
        }
    }
}

#[test]
fn aggregation_covers_the_map_within_bounds() {
    let (mut map, mut pipeline) = setup();
    pipeline.aggregate_provinces(&mut map.registry).unwrap();

    let total: usize = map.registry.iter().map(|p| p.pixel_size).sum();
    assert_eq!(total, (SIZE * SIZE) as usize);

    for province in map.registry.iter() {
        assert_eq!(province.pixels_x.len(), province.pixel_size);
        assert_eq!(province.pixels_x_int.len(), province.pixel_size);
        let (Some(min), Some(max)) = (province.min_xy, province.max_xy) else {
            assert_eq!(province.pixel_size, 0);
            continue;
        };
        for (&u, &v) in province.pixels_x.iter().zip(&province.pixels_y) {
            assert!((0.0..=1.0).contains(&u) && (0.0..=1.0).contains(&v));
            assert!(min[0] <= u && u <= max[0]);
            assert!(min[1] <= v && v <= max[1]);
        }
        for (&x, &y) in province.pixels_x_int.iter().zip(&province.pixels_y_int) {
            assert_eq!(map.identifier.get(x as u32, y as u32), province.color());
        }
    }
}

#[test]
fn rebuilding_the_palette_changes_nothing() {
    let (_, mut pipeline) = setup();
    let first = pipeline.indirection().clone();
    let second = pipeline.rebuild_indirection().unwrap().clone();
    assert_eq!(first, second);
    assert!(pipeline.display_colors().is_none());
}

#[test]
fn shared_display_color_merges_territories() {
    let (mut map, mut pipeline) = setup();
    let ids: Vec<u32> = map.registry.iter().map(|p| p.id()).take(2).collect();
    let (a, b) = (ids[0], ids[1]);
    let expected = brute_force(&map, map.registry.by_id(a).unwrap().color()).len()
        + brute_force(&map, map.registry.by_id(b).unwrap().color()).len();

    let merged = Rgba8::opaque(1, 2, 3);
    map.registry.set_display_color(a, merged).unwrap();
    map.registry.set_display_color(b, merged).unwrap();
    pipeline.recolor(&map.registry).unwrap();
    pipeline.aggregate_provinces(&mut map.registry).unwrap();

    assert_eq!(map.registry.by_id(a).unwrap().pixel_size, expected);
    assert_eq!(map.registry.by_id(b).unwrap().pixel_size, expected);
    let list = pipeline
        .territory_pixels(merged, TerritorySource::DisplayColors)
        .unwrap();
    assert_eq!(list.len(), expected);
}

#[test]
fn distance_field_is_normalized() {
    let (_, mut pipeline) = setup();
    let field = pipeline.read_distance_field().unwrap();
    assert_eq!((field.width, field.height), (SIZE, SIZE));
    assert!(field.data.iter().all(|t| (0.0..=1.0).contains(&t[3])));
    assert!(field.data.iter().any(|t| t[3] < 0.5));
}

#[test]
fn borders_connect_adjacent_provinces() {
    let (map, mut pipeline) = setup();
    let borders = pipeline.build_borders(&map.registry).unwrap();
    assert!(!borders.is_empty());
    for border in borders.iter() {
        let (a, b) = border.provinces;
        assert!(a < b);
        assert!(borders.neighbours(a).contains(&b));
        assert!(!border.pixels.is_empty());
    }
}

#[test]
fn missing_lookup_is_a_configuration_error() {
    let map = synth::generate(SIZE, SIZE, 4, 1).unwrap();
    let err = BorderPipeline::initialize(
        SoftwareDevice::new(),
        BorderConfig::default(),
        Some(&map.identifier),
        None,
    )
    .err()
    .unwrap();
    assert!(matches!(err, BorderError::MissingTexture(_)));
}

#[test]
fn unaligned_maps_follow_the_tile_policy() {
    let map = synth::generate(48, 40, 6, 9).unwrap();
    let reject = BorderConfig {
        tile_policy: TilePolicy::Reject,
        ..BorderConfig::default()
    };
    assert!(matches!(
        BorderPipeline::initialize(
            SoftwareDevice::new(),
            reject,
            Some(&map.identifier),
            Some(&map.lookup),
        ),
        Err(BorderError::UnalignedDimensions { .. })
    ));

    let mut pipeline = BorderPipeline::initialize(
        SoftwareDevice::new(),
        BorderConfig::default(),
        Some(&map.identifier),
        Some(&map.lookup),
    )
    .unwrap();
    pipeline.recolor(&map.registry).unwrap();
    let mut registry = map.registry.clone();
    pipeline.aggregate_provinces(&mut registry).unwrap();
    let total: usize = registry.iter().map(|p| p.pixel_size).sum();
    assert_eq!(total, 48 * 40);
    assert_eq!(pipeline.release().unwrap().live_resources(), 0);
}
