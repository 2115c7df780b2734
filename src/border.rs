// src/border.rs
//! Маска границ и граф соседства провинций
//!
//! Ядро `GetBorderBitmask` записывает для каждого пикселя 4-битную маску
//! направлений (N, E, S, W), в которых сосед принадлежит другой провинции.
//! [`BorderGraph::build`] проходит по краевым пикселям провинций, по маске
//! определяет соседей и собирает границы: одна граница на пару соседних
//! провинций. Построение ломаных не выполняется: граница хранит только
//! сырые пиксели обеих сторон.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use petgraph::graph::{NodeIndex, UnGraph};
use serde::Serialize;
use tracing::info;

use crate::classify::PixelList;
use crate::color::Rgba8;
use crate::error::Result;
use crate::gpu::{
    Bindings, ComputeDevice, Invocation, Kernel, KernelLayout, Surface, SurfaceDesc, SurfaceFormat,
    WorkGroups,
};
use crate::province::ProvinceRegistry;
use crate::texture::{NEIGHBOURS_4, Texture2D, neighbour_mask};

struct BorderBitmask;

impl Kernel for BorderBitmask {
    fn name(&self) -> &'static str {
        "GetBorderBitmask"
    }

    fn layout(&self) -> KernelLayout {
        KernelLayout {
            inputs: &["ProvinceMap"],
            outputs: &["Result"],
            buffers: &[],
        }
    }

    fn invoke(&self, [x, y]: [u32; 2], ctx: &Invocation<'_>) {
        let map = ctx.input(0);
        let mask = neighbour_mask(map.width(), map.height(), x, y, |nx, ny| map.load(nx, ny));
        ctx.output(0)
            .store(x, y, [f32::from(mask) / 255.0, 0.0, 0.0, 1.0]);
    }
}

/// Строит маску границ для всей карты и читает её на CPU
pub fn border_bitmask<D: ComputeDevice>(
    device: &mut D,
    identifier: Surface,
    groups: WorkGroups,
) -> Result<Texture2D<u8>> {
    let [width, height] = groups.extent;
    let out = device.create_surface(&SurfaceDesc::new(
        "border bitmask",
        width,
        height,
        SurfaceFormat::Rgba8Unorm,
    ))?;
    let bindings = Bindings::new()
        .input("ProvinceMap", identifier)
        .output("Result", out);
    let result = device
        .dispatch(Arc::new(BorderBitmask), &bindings, groups)
        .and_then(|()| device.read_surface_rgba8(out));
    device.release_surface(out)?;
    Ok(result?.map(|c| c.r))
}

/// Граница между двумя провинциями
#[derive(Debug, Clone, Serialize)]
pub struct Border {
    pub id: u32,
    /// `id` провинций, меньший первым
    pub provinces: (u32, u32),
    /// Объединение направлений, в которых стороны смотрят друг на друга
    pub bitmask: u8,
    /// Краевые пиксели обеих сторон (абсолютные координаты)
    pub pixels: Vec<(u32, u32)>,
}

/// Все границы карты и граф соседства провинций
#[derive(Debug, Clone, Default)]
pub struct BorderGraph {
    borders: Vec<Border>,
    by_id: HashMap<u32, usize>,
    /// Вершины: `id` провинций, рёбра: `id` границ
    pub graph: UnGraph<u32, u32>,
}

#[derive(Default)]
struct Accum {
    bitmask: u8,
    pixels: Vec<(u32, u32)>,
}

impl BorderGraph {
    /// Собирает границы по краевым пикселям провинций
    ///
    /// `edges`: пары (`id` провинции, её краевые пиксели). Соседи с цветом,
    /// которого нет в реестре, пропускаются.
    #[must_use]
    pub fn build(
        registry: &ProvinceRegistry,
        identifier: &Texture2D<Rgba8>,
        bitmask: &Texture2D<u8>,
        edges: &[(u32, PixelList)],
    ) -> Self {
        let (width, height) = (identifier.width, identifier.height);
        let mut pairs: BTreeMap<(u32, u32), Accum> = BTreeMap::new();

        for (id, pixels) in edges {
            for (x, y) in pixels.to_pixels(width, height) {
                if x >= width || y >= height {
                    continue;
                }
                let mask = bitmask.get(x, y);
                for &(dx, dy, bit) in &NEIGHBOURS_4 {
                    if mask & bit == 0 {
                        continue;
                    }
                    let nx = (i64::from(x) + dx) as u32;
                    let ny = (i64::from(y) + dy) as u32;
                    let Some(other) = registry.by_color(identifier.get(nx, ny)) else {
                        continue;
                    };
                    if other.id() == *id {
                        continue;
                    }
                    let key = ((*id).min(other.id()), (*id).max(other.id()));
                    let acc = pairs.entry(key).or_default();
                    acc.bitmask |= bit;
                    if acc.pixels.last() != Some(&(x, y)) {
                        acc.pixels.push((x, y));
                    }
                }
            }
        }

        let mut graph = UnGraph::new_undirected();
        let mut nodes: HashMap<u32, NodeIndex> = HashMap::new();
        let mut node = |graph: &mut UnGraph<u32, u32>, id: u32| {
            *nodes.entry(id).or_insert_with(|| graph.add_node(id))
        };

        let mut borders = Vec::with_capacity(pairs.len());
        let mut by_id = HashMap::with_capacity(pairs.len());
        for (i, ((a, b), acc)) in pairs.into_iter().enumerate() {
            let id = i as u32 + 1;
            let (na, nb) = (node(&mut graph, a), node(&mut graph, b));
            graph.add_edge(na, nb, id);
            by_id.insert(id, borders.len());
            borders.push(Border {
                id,
                provinces: (a, b),
                bitmask: acc.bitmask,
                pixels: acc.pixels,
            });
        }

        info!(borders = borders.len(), "границы собраны");
        Self {
            borders,
            by_id,
            graph,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.borders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.borders.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Border> {
        self.by_id.get(&id).map(|&i| &self.borders[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Border> {
        self.borders.iter()
    }

    /// Граница между двумя провинциями, если они соседствуют
    #[must_use]
    pub fn between(&self, a: u32, b: u32) -> Option<&Border> {
        let key = (a.min(b), a.max(b));
        self.borders.iter().find(|border| border.provinces == key)
    }

    /// `id` соседей провинции
    #[must_use]
    pub fn neighbours(&self, province: u32) -> Vec<u32> {
        let Some(node) = self
            .graph
            .node_indices()
            .find(|&n| self.graph[n] == province)
        else {
            return Vec::new();
        };
        let mut ids: Vec<u32> = self.graph.neighbors(node).map(|n| self.graph[n]).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{PixelClassifier, PixelSource};
    use crate::gpu::SoftwareDevice;
    use crate::texture::{EAST, WEST};

    const A: Rgba8 = Rgba8::opaque(255, 0, 0);
    const B: Rgba8 = Rgba8::opaque(0, 255, 0);
    const C: Rgba8 = Rgba8::opaque(0, 0, 255);

    /// 6×2: A A B B C C
    fn strip() -> Texture2D<Rgba8> {
        let row = [A, A, B, B, C, C];
        Texture2D::from_raw(6, 2, row.iter().chain(row.iter()).copied().collect()).unwrap()
    }

    #[test]
    fn bitmask_marks_directions_towards_other_provinces() {
        let mut device = SoftwareDevice::new();
        let ids = device.upload_texture("ids", &strip()).unwrap();
        let mask = border_bitmask(&mut device, ids, WorkGroups::covering(6, 2, 32)).unwrap();
        assert_eq!(mask.get(0, 0), 0);
        assert_eq!(mask.get(1, 0), EAST);
        assert_eq!(mask.get(2, 1), WEST);
        assert_eq!(mask.get(3, 0), EAST);
        assert_eq!(device.live_resources(), 1);
    }

    #[test]
    fn strip_yields_a_chain_of_two_borders() {
        let tex = strip();
        let registry = ProvinceRegistry::from_identifier_texture(&tex);
        let mut device = SoftwareDevice::new();
        let ids = device.upload_texture("ids", &tex).unwrap();
        let groups = WorkGroups::covering(6, 2, 32);
        let mask = border_bitmask(&mut device, ids, groups).unwrap();
        let classifier = PixelClassifier::new(&mut device, groups).unwrap();

        let edges: Vec<(u32, PixelList)> = registry
            .iter()
            .map(|p| {
                let list = classifier.edge_pixels(&mut device, p.color(), ids).unwrap();
                (p.id(), list)
            })
            .collect();
        let graph = BorderGraph::build(&registry, &tex, &mask, &edges);

        let (ia, ib, ic) = (
            registry.by_color(A).unwrap().id(),
            registry.by_color(B).unwrap().id(),
            registry.by_color(C).unwrap().id(),
        );
        assert_eq!(graph.len(), 2);
        assert!(graph.between(ia, ib).is_some());
        assert!(graph.between(ib, ic).is_some());
        assert!(graph.between(ia, ic).is_none());
        assert_eq!(graph.neighbours(ib), {
            let mut v = vec![ia, ic];
            v.sort_unstable();
            v
        });

        let ab = graph.between(ia, ib).unwrap();
        assert_eq!(ab.pixels.len(), 4);
        assert_eq!(graph.get(ab.id).unwrap().provinces, ab.provinces);

        // краевые пиксели входят в территорию
        let territory = classifier
            .territory_pixels(&mut device, B, PixelSource::Identifier(ids), ids)
            .unwrap();
        let all: Vec<_> = territory.to_pixels(6, 2).collect();
        let b_edges = &edges.iter().find(|(id, _)| *id == ib).unwrap().1;
        assert!(b_edges.to_pixels(6, 2).all(|p| all.contains(&p)));
    }
}
