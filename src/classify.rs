// src/classify.rs
//! Классификация пикселей: территория и край провинции
//!
//! Обе операции возвращают список заранее неизвестной длины без обхода карты
//! на CPU:
//! 1. счётчик append-буфера обнуляется;
//! 2. ядро на каждый подходящий пиксель атомарно добавляет его нормализованную
//!    координату в буфер;
//! 3. счётчик копируется в буфер косвенных аргументов `{count, 1, 0, 0}`;
//! 4. аргументы читаются обратно, затем ровно `count` элементов буфера.
//!
//! Ёмкость буферов равна `width × height`, поэтому результат никогда не
//! усекается.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::color::Rgba8;
use crate::error::Result;
use crate::gpu::{Bindings, Buffer, ComputeDevice, Invocation, Kernel, KernelLayout, Surface, WorkGroups};
use crate::indirection::palette_slot;
use crate::texture::neighbour_mask;

/// Пиксели провинции в нормализованных координатах (`x / width`, `y / height`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelList {
    pub xs: Vec<f32>,
    pub ys: Vec<f32>,
}

impl PixelList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }

    /// Абсолютные координаты пикселей
    pub fn to_pixels(&self, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (w, h) = (width as f32, height as f32);
        self.iter()
            .map(move |(u, v)| ((u * w).round() as u32, (v * h).round() as u32))
    }

    fn from_points(points: &[[f32; 2]]) -> Self {
        Self {
            xs: points.par_iter().map(|p| p[0]).collect(),
            ys: points.par_iter().map(|p| p[1]).collect(),
        }
    }
}

/// Где искать цвет пикселя при поиске территории
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelSource {
    /// Прямо в карте идентификаторов
    Identifier(Surface),
    /// В палитре (например, карте цветов отображения) через текстуру соответствия
    Palette(Surface),
}

struct TerritoryPixels {
    search: Rgba8,
    through_palette: bool,
}

impl TerritoryPixels {
    const SOURCE: usize = 0;
    const LOOKUP: usize = 1;
}

impl Kernel for TerritoryPixels {
    fn name(&self) -> &'static str {
        "GetTerritoryPixels"
    }

    fn layout(&self) -> KernelLayout {
        KernelLayout {
            inputs: &["Source", "Lookup"],
            outputs: &[],
            buffers: &["Result"],
        }
    }

    fn invoke(&self, [x, y]: [u32; 2], ctx: &Invocation<'_>) {
        let lookup = ctx.input(Self::LOOKUP);
        let texel = if self.through_palette {
            let [sx, sy] = palette_slot(lookup.load(x, y));
            ctx.input(Self::SOURCE).load(sx, sy)
        } else {
            ctx.input(Self::SOURCE).load(x, y)
        };
        if Rgba8::from_unorm(texel) == self.search {
            ctx.buffer(0).append([
                x as f32 / lookup.width() as f32,
                y as f32 / lookup.height() as f32,
            ]);
        }
    }
}

struct EdgePixels {
    search: Rgba8,
}

impl Kernel for EdgePixels {
    fn name(&self) -> &'static str {
        "GetProvinceEdgePixels"
    }

    fn layout(&self) -> KernelLayout {
        KernelLayout {
            inputs: &["ProvinceMap"],
            outputs: &[],
            buffers: &["Result"],
        }
    }

    fn invoke(&self, [x, y]: [u32; 2], ctx: &Invocation<'_>) {
        let map = ctx.input(0);
        if Rgba8::from_unorm(map.load(x, y)) != self.search {
            return;
        }
        let mask = neighbour_mask(map.width(), map.height(), x, y, |nx, ny| map.load(nx, ny));
        if mask != 0 {
            ctx.buffer(0).append([
                x as f32 / map.width() as f32,
                y as f32 / map.height() as f32,
            ]);
        }
    }
}

/// Append-буфер вместе с его буфером косвенных аргументов
#[derive(Debug, Clone, Copy)]
struct AppendPair {
    buffer: Buffer,
    args: Buffer,
}

impl AppendPair {
    fn create<D: ComputeDevice>(device: &mut D, label: &'static str, capacity: usize) -> Result<Self> {
        let buffer = device.create_append_buffer(label, capacity)?;
        match device.create_args_buffer(label) {
            Ok(args) => Ok(Self { buffer, args }),
            Err(e) => {
                device.release_buffer(buffer)?;
                Err(e)
            }
        }
    }

    fn release<D: ComputeDevice>(self, device: &mut D) -> Result<()> {
        device.release_buffer(self.buffer)?;
        device.release_buffer(self.args)
    }
}

/// Классификатор пикселей карты фиксированного размера
#[derive(Debug)]
pub struct PixelClassifier {
    territory: AppendPair,
    edge: AppendPair,
    groups: WorkGroups,
    capacity: usize,
}

impl PixelClassifier {
    /// Выделяет append-буферы ёмкостью `width × height`
    pub fn new<D: ComputeDevice>(device: &mut D, groups: WorkGroups) -> Result<Self> {
        let [width, height] = groups.extent;
        let capacity = width as usize * height as usize;
        let territory = AppendPair::create(device, "territory pixels", capacity)?;
        let edge = match AppendPair::create(device, "edge pixels", capacity) {
            Ok(edge) => edge,
            Err(e) => {
                territory.release(device)?;
                return Err(e);
            }
        };
        Ok(Self {
            territory,
            edge,
            groups,
            capacity,
        })
    }

    /// Верхняя граница длины любого результата
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Все пиксели, цвет которых в источнике точно равен `color`
    pub fn territory_pixels<D: ComputeDevice>(
        &self,
        device: &mut D,
        color: Rgba8,
        source: PixelSource,
        lookup: Surface,
    ) -> Result<PixelList> {
        let (surface, through_palette) = match source {
            PixelSource::Identifier(s) => (s, false),
            PixelSource::Palette(s) => (s, true),
        };
        let kernel = Arc::new(TerritoryPixels {
            search: color,
            through_palette,
        });
        let bindings = Bindings::new()
            .input("Source", surface)
            .input("Lookup", lookup)
            .buffer("Result", self.territory.buffer);
        let pixels = self.collect(device, self.territory, kernel, &bindings)?;
        debug!(%color, count = pixels.len(), "пиксели территории");
        Ok(pixels)
    }

    /// Пиксели провинции `color`, у которых есть сосед другой провинции
    pub fn edge_pixels<D: ComputeDevice>(
        &self,
        device: &mut D,
        color: Rgba8,
        identifier: Surface,
    ) -> Result<PixelList> {
        let kernel = Arc::new(EdgePixels { search: color });
        let bindings = Bindings::new()
            .input("ProvinceMap", identifier)
            .buffer("Result", self.edge.buffer);
        let pixels = self.collect(device, self.edge, kernel, &bindings)?;
        debug!(%color, count = pixels.len(), "краевые пиксели");
        Ok(pixels)
    }

    fn collect<D: ComputeDevice>(
        &self,
        device: &mut D,
        pair: AppendPair,
        kernel: Arc<dyn Kernel>,
        bindings: &Bindings,
    ) -> Result<PixelList> {
        device.set_counter(pair.buffer, 0)?;
        device.dispatch(kernel, bindings, self.groups)?;
        device.write_args(pair.args, [0, 1, 0, 0])?;
        device.copy_count(pair.buffer, pair.args, 0)?;

        let args = device.read_args(pair.args)?;
        let count = (args[0] as usize).min(self.capacity);
        let points = device.read_append(pair.buffer, count)?;
        Ok(PixelList::from_points(&points))
    }

    pub fn release<D: ComputeDevice>(self, device: &mut D) -> Result<()> {
        self.territory.release(device)?;
        self.edge.release(device)
    }
}
