// src/indirection.rs
//! Текстура косвенной адресации (палитра провинций)
//!
//! Карта идентификаторов огромна, а провинций всего тысячи. Палитра размером
//! 256×256 сопоставляет каждой провинции одну ячейку: в ячейку записывается
//! цвет-идентификатор провинции. Какая ячейка принадлежит пикселю, говорит
//! текстура соответствия (lookup): её каналы R и G задают координаты ячейки,
//! закодированные байтами.
//!
//! Размер палитры не зависит от размера карты: это таблица, а не попиксельная
//! карта. Многие пиксели пишут в одну ячейку одно и то же значение, поэтому
//! порядок записей не важен.

use std::sync::Arc;

use tracing::info;

use crate::color::Rgba8;
use crate::error::Result;
use crate::gpu::{Bindings, ComputeDevice, Invocation, Kernel, KernelLayout, Surface, SurfaceDesc, SurfaceFormat, WorkGroups};
use crate::texture::{FilterMode, Texture2D, WrapMode};

/// Сторона палитры
pub const PALETTE_SIZE: u32 = 256;

/// Ячейка палитры, закодированная в текселе текстуры соответствия
#[must_use]
pub fn palette_slot(lookup_texel: [f32; 4]) -> [u32; 2] {
    let slot = |c: f32| ((c.clamp(0.0, 1.0) * 255.0).round() as u32).min(PALETTE_SIZE - 1);
    [slot(lookup_texel[0]), slot(lookup_texel[1])]
}

/// Тексель текстуры соответствия для ячейки `(x, y)`
#[must_use]
pub fn lookup_texel(slot: [u32; 2]) -> Rgba8 {
    Rgba8::opaque(
        slot[0].min(PALETTE_SIZE - 1) as u8,
        slot[1].min(PALETTE_SIZE - 1) as u8,
        0,
    )
}

struct CreateIndirectionMap;

impl Kernel for CreateIndirectionMap {
    fn name(&self) -> &'static str {
        "CreateIndirectionMap"
    }

    fn layout(&self) -> KernelLayout {
        KernelLayout {
            inputs: &["ProvinceMap", "LookupMap"],
            outputs: &["Result"],
            buffers: &[],
        }
    }

    fn invoke(&self, [x, y]: [u32; 2], ctx: &Invocation<'_>) {
        let [sx, sy] = palette_slot(ctx.input(1).load(x, y));
        ctx.output(0).store(sx, sy, ctx.input(0).load(x, y));
    }
}

/// Строитель палитры по карте идентификаторов и текстуре соответствия
#[derive(Debug, Clone, Copy)]
pub struct IndirectionMapBuilder {
    groups: WorkGroups,
}

impl IndirectionMapBuilder {
    #[must_use]
    pub fn new(groups: WorkGroups) -> Self {
        Self { groups }
    }

    #[must_use]
    pub fn groups(&self) -> WorkGroups {
        self.groups
    }

    /// Запускает проход по всей карте и читает палитру обратно на CPU
    ///
    /// Временная поверхность освобождается в любом случае. Результат:
    /// новая текстура 256×256 с точечной фильтрацией и прижатием координат;
    /// она полностью заменяет предыдущую.
    pub fn build<D: ComputeDevice>(
        &self,
        device: &mut D,
        identifier: Surface,
        lookup: Surface,
    ) -> Result<Texture2D<Rgba8>> {
        let temp = device.create_surface(
            &SurfaceDesc::new("indirection temp", PALETTE_SIZE, PALETTE_SIZE, SurfaceFormat::Rgba8Unorm)
                .sampling(FilterMode::Point, WrapMode::Clamp),
        )?;

        let result = self.run(device, identifier, lookup, temp);
        device.release_surface(temp)?;
        let texture = result?.with_sampling(FilterMode::Point, WrapMode::Clamp);

        let used = texture.data.iter().filter(|c| **c != Rgba8::TRANSPARENT).count();
        info!(slots = used, "палитра построена");
        Ok(texture)
    }

    fn run<D: ComputeDevice>(
        &self,
        device: &mut D,
        identifier: Surface,
        lookup: Surface,
        temp: Surface,
    ) -> Result<Texture2D<Rgba8>> {
        let bindings = Bindings::new()
            .input("ProvinceMap", identifier)
            .input("LookupMap", lookup)
            .output("Result", temp);
        device.dispatch(Arc::new(CreateIndirectionMap), &bindings, self.groups)?;
        device.flush()?;
        device.read_surface_rgba8(temp)
    }
}
