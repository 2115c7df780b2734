// src/distance.rs
//! Поле расстояний до границ (Jump Flood Algorithm)
//!
//! Конвейер из четырёх стадий, каждая запускает ядро по всей карте группами
//! 32×32:
//!
//! 1. **Init**: пиксель на границе провинций становится «семенем» и хранит
//!    свою позицию; остальные получают метку «нет семени».
//! 2. **JFA**: шаги 32, 16, 8, 4, 2, 1; каждый пиксель смотрит на себя и на
//!    8 соседей на расстоянии шага и оставляет ближайшее семя.
//! 3. **Render**: ближайшее семя превращается в цвет пикселя (RGB) и
//!    нормализованное расстояние `min(d, N) / N` (A).
//! 4. **Blur**: сглаживание ступенек в итоговую текстуру.
//!
//! Стадии читают результат предыдущей, поэтому две промежуточные поверхности
//! меняются ролями после каждой стадии ([`PingPong`]). Итоговая текстура
//! каждый раз пересчитывается целиком.
//!
//! JFA даёт приближённое, а не точное расстояние: для отсечки `N` достаточно
//! `ceil(log2(N)) + 1` шагов, дальше точность падает.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DistanceSettings;
use crate::error::{BorderError, Result};
use crate::gpu::{
    Bindings, ComputeDevice, Invocation, Kernel, KernelLayout, Surface, SurfaceDesc, SurfaceFormat,
    WorkGroups,
};
use crate::indirection::palette_slot;
use crate::texture::{FilterMode, WrapMode, neighbour_mask};

/// Тексель «нет семени»
const NO_SEED: [f32; 4] = [-1.0, -1.0, 0.0, 0.0];

fn is_seed(texel: [f32; 4]) -> bool {
    texel[3] > 0.5
}

/// Цвет отображения пикселя через палитру
fn display_color(ctx: &Invocation<'_>, lookup: usize, colors: usize, x: u32, y: u32) -> [f32; 4] {
    let [sx, sy] = palette_slot(ctx.input(lookup).load(x, y));
    ctx.input(colors).load(sx, sy)
}

struct Init;

impl Init {
    const PROVINCES: usize = 0;
    const LOOKUP: usize = 1;
    const COLOR: usize = 2;
}

impl Kernel for Init {
    fn name(&self) -> &'static str {
        "Init"
    }

    fn layout(&self) -> KernelLayout {
        KernelLayout {
            inputs: &["Provinces", "Lookup", "Color"],
            outputs: &["Out"],
            buffers: &[],
        }
    }

    fn invoke(&self, [x, y]: [u32; 2], ctx: &Invocation<'_>) {
        let provinces = ctx.input(Self::PROVINCES);
        // Провинция без цвета отображения различается по идентификатору
        let key = |px: u32, py: u32| {
            let color = display_color(ctx, Self::LOOKUP, Self::COLOR, px, py);
            if color[3] > 0.0 {
                color
            } else {
                provinces.load(px, py)
            }
        };
        let mask = neighbour_mask(provinces.width(), provinces.height(), x, y, key);
        let out = if mask == 0 {
            NO_SEED
        } else {
            [x as f32, y as f32, 0.0, 1.0]
        };
        ctx.output(0).store(x, y, out);
    }
}

struct JumpFlood {
    step: u32,
}

impl Kernel for JumpFlood {
    fn name(&self) -> &'static str {
        "JFA"
    }

    fn layout(&self) -> KernelLayout {
        KernelLayout {
            inputs: &["In"],
            outputs: &["Out"],
            buffers: &[],
        }
    }

    fn invoke(&self, [x, y]: [u32; 2], ctx: &Invocation<'_>) {
        let input = ctx.input(0);
        let step = i64::from(self.step);
        let (fx, fy) = (x as f32, y as f32);

        let mut best: Option<([f32; 2], f32)> = None;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let t = input.fetch(i64::from(x) + dx * step, i64::from(y) + dy * step);
                if !is_seed(t) {
                    continue;
                }
                let d2 = (t[0] - fx).powi(2) + (t[1] - fy).powi(2);
                if best.is_none_or(|(_, b)| d2 < b) {
                    best = Some(([t[0], t[1]], d2));
                }
            }
        }

        let out = match best {
            Some(([sx, sy], _)) => [sx, sy, 0.0, 1.0],
            None => NO_SEED,
        };
        ctx.output(0).store(x, y, out);
    }
}

struct Render {
    max_distance: f32,
}

impl Render {
    const SEEDS: usize = 0;
    const LOOKUP: usize = 1;
    const COLOR: usize = 2;
}

impl Kernel for Render {
    fn name(&self) -> &'static str {
        "CSRender"
    }

    fn layout(&self) -> KernelLayout {
        KernelLayout {
            inputs: &["In", "Lookup", "Color"],
            outputs: &["Out"],
            buffers: &[],
        }
    }

    fn invoke(&self, [x, y]: [u32; 2], ctx: &Invocation<'_>) {
        let seed = ctx.input(Self::SEEDS).load(x, y);
        let distance = if is_seed(seed) {
            ((seed[0] - x as f32).powi(2) + (seed[1] - y as f32).powi(2)).sqrt()
        } else {
            self.max_distance
        };
        let color = display_color(ctx, Self::LOOKUP, Self::COLOR, x, y);
        let encoded = distance.min(self.max_distance) / self.max_distance;
        ctx.output(0)
            .store(x, y, [color[0], color[1], color[2], encoded]);
    }
}

struct Blur {
    radius: u32,
}

impl Kernel for Blur {
    fn name(&self) -> &'static str {
        "CSBlur"
    }

    fn layout(&self) -> KernelLayout {
        KernelLayout {
            inputs: &["In"],
            outputs: &["Out"],
            buffers: &[],
        }
    }

    fn invoke(&self, [x, y]: [u32; 2], ctx: &Invocation<'_>) {
        let input = ctx.input(0);
        let r = i64::from(self.radius);
        let mut sum = [0.0f32; 4];
        for dy in -r..=r {
            for dx in -r..=r {
                let t = input.fetch(i64::from(x) + dx, i64::from(y) + dy);
                for (acc, v) in sum.iter_mut().zip(t) {
                    *acc += v;
                }
            }
        }
        let n = ((2 * r + 1) * (2 * r + 1)) as f32;
        ctx.output(0).store(x, y, sum.map(|v| v / n));
    }
}

/// Пара поверхностей, попеременно служащих входом и выходом
#[derive(Debug, Clone, Copy)]
pub struct PingPong {
    surfaces: [Surface; 2],
    current: usize,
}

impl PingPong {
    #[must_use]
    pub fn new(a: Surface, b: Surface) -> Self {
        Self {
            surfaces: [a, b],
            current: 0,
        }
    }

    /// Поверхность с последним результатом
    #[must_use]
    pub fn current(&self) -> Surface {
        self.surfaces[self.current]
    }

    /// Поверхность, в которую пишет следующая стадия
    #[must_use]
    pub fn next(&self) -> Surface {
        self.surfaces[1 - self.current]
    }

    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }
}

/// Входы конвейера
#[derive(Debug, Clone, Copy)]
pub struct DistanceInputs {
    pub identifier: Surface,
    pub lookup: Surface,
    /// Карта цветов отображения (палитра)
    pub colors: Surface,
}

/// Конвейер поля расстояний; владеет промежуточными и итоговой поверхностями
#[derive(Debug)]
pub struct DistanceFieldPipeline {
    ping_pong: PingPong,
    output: Surface,
    settings: DistanceSettings,
    groups: WorkGroups,
}

impl DistanceFieldPipeline {
    pub fn new<D: ComputeDevice>(
        device: &mut D,
        groups: WorkGroups,
        settings: DistanceSettings,
    ) -> Result<Self> {
        if !settings.max_distance.is_finite() || settings.max_distance <= 0.0 {
            return Err(BorderError::InvalidConfig(format!(
                "max_distance {} must be positive",
                settings.max_distance
            )));
        }
        let [width, height] = groups.extent;
        let scratch = |label| {
            SurfaceDesc::new(label, width, height, SurfaceFormat::Rgba32Float)
                .sampling(FilterMode::Point, WrapMode::Repeat)
        };

        let a = device.create_surface(&scratch("jfa A"))?;
        let b = match device.create_surface(&scratch("jfa B")) {
            Ok(b) => b,
            Err(e) => {
                device.release_surface(a)?;
                return Err(e);
            }
        };
        let output_desc = SurfaceDesc::new("distance field", width, height, SurfaceFormat::Rgba32Float)
            .sampling(FilterMode::Bilinear, WrapMode::Repeat);
        let output = match device.create_surface(&output_desc) {
            Ok(o) => o,
            Err(e) => {
                device.release_surface(a)?;
                device.release_surface(b)?;
                return Err(e);
            }
        };

        Ok(Self {
            ping_pong: PingPong::new(a, b),
            output,
            settings,
            groups,
        })
    }

    /// Итоговая текстура поля (билинейная фильтрация, тайлинг)
    #[must_use]
    pub fn output(&self) -> Surface {
        self.output
    }

    #[must_use]
    pub fn settings(&self) -> &DistanceSettings {
        &self.settings
    }

    /// Полный пересчёт поля; возвращается после синхронизации
    pub fn run<D: ComputeDevice>(&mut self, device: &mut D, inputs: DistanceInputs) -> Result<()> {
        let pp = &mut self.ping_pong;

        device.dispatch(
            Arc::new(Init),
            &Bindings::new()
                .input("Provinces", inputs.identifier)
                .input("Lookup", inputs.lookup)
                .input("Color", inputs.colors)
                .output("Out", pp.next()),
            self.groups,
        )?;
        pp.swap();

        for step in self.settings.steps() {
            device.dispatch(
                Arc::new(JumpFlood { step }),
                &Bindings::new()
                    .input("In", pp.current())
                    .output("Out", pp.next()),
                self.groups,
            )?;
            pp.swap();
            debug!(step, "шаг JFA поставлен в очередь");
        }

        device.dispatch(
            Arc::new(Render {
                max_distance: self.settings.max_distance,
            }),
            &Bindings::new()
                .input("In", pp.current())
                .input("Lookup", inputs.lookup)
                .input("Color", inputs.colors)
                .output("Out", pp.next()),
            self.groups,
        )?;
        pp.swap();

        device.dispatch(
            Arc::new(Blur {
                radius: self.settings.blur_radius,
            }),
            &Bindings::new()
                .input("In", pp.current())
                .output("Out", self.output),
            self.groups,
        )?;
        device.flush()?;

        info!(
            width = self.groups.extent[0],
            height = self.groups.extent[1],
            steps = self.settings.steps().len(),
            "поле расстояний пересчитано"
        );
        Ok(())
    }

    pub fn release<D: ComputeDevice>(self, device: &mut D) -> Result<()> {
        device.release_surface(self.ping_pong.surfaces[0])?;
        device.release_surface(self.ping_pong.surfaces[1])?;
        device.release_surface(self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgba8;
    use crate::gpu::SoftwareDevice;
    use crate::indirection::{PALETTE_SIZE, lookup_texel};
    use crate::texture::Texture2D;

    #[test]
    fn ping_pong_alternates_roles() {
        let mut pp = PingPong::new(Surface(1), Surface(2));
        assert_eq!((pp.current(), pp.next()), (Surface(1), Surface(2)));
        pp.swap();
        assert_eq!((pp.current(), pp.next()), (Surface(2), Surface(1)));
        pp.swap();
        assert_eq!(pp.current(), Surface(1));
    }

    /// 64×64, две провинции, граница между x = 31 и x = 32
    fn split_field(blur_radius: u32) -> Texture2D<[f32; 4]> {
        let left = Rgba8::opaque(255, 0, 0);
        let right = Rgba8::opaque(0, 0, 255);
        let mut ids = Texture2D::new(64, 64, left);
        let mut lookup = Texture2D::new(64, 64, lookup_texel([0, 0]));
        for y in 0..64 {
            for x in 32..64 {
                ids.set(x, y, right);
                lookup.set(x, y, lookup_texel([1, 0]));
            }
        }
        let mut colors = Texture2D::new(PALETTE_SIZE, PALETTE_SIZE, Rgba8::TRANSPARENT);
        colors.set(0, 0, left);
        colors.set(1, 0, right);

        let mut device = SoftwareDevice::new();
        let inputs = DistanceInputs {
            identifier: device.upload_texture("ids", &ids).unwrap(),
            lookup: device.upload_texture("lookup", &lookup).unwrap(),
            colors: device.upload_texture("colors", &colors).unwrap(),
        };
        let settings = DistanceSettings {
            blur_radius,
            ..DistanceSettings::default()
        };
        let mut pipeline =
            DistanceFieldPipeline::new(&mut device, WorkGroups::covering(64, 64, 32), settings)
                .unwrap();
        pipeline.run(&mut device, inputs).unwrap();
        device.read_surface_f32(pipeline.output()).unwrap()
    }

    #[test]
    fn distance_grows_away_from_the_split() {
        let field = split_field(1);
        for y in [0, 17, 63] {
            assert!(field.get(31, y)[3] < 0.1, "x=31 y={y}: {:?}", field.get(31, y));
            assert!(field.get(32, y)[3] < 0.1);
            assert!(field.get(0, y)[3] > 0.99);
            assert!(field.get(63, y)[3] > 0.99);
        }
        let row: Vec<f32> = (0..32).map(|x| field.get(x, 10)[3]).collect();
        assert!(row[28] < row[20] && row[20] <= row[10]);
    }

    #[test]
    fn unblurred_field_encodes_exact_small_distances() {
        let field = split_field(0);
        assert_eq!(field.get(31, 5)[3], 0.0);
        assert!((field.get(27, 5)[3] - 4.0 / 16.0).abs() < 1e-6);
        assert!((field.get(40, 5)[3] - 8.0 / 16.0).abs() < 1e-6);
        assert_eq!(field.get(5, 5)[3], 1.0);
        // цвет берётся из карты отображения
        assert_eq!(field.get(5, 5)[0], 1.0);
        assert_eq!(field.get(50, 5)[2], 1.0);
    }

    #[test]
    fn non_positive_or_nan_max_distance_is_rejected() {
        let mut device = SoftwareDevice::new();
        for max_distance in [0.0, -4.0, f32::NAN, f32::INFINITY] {
            let settings = DistanceSettings {
                max_distance,
                ..DistanceSettings::default()
            };
            let result =
                DistanceFieldPipeline::new(&mut device, WorkGroups::covering(32, 32, 32), settings);
            assert!(matches!(result, Err(BorderError::InvalidConfig(_))), "{max_distance}");
        }
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn uniform_map_has_no_seeds() {
        let mut device = SoftwareDevice::new();
        let ids = Texture2D::new(32, 32, Rgba8::opaque(1, 1, 1));
        let lookup = Texture2D::new(32, 32, lookup_texel([0, 0]));
        let colors = Texture2D::new(PALETTE_SIZE, PALETTE_SIZE, Rgba8::TRANSPARENT);
        let inputs = DistanceInputs {
            identifier: device.upload_texture("ids", &ids).unwrap(),
            lookup: device.upload_texture("lookup", &lookup).unwrap(),
            colors: device.upload_texture("colors", &colors).unwrap(),
        };
        let mut pipeline = DistanceFieldPipeline::new(
            &mut device,
            WorkGroups::covering(32, 32, 32),
            DistanceSettings::default(),
        )
        .unwrap();
        pipeline.run(&mut device, inputs).unwrap();
        let field = device.read_surface_f32(pipeline.output()).unwrap();
        assert!(field.data.iter().all(|t| (t[3] - 1.0).abs() < 1e-6));

        pipeline.release(&mut device).unwrap();
        assert_eq!(device.live_resources(), 3);
    }
}
