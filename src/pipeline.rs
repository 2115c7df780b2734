// src/pipeline.rs
//! Конвейер политических границ целиком
//!
//! [`BorderPipeline`] владеет устройством и всеми ресурсами на нём: картой
//! идентификаторов, текстурой соответствия, палитрой, картой цветов
//! отображения, поверхностями JFA и append-буферами классификатора.
//!
//! Порядок работы:
//! 1. [`BorderPipeline::initialize`]: проверка входов, выделение ресурсов,
//!    построение палитры;
//! 2. [`BorderPipeline::recolor`]: карта цветов отображения и поле
//!    расстояний (повторяется при каждой смене раскраски);
//! 3. запросы пикселей, агрегация провинций и сбор границ.
//!
//! Если в конфигурации задано `threads`, конвейер держит собственный пул
//! rayon, и все его операции (CPU-проходы и запуски ядер) исполняются в нём.

use rayon::ThreadPool;
use tracing::{info, warn};

use crate::border::{BorderGraph, border_bitmask};
use crate::classify::{PixelClassifier, PixelList, PixelSource};
use crate::color::Rgba8;
use crate::config::{BorderConfig, TilePolicy};
use crate::display::generate_display_color_map;
use crate::distance::{DistanceFieldPipeline, DistanceInputs};
use crate::error::{BorderError, Result};
use crate::gpu::{ComputeDevice, Surface, WorkGroups};
use crate::indirection::IndirectionMapBuilder;
use crate::province::ProvinceRegistry;
use crate::province::aggregate::aggregate_provinces;
use crate::texture::Texture2D;

/// Источник цвета для запроса территории
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerritorySource {
    /// Карта идентификаторов: цвет-ключ провинции
    Identifier,
    /// Карта цветов отображения через палитру
    DisplayColors,
}

/// Исполняет `op` в пуле конвейера или, если его нет, в глобальном пуле
fn in_pool<R: Send>(pool: Option<&ThreadPool>, op: impl FnOnce() -> R + Send) -> R {
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

/// Поверхности, выделенные при инициализации; освобождаются при ошибке
struct Allocated {
    surfaces: Vec<Surface>,
}

impl Allocated {
    fn release<D: ComputeDevice>(self, device: &mut D) {
        for surface in self.surfaces {
            if let Err(e) = device.release_surface(surface) {
                warn!(error = %e, "не удалось освободить поверхность");
            }
        }
    }
}

/// Всё, что инициализация создаёт на устройстве
struct Resources {
    identifier: Surface,
    lookup: Surface,
    indirection: Texture2D<Rgba8>,
    distance: DistanceFieldPipeline,
    classifier: PixelClassifier,
}

pub struct BorderPipeline<D: ComputeDevice> {
    device: D,
    config: BorderConfig,
    pool: Option<ThreadPool>,
    groups: WorkGroups,
    identifier_cpu: Texture2D<Rgba8>,
    identifier: Surface,
    lookup: Surface,
    indirection_builder: IndirectionMapBuilder,
    indirection: Texture2D<Rgba8>,
    display: Option<(Texture2D<Rgba8>, Surface)>,
    distance: DistanceFieldPipeline,
    classifier: PixelClassifier,
}

impl<D: ComputeDevice> BorderPipeline<D> {
    /// Проверяет входы, выделяет ресурсы и строит палитру
    ///
    /// Отсутствие любой из текстур считается ошибкой конфигурации; при любой
    /// ошибке всё, что успели выделить, освобождается. Чтобы сохранить
    /// устройство после неудачи, передайте `&mut device`.
    pub fn initialize(
        mut device: D,
        config: BorderConfig,
        identifier: Option<&Texture2D<Rgba8>>,
        lookup: Option<&Texture2D<Rgba8>>,
    ) -> Result<Self> {
        config.validate()?;
        let identifier = identifier.ok_or(BorderError::MissingTexture("province identifier map"))?;
        let lookup = lookup.ok_or(BorderError::MissingTexture("lookup map"))?;
        let (width, height) = (identifier.width, identifier.height);
        if width == 0 || height == 0 {
            return Err(BorderError::InvalidConfig("identifier map is empty".into()));
        }
        if (lookup.width, lookup.height) != (width, height) {
            return Err(BorderError::DimensionMismatch {
                name: "lookup map",
                expected_width: width,
                expected_height: height,
                actual_width: lookup.width,
                actual_height: lookup.height,
            });
        }

        let groups = WorkGroups::covering(width, height, config.workgroup_size);
        if !groups.is_exact() {
            match config.tile_policy {
                TilePolicy::Reject => {
                    return Err(BorderError::UnalignedDimensions {
                        width,
                        height,
                        group: config.workgroup_size,
                    });
                }
                TilePolicy::Mask => warn!(
                    width,
                    height,
                    group = config.workgroup_size,
                    "размер карты не кратен рабочей группе, краевые группы обрезаются"
                ),
            }
        }

        let pool = config.thread_pool()?;
        let indirection_builder = IndirectionMapBuilder::new(groups);
        let mut allocated = Allocated {
            surfaces: Vec::new(),
        };
        let result = in_pool(pool.as_ref(), || {
            Self::allocate(
                &mut device,
                &config,
                indirection_builder,
                identifier,
                lookup,
                &mut allocated,
            )
        });
        match result {
            Ok(resources) => {
                info!(
                    width,
                    height,
                    threads = ?config.threads,
                    "конвейер границ инициализирован"
                );
                Ok(Self {
                    device,
                    config,
                    pool,
                    groups,
                    identifier_cpu: identifier.clone(),
                    identifier: resources.identifier,
                    lookup: resources.lookup,
                    indirection_builder,
                    indirection: resources.indirection,
                    display: None,
                    distance: resources.distance,
                    classifier: resources.classifier,
                })
            }
            Err(e) => {
                allocated.release(&mut device);
                Err(e)
            }
        }
    }

    fn allocate(
        device: &mut D,
        config: &BorderConfig,
        builder: IndirectionMapBuilder,
        identifier: &Texture2D<Rgba8>,
        lookup: &Texture2D<Rgba8>,
        allocated: &mut Allocated,
    ) -> Result<Resources> {
        let identifier_s = device.upload_texture("province identifier map", identifier)?;
        allocated.surfaces.push(identifier_s);
        let lookup_s = device.upload_texture("lookup map", lookup)?;
        allocated.surfaces.push(lookup_s);

        let indirection = builder.build(device, identifier_s, lookup_s)?;

        let groups = builder.groups();
        let distance = DistanceFieldPipeline::new(device, groups, config.distance.clone())?;
        let classifier = match PixelClassifier::new(device, groups) {
            Ok(c) => c,
            Err(e) => {
                distance.release(device)?;
                return Err(e);
            }
        };
        Ok(Resources {
            identifier: identifier_s,
            lookup: lookup_s,
            indirection,
            distance,
            classifier,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.groups.extent[0]
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.groups.extent[1]
    }

    #[must_use]
    pub fn config(&self) -> &BorderConfig {
        &self.config
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Число потоков, на которых исполняются операции конвейера
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        in_pool(self.pool.as_ref(), rayon::current_num_threads)
    }

    /// Текущая палитра (256×256)
    #[must_use]
    pub fn indirection(&self) -> &Texture2D<Rgba8> {
        &self.indirection
    }

    /// Текущая карта цветов отображения, если она уже построена
    #[must_use]
    pub fn display_colors(&self) -> Option<&Texture2D<Rgba8>> {
        self.display.as_ref().map(|(t, _)| t)
    }

    /// Поверхность поля расстояний для материала рендера
    #[must_use]
    pub fn distance_field(&self) -> Surface {
        self.distance.output()
    }

    /// Реестр по уникальным цветам карты идентификаторов
    ///
    /// Цвет отображения каждой провинции совпадает с её цветом-ключом.
    #[must_use]
    pub fn build_registry(&self) -> ProvinceRegistry {
        let identifier = &self.identifier_cpu;
        in_pool(self.pool.as_ref(), || {
            ProvinceRegistry::from_identifier_texture(identifier)
        })
    }

    /// Перестраивает палитру и заменяет ею прежнюю
    ///
    /// Карта цветов отображения после этого устаревает и сбрасывается.
    pub fn rebuild_indirection(&mut self) -> Result<&Texture2D<Rgba8>> {
        let (builder, device) = (self.indirection_builder, &mut self.device);
        let (identifier, lookup) = (self.identifier, self.lookup);
        self.indirection = in_pool(self.pool.as_ref(), || {
            builder.build(device, identifier, lookup)
        })?;
        if let Some((_, surface)) = self.display.take() {
            self.device.release_surface(surface)?;
        }
        Ok(&self.indirection)
    }

    /// Пересобирает карту цветов отображения и загружает её на устройство
    pub fn refresh_display_colors(&mut self, registry: &ProvinceRegistry) -> Result<()> {
        let indirection = &self.indirection;
        let texture = in_pool(self.pool.as_ref(), || {
            generate_display_color_map(indirection, registry)
        });
        let surface = self.device.upload_texture("display colors", &texture)?;
        if let Some((_, old)) = self.display.replace((texture, surface)) {
            self.device.release_surface(old)?;
        }
        Ok(())
    }

    /// Полностью пересчитывает поле расстояний по текущим цветам
    pub fn regenerate_distance_field(&mut self) -> Result<()> {
        let inputs = DistanceInputs {
            identifier: self.identifier,
            lookup: self.lookup,
            colors: self.display_surface()?,
        };
        let (distance, device) = (&mut self.distance, &mut self.device);
        in_pool(self.pool.as_ref(), || distance.run(device, inputs))
    }

    /// Новая раскраска: карта цветов отображения и поле расстояний
    pub fn recolor(&mut self, registry: &ProvinceRegistry) -> Result<()> {
        self.refresh_display_colors(registry)?;
        self.regenerate_distance_field()
    }

    /// Читает поле расстояний на CPU
    pub fn read_distance_field(&mut self) -> Result<Texture2D<[f32; 4]>> {
        let (output, device) = (self.distance.output(), &mut self.device);
        in_pool(self.pool.as_ref(), || device.read_surface_f32(output))
    }

    /// Пиксели, цвет которых в выбранном источнике равен `color`
    pub fn territory_pixels(&mut self, color: Rgba8, source: TerritorySource) -> Result<PixelList> {
        let source = match source {
            TerritorySource::Identifier => PixelSource::Identifier(self.identifier),
            TerritorySource::DisplayColors => PixelSource::Palette(self.display_surface()?),
        };
        let (classifier, device, lookup) = (&self.classifier, &mut self.device, self.lookup);
        in_pool(self.pool.as_ref(), || {
            classifier.territory_pixels(device, color, source, lookup)
        })
    }

    /// Пиксели провинции `color`, соседствующие с другой провинцией
    pub fn edge_pixels(&mut self, color: Rgba8) -> Result<PixelList> {
        let (classifier, device, identifier) = (&self.classifier, &mut self.device, self.identifier);
        in_pool(self.pool.as_ref(), || {
            classifier.edge_pixels(device, color, identifier)
        })
    }

    /// Собирает пиксельные данные всех провинций по карте цветов отображения
    pub fn aggregate_provinces(&mut self, registry: &mut ProvinceRegistry) -> Result<()> {
        let colors = self.display_surface()?;
        let (width, height) = (self.width(), self.height());
        let (classifier, device, lookup) = (&self.classifier, &mut self.device, self.lookup);
        in_pool(self.pool.as_ref(), || {
            aggregate_provinces(registry, width, height, |color| {
                classifier.territory_pixels(&mut *device, color, PixelSource::Palette(colors), lookup)
            })
        })
    }

    /// Маска границ всей карты
    pub fn border_bitmask(&mut self) -> Result<Texture2D<u8>> {
        let (device, identifier, groups) = (&mut self.device, self.identifier, self.groups);
        in_pool(self.pool.as_ref(), || border_bitmask(device, identifier, groups))
    }

    /// Границы между всеми парами соседних провинций
    pub fn build_borders(&mut self, registry: &ProvinceRegistry) -> Result<BorderGraph> {
        let bitmask = self.border_bitmask()?;
        let mut edges = Vec::with_capacity(registry.len());
        for province in registry.iter() {
            edges.push((province.id(), self.edge_pixels(province.color())?));
        }
        Ok(BorderGraph::build(
            registry,
            &self.identifier_cpu,
            &bitmask,
            &edges,
        ))
    }

    /// Освобождает все ресурсы и возвращает устройство
    pub fn release(mut self) -> Result<D> {
        if let Some((_, surface)) = self.display.take() {
            self.device.release_surface(surface)?;
        }
        self.distance.release(&mut self.device)?;
        self.classifier.release(&mut self.device)?;
        self.device.release_surface(self.identifier)?;
        self.device.release_surface(self.lookup)?;
        Ok(self.device)
    }

    fn display_surface(&self) -> Result<Surface> {
        self.display
            .as_ref()
            .map(|(_, s)| *s)
            .ok_or(BorderError::MissingTexture("display color map"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gpu::{Bindings, Buffer, Kernel, SoftwareDevice, SurfaceDesc};
    use crate::synth;

    /// Устройство, которому не хватает памяти под append-буферы
    struct NoAppendBuffers(SoftwareDevice);

    impl ComputeDevice for NoAppendBuffers {
        fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<Surface> {
            self.0.create_surface(desc)
        }

        fn upload_texture(&mut self, label: &'static str, texture: &Texture2D<Rgba8>) -> Result<Surface> {
            self.0.upload_texture(label, texture)
        }

        fn create_append_buffer(&mut self, _label: &'static str, _capacity: usize) -> Result<Buffer> {
            Err(BorderError::InvalidConfig("out of buffer memory".into()))
        }

        fn create_args_buffer(&mut self, label: &'static str) -> Result<Buffer> {
            self.0.create_args_buffer(label)
        }

        fn set_counter(&mut self, buffer: Buffer, value: u32) -> Result<()> {
            self.0.set_counter(buffer, value)
        }

        fn write_args(&mut self, buffer: Buffer, words: [u32; 4]) -> Result<()> {
            self.0.write_args(buffer, words)
        }

        fn copy_count(&mut self, src: Buffer, dst: Buffer, word: usize) -> Result<()> {
            self.0.copy_count(src, dst, word)
        }

        fn dispatch(&mut self, kernel: Arc<dyn Kernel>, bindings: &Bindings, groups: WorkGroups) -> Result<()> {
            self.0.dispatch(kernel, bindings, groups)
        }

        fn flush(&mut self) -> Result<()> {
            self.0.flush()
        }

        fn read_surface_rgba8(&mut self, surface: Surface) -> Result<Texture2D<Rgba8>> {
            self.0.read_surface_rgba8(surface)
        }

        fn read_surface_f32(&mut self, surface: Surface) -> Result<Texture2D<[f32; 4]>> {
            self.0.read_surface_f32(surface)
        }

        fn read_args(&mut self, buffer: Buffer) -> Result<[u32; 4]> {
            self.0.read_args(buffer)
        }

        fn read_append(&mut self, buffer: Buffer, count: usize) -> Result<Vec<[f32; 2]>> {
            self.0.read_append(buffer, count)
        }

        fn surface_desc(&self, surface: Surface) -> Result<SurfaceDesc> {
            self.0.surface_desc(surface)
        }

        fn release_surface(&mut self, surface: Surface) -> Result<()> {
            self.0.release_surface(surface)
        }

        fn release_buffer(&mut self, buffer: Buffer) -> Result<()> {
            self.0.release_buffer(buffer)
        }
    }

    #[test]
    fn missing_inputs_abort_setup() {
        let map = synth::generate(32, 32, 3, 1).unwrap();
        let err = BorderPipeline::initialize(
            SoftwareDevice::new(),
            BorderConfig::default(),
            Some(&map.identifier),
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, BorderError::MissingTexture("lookup map")));

        let err = BorderPipeline::initialize(
            SoftwareDevice::new(),
            BorderConfig::default(),
            None,
            Some(&map.lookup),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BorderError::MissingTexture(_)));
    }

    #[test]
    fn reject_policy_refuses_unaligned_maps() {
        let map = synth::generate(40, 32, 3, 1).unwrap();
        let config = BorderConfig {
            tile_policy: TilePolicy::Reject,
            ..BorderConfig::default()
        };
        let err = BorderPipeline::initialize(
            SoftwareDevice::new(),
            config,
            Some(&map.identifier),
            Some(&map.lookup),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BorderError::UnalignedDimensions { .. }));
    }

    #[test]
    fn distance_field_needs_display_colors_first() {
        let map = synth::generate(32, 32, 3, 1).unwrap();
        let mut pipeline = BorderPipeline::initialize(
            SoftwareDevice::new(),
            BorderConfig::default(),
            Some(&map.identifier),
            Some(&map.lookup),
        )
        .unwrap();
        assert!(matches!(
            pipeline.regenerate_distance_field(),
            Err(BorderError::MissingTexture("display color map"))
        ));
        pipeline.recolor(&map.registry).unwrap();
        assert!(pipeline.display_colors().is_some());
    }

    #[test]
    fn release_returns_an_empty_device() {
        let map = synth::generate(32, 32, 3, 1).unwrap();
        let mut pipeline = BorderPipeline::initialize(
            SoftwareDevice::new(),
            BorderConfig::default(),
            Some(&map.identifier),
            Some(&map.lookup),
        )
        .unwrap();
        pipeline.recolor(&map.registry).unwrap();
        let device = pipeline.release().unwrap();
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn mismatched_lookup_is_rejected() {
        let map = synth::generate(32, 32, 3, 1).unwrap();
        let small = Texture2D::new(16, 16, Rgba8::TRANSPARENT);
        let err = BorderPipeline::initialize(
            SoftwareDevice::new(),
            BorderConfig::default(),
            Some(&map.identifier),
            Some(&small),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BorderError::DimensionMismatch { .. }));
    }

    #[test]
    fn borrowed_device_is_clean_after_a_failed_setup() {
        let map = synth::generate(32, 32, 3, 1).unwrap();
        let mut device = NoAppendBuffers(SoftwareDevice::new());
        let err = BorderPipeline::initialize(
            &mut device,
            BorderConfig::default(),
            Some(&map.identifier),
            Some(&map.lookup),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BorderError::InvalidConfig(_)));
        assert_eq!(device.0.live_resources(), 0);
        assert_eq!(device.0.pending_commands(), 0);
    }

    #[test]
    fn borrowed_device_is_handed_back_on_release() {
        let map = synth::generate(32, 32, 3, 1).unwrap();
        let mut device = SoftwareDevice::new();
        let mut pipeline = BorderPipeline::initialize(
            &mut device,
            BorderConfig::default(),
            Some(&map.identifier),
            Some(&map.lookup),
        )
        .unwrap();
        pipeline.recolor(&map.registry).unwrap();
        pipeline.release().unwrap();
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn dedicated_pool_runs_every_pass_with_identical_results() {
        let mut map = synth::generate(64, 32, 6, 5).unwrap();
        let run = |threads: Option<usize>, registry: &mut ProvinceRegistry| {
            let config = BorderConfig {
                threads,
                ..BorderConfig::default()
            };
            let mut pipeline = BorderPipeline::initialize(
                SoftwareDevice::new(),
                config,
                Some(&map.identifier),
                Some(&map.lookup),
            )
            .unwrap();
            pipeline.recolor(registry).unwrap();
            pipeline.aggregate_provinces(registry).unwrap();
            let sizes: Vec<usize> = registry.iter().map(|p| p.pixel_size).collect();
            let registry_colors: Vec<Rgba8> =
                pipeline.build_registry().iter().map(|p| p.color()).collect();
            (
                pipeline.worker_threads(),
                pipeline.display_colors().cloned(),
                pipeline.read_distance_field().unwrap(),
                sizes,
                registry_colors,
            )
        };

        let mut shared = map.registry.clone();
        let global = run(None, &mut shared);
        let dedicated = run(Some(2), &mut map.registry);
        assert_eq!(dedicated.0, 2);
        assert_eq!(global.1, dedicated.1);
        assert_eq!(global.2, dedicated.2);
        assert_eq!(global.3, dedicated.3);
        assert_eq!(global.4, dedicated.4);
        assert_eq!(dedicated.3.iter().sum::<usize>(), 64 * 32);
    }
}
