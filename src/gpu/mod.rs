// src/gpu/mod.rs
//! Абстракция вычислительного устройства
//!
//! Алгоритмы крейта не знают, на чём они исполняются. Им нужен узкий набор
//! возможностей:
//! - выделить поверхность / append-буфер / буфер аргументов;
//! - привязать ресурсы к слотам ядра как входы и выходы;
//! - поставить в очередь запуск ядра на сетку рабочих групп;
//! - синхронизироваться и прочитать результат обратно на CPU;
//! - освободить ресурс.
//!
//! Эти возможности описывает трейт [`ComputeDevice`]. Запуски асинхронны
//! относительно вызывающего потока: до точки синхронизации ([`ComputeDevice::flush`]
//! или любого чтения) результат не наблюдаем. Команды исполняются строго в
//! порядке постановки.
//!
//! Ядро ([`Kernel`]): программа, вызываемая один раз на пиксель. Слоты ядра
//! позиционные: порядок имён в [`KernelLayout`] задаёт индексы, по которым ядро
//! обращается к привязанным ресурсам через [`Invocation`].

pub mod software;

use std::sync::Arc;

use crate::color::Rgba8;
use crate::error::{BorderError, Result};
use crate::texture::{FilterMode, Texture2D, WrapMode};

pub use software::{Invocation, SoftwareDevice};

/// Дескриптор поверхности устройства
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface(pub(crate) u32);

/// Дескриптор буфера устройства (append-буфер или буфер аргументов)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Buffer(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFormat {
    /// 8 бит на канал, нормализованные значения
    Rgba8Unorm,
    /// 32-битный float на канал
    Rgba32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl SurfaceDesc {
    #[must_use]
    pub fn new(label: &'static str, width: u32, height: u32, format: SurfaceFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            filter: FilterMode::Point,
            wrap: WrapMode::Clamp,
        }
    }

    #[must_use]
    pub fn sampling(mut self, filter: FilterMode, wrap: WrapMode) -> Self {
        self.filter = filter;
        self.wrap = wrap;
        self
    }
}

/// Сетка рабочих групп, покрывающая прямоугольник `extent`
///
/// Если размер не кратен стороне группы, последняя строка/столбец групп
/// выходит за край; вызовы за пределами `extent` не исполняются.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroups {
    pub x: u32,
    pub y: u32,
    pub size: u32,
    pub extent: [u32; 2],
}

impl WorkGroups {
    #[must_use]
    pub fn covering(width: u32, height: u32, size: u32) -> Self {
        let size = size.max(1);
        Self {
            x: width.div_ceil(size),
            y: height.div_ceil(size),
            size,
            extent: [width, height],
        }
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.extent[0] % self.size == 0 && self.extent[1] % self.size == 0
    }
}

/// Имена слотов ядра; индекс имени совпадает с индексом в [`Invocation`]
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelLayout {
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    pub buffers: &'static [&'static str],
}

/// Вычислительное ядро, вызываемое один раз на пиксель сетки
pub trait Kernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn layout(&self) -> KernelLayout;

    fn invoke(&self, id: [u32; 2], ctx: &Invocation<'_>);
}

/// Привязки ресурсов к слотам ядра по именам
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    inputs: Vec<(&'static str, Surface)>,
    outputs: Vec<(&'static str, Surface)>,
    buffers: Vec<(&'static str, Buffer)>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input(mut self, slot: &'static str, surface: Surface) -> Self {
        self.inputs.push((slot, surface));
        self
    }

    #[must_use]
    pub fn output(mut self, slot: &'static str, surface: Surface) -> Self {
        self.outputs.push((slot, surface));
        self
    }

    #[must_use]
    pub fn buffer(mut self, slot: &'static str, buffer: Buffer) -> Self {
        self.buffers.push((slot, buffer));
        self
    }

    /// Раскладывает привязки в порядке слотов ядра
    pub(crate) fn resolve(&self, kernel: &dyn Kernel) -> Result<ResolvedBindings> {
        let layout = kernel.layout();
        let pick = |slots: &'static [&'static str], bound: &[(&'static str, u32)]| {
            slots
                .iter()
                .map(|&slot| {
                    bound
                        .iter()
                        .rev()
                        .find(|(name, _)| *name == slot)
                        .map(|&(_, id)| id)
                        .ok_or(BorderError::UnboundSlot {
                            kernel: kernel.name(),
                            slot,
                        })
                })
                .collect::<Result<Vec<u32>>>()
        };
        let inputs: Vec<_> = self.inputs.iter().map(|&(n, s)| (n, s.0)).collect();
        let outputs: Vec<_> = self.outputs.iter().map(|&(n, s)| (n, s.0)).collect();
        let buffers: Vec<_> = self.buffers.iter().map(|&(n, b)| (n, b.0)).collect();
        Ok(ResolvedBindings {
            inputs: pick(layout.inputs, &inputs)?,
            outputs: pick(layout.outputs, &outputs)?,
            buffers: pick(layout.buffers, &buffers)?,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedBindings {
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
    pub buffers: Vec<u32>,
}

/// Набор возможностей вычислительного устройства
///
/// Методы, помеченные как «в очередь», только записывают команду; чтения
/// (`read_*`) и `flush` блокируют вызывающий поток до завершения всей
/// поставленной работы.
///
/// Реализация для `&mut T` позволяет отдать конвейеру устройство во временное
/// пользование и сохранить его, если инициализация не удалась.
pub trait ComputeDevice: Send {
    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<Surface>;

    /// Выделяет поверхность `Rgba8Unorm` и заполняет её содержимым текстуры
    fn upload_texture(&mut self, label: &'static str, texture: &Texture2D<Rgba8>) -> Result<Surface>;

    /// Append-буфер из пар `f32` с атомарным счётчиком
    fn create_append_buffer(&mut self, label: &'static str, capacity: usize) -> Result<Buffer>;

    /// Буфер косвенных аргументов из четырёх слов
    fn create_args_buffer(&mut self, label: &'static str) -> Result<Buffer>;

    /// В очередь: установить счётчик append-буфера
    fn set_counter(&mut self, buffer: Buffer, value: u32) -> Result<()>;

    /// В очередь: записать слова буфера аргументов
    fn write_args(&mut self, buffer: Buffer, words: [u32; 4]) -> Result<()>;

    /// В очередь: скопировать счётчик append-буфера в слово `word` буфера аргументов
    fn copy_count(&mut self, src: Buffer, dst: Buffer, word: usize) -> Result<()>;

    /// В очередь: запустить ядро. Привязки проверяются сразу.
    fn dispatch(&mut self, kernel: Arc<dyn Kernel>, bindings: &Bindings, groups: WorkGroups) -> Result<()>;

    /// Точка синхронизации: исполняет всю очередь
    fn flush(&mut self) -> Result<()>;

    fn read_surface_rgba8(&mut self, surface: Surface) -> Result<Texture2D<Rgba8>>;

    fn read_surface_f32(&mut self, surface: Surface) -> Result<Texture2D<[f32; 4]>>;

    fn read_args(&mut self, buffer: Buffer) -> Result<[u32; 4]>;

    /// Читает первые `count` элементов append-буфера
    fn read_append(&mut self, buffer: Buffer, count: usize) -> Result<Vec<[f32; 2]>>;

    fn surface_desc(&self, surface: Surface) -> Result<SurfaceDesc>;

    fn release_surface(&mut self, surface: Surface) -> Result<()>;

    fn release_buffer(&mut self, buffer: Buffer) -> Result<()>;
}

impl<T: ComputeDevice + ?Sized> ComputeDevice for &mut T {
    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<Surface> {
        (**self).create_surface(desc)
    }

    fn upload_texture(&mut self, label: &'static str, texture: &Texture2D<Rgba8>) -> Result<Surface> {
        (**self).upload_texture(label, texture)
    }

    fn create_append_buffer(&mut self, label: &'static str, capacity: usize) -> Result<Buffer> {
        (**self).create_append_buffer(label, capacity)
    }

    fn create_args_buffer(&mut self, label: &'static str) -> Result<Buffer> {
        (**self).create_args_buffer(label)
    }

    fn set_counter(&mut self, buffer: Buffer, value: u32) -> Result<()> {
        (**self).set_counter(buffer, value)
    }

    fn write_args(&mut self, buffer: Buffer, words: [u32; 4]) -> Result<()> {
        (**self).write_args(buffer, words)
    }

    fn copy_count(&mut self, src: Buffer, dst: Buffer, word: usize) -> Result<()> {
        (**self).copy_count(src, dst, word)
    }

    fn dispatch(&mut self, kernel: Arc<dyn Kernel>, bindings: &Bindings, groups: WorkGroups) -> Result<()> {
        (**self).dispatch(kernel, bindings, groups)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn read_surface_rgba8(&mut self, surface: Surface) -> Result<Texture2D<Rgba8>> {
        (**self).read_surface_rgba8(surface)
    }

    fn read_surface_f32(&mut self, surface: Surface) -> Result<Texture2D<[f32; 4]>> {
        (**self).read_surface_f32(surface)
    }

    fn read_args(&mut self, buffer: Buffer) -> Result<[u32; 4]> {
        (**self).read_args(buffer)
    }

    fn read_append(&mut self, buffer: Buffer, count: usize) -> Result<Vec<[f32; 2]>> {
        (**self).read_append(buffer, count)
    }

    fn surface_desc(&self, surface: Surface) -> Result<SurfaceDesc> {
        (**self).surface_desc(surface)
    }

    fn release_surface(&mut self, surface: Surface) -> Result<()> {
        (**self).release_surface(surface)
    }

    fn release_buffer(&mut self, buffer: Buffer) -> Result<()> {
        (**self).release_buffer(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_groups_cover_partial_tiles() {
        let g = WorkGroups::covering(100, 64, 32);
        assert_eq!((g.x, g.y), (4, 2));
        assert!(!g.is_exact());
        assert!(WorkGroups::covering(64, 64, 32).is_exact());
    }
}
