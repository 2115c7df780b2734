// src/gpu/software.rs
//! Программное вычислительное устройство
//!
//! Исполняет ядра на CPU через rayon, сохраняя модель GPU:
//! - рабочие группы исполняются параллельно, вызовы внутри группы по порядку;
//! - тексели поверхностей и слоты append-буферов: атомарные ячейки, поэтому
//!   одновременные записи в один тексель разрешаются как «последний победил»;
//! - команды копятся в очереди и исполняются только в точке синхронизации;
//! - группы раскладываются по пулу rayon того потока, который вызвал
//!   синхронизацию; собственного пула у устройства нет.
//!
//! Устройство служит эталонной реализацией [`ComputeDevice`] и используется
//! в тестах и CLI.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use rayon::prelude::*;
use tracing::{debug, trace};

use super::{
    Bindings, Buffer, ComputeDevice, Kernel, ResolvedBindings, Surface, SurfaceDesc,
    SurfaceFormat, WorkGroups,
};
use crate::color::Rgba8;
use crate::error::{BorderError, Result};
use crate::texture::Texture2D;

fn atomic_slice<T, F: Fn() -> T>(len: usize, f: F) -> Box<[T]> {
    (0..len).map(|_| f()).collect()
}

enum Texels {
    /// Один `u32` на тексель (RGBA8, R в младшем байте)
    Packed(Box<[AtomicU32]>),
    /// Четыре `f32` (как биты `u32`) на тексель
    Float(Box<[AtomicU32]>),
}

/// Поверхность, доступная ядрам для произвольного чтения и записи
pub struct SurfaceView {
    desc: SurfaceDesc,
    texels: Texels,
}

impl SurfaceView {
    fn new(desc: SurfaceDesc) -> Self {
        let len = desc.width as usize * desc.height as usize;
        let texels = match desc.format {
            SurfaceFormat::Rgba8Unorm => Texels::Packed(atomic_slice(len, || AtomicU32::new(0))),
            SurfaceFormat::Rgba32Float => {
                Texels::Float(atomic_slice(len * 4, || AtomicU32::new(0)))
            }
        };
        Self { desc, texels }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Чтение текселя; за пределами поверхности возвращает нули
    #[must_use]
    pub fn load(&self, x: u32, y: u32) -> [f32; 4] {
        if x >= self.desc.width || y >= self.desc.height {
            return [0.0; 4];
        }
        let i = (y * self.desc.width + x) as usize;
        match &self.texels {
            Texels::Packed(t) => Rgba8::unpack(t[i].load(Ordering::Relaxed)).to_unorm(),
            Texels::Float(t) => {
                let base = i * 4;
                [0, 1, 2, 3].map(|c| f32::from_bits(t[base + c].load(Ordering::Relaxed)))
            }
        }
    }

    /// Чтение с учётом режима адресации поверхности
    #[must_use]
    pub fn fetch(&self, x: i64, y: i64) -> [f32; 4] {
        let x = self.desc.wrap.resolve(x, self.desc.width);
        let y = self.desc.wrap.resolve(y, self.desc.height);
        self.load(x, y)
    }

    /// Запись текселя; запись за пределами поверхности отбрасывается
    pub fn store(&self, x: u32, y: u32, value: [f32; 4]) {
        if x >= self.desc.width || y >= self.desc.height {
            return;
        }
        let i = (y * self.desc.width + x) as usize;
        match &self.texels {
            Texels::Packed(t) => t[i].store(Rgba8::from_unorm(value).pack(), Ordering::Relaxed),
            Texels::Float(t) => {
                let base = i * 4;
                for (c, v) in value.iter().enumerate() {
                    t[base + c].store(v.to_bits(), Ordering::Relaxed);
                }
            }
        }
    }

    fn fill_rgba8(&self, texture: &Texture2D<Rgba8>) {
        for y in 0..texture.height {
            for x in 0..texture.width {
                self.store(x, y, texture.get(x, y).to_unorm());
            }
        }
    }

    fn snapshot(&self) -> Vec<[f32; 4]> {
        (0..self.desc.height)
            .flat_map(|y| (0..self.desc.width).map(move |x| (x, y)))
            .map(|(x, y)| self.load(x, y))
            .collect()
    }
}

/// Append-буфер: атомарный счётчик и слоты фиксированной ёмкости
pub struct AppendView {
    counter: AtomicU32,
    slots: Box<[AtomicU64]>,
}

impl AppendView {
    fn new(capacity: usize) -> Self {
        Self {
            counter: AtomicU32::new(0),
            slots: atomic_slice(capacity, || AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Добавляет элемент; сверх ёмкости элемент отбрасывается
    pub fn append(&self, value: [f32; 2]) {
        let i = self.counter.fetch_add(1, Ordering::Relaxed) as usize;
        if let Some(slot) = self.slots.get(i) {
            let packed = u64::from(value[0].to_bits()) | (u64::from(value[1].to_bits()) << 32);
            slot.store(packed, Ordering::Relaxed);
        }
    }

    fn count(&self) -> u32 {
        let c = self.counter.load(Ordering::Relaxed) as usize;
        c.min(self.capacity()) as u32
    }

    fn read(&self, count: usize) -> Vec<[f32; 2]> {
        self.slots[..count.min(self.capacity())]
            .iter()
            .map(|s| {
                let v = s.load(Ordering::Relaxed);
                [f32::from_bits(v as u32), f32::from_bits((v >> 32) as u32)]
            })
            .collect()
    }
}

/// Ресурсы, привязанные к одному запуску ядра
pub struct Invocation<'a> {
    inputs: Vec<&'a SurfaceView>,
    outputs: Vec<&'a SurfaceView>,
    buffers: Vec<&'a AppendView>,
}

impl Invocation<'_> {
    #[must_use]
    pub fn input(&self, slot: usize) -> &SurfaceView {
        self.inputs[slot]
    }

    #[must_use]
    pub fn output(&self, slot: usize) -> &SurfaceView {
        self.outputs[slot]
    }

    #[must_use]
    pub fn buffer(&self, slot: usize) -> &AppendView {
        self.buffers[slot]
    }
}

enum Resource {
    Surface(SurfaceView),
    Append(AppendView),
    Args([u32; 4]),
}

enum Command {
    Dispatch {
        kernel: Arc<dyn Kernel>,
        bindings: ResolvedBindings,
        groups: WorkGroups,
    },
    SetCounter {
        buffer: u32,
        value: u32,
    },
    WriteArgs {
        buffer: u32,
        words: [u32; 4],
    },
    CopyCount {
        src: u32,
        dst: u32,
        word: usize,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Surface,
    Append,
    Args,
}

/// Вычислительное устройство на CPU
#[derive(Default)]
pub struct SoftwareDevice {
    next_id: u32,
    resources: HashMap<u32, Resource>,
    queue: Vec<Command>,
}

impl SoftwareDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Число живых ресурсов (поверхности и буферы)
    #[must_use]
    pub fn live_resources(&self) -> usize {
        self.resources.len()
    }

    /// Число команд, ожидающих синхронизации
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    fn insert(&mut self, resource: Resource) -> u32 {
        self.next_id += 1;
        self.resources.insert(self.next_id, resource);
        self.next_id
    }

    fn check(&self, id: u32, kind: Kind) -> Result<()> {
        let actual = match self.resources.get(&id) {
            Some(Resource::Surface(_)) => Kind::Surface,
            Some(Resource::Append(_)) => Kind::Append,
            Some(Resource::Args(_)) => Kind::Args,
            None => return Err(BorderError::UnknownResource(id)),
        };
        if actual == kind {
            Ok(())
        } else {
            Err(BorderError::ResourceKind(id))
        }
    }

    fn surface(&self, id: u32) -> Result<&SurfaceView> {
        match self.resources.get(&id) {
            Some(Resource::Surface(s)) => Ok(s),
            Some(_) => Err(BorderError::ResourceKind(id)),
            None => Err(BorderError::UnknownResource(id)),
        }
    }

    fn append_buffer(&self, id: u32) -> Result<&AppendView> {
        match self.resources.get(&id) {
            Some(Resource::Append(a)) => Ok(a),
            Some(_) => Err(BorderError::ResourceKind(id)),
            None => Err(BorderError::UnknownResource(id)),
        }
    }

    fn args_mut(&mut self, id: u32) -> Result<&mut [u32; 4]> {
        match self.resources.get_mut(&id) {
            Some(Resource::Args(a)) => Ok(a),
            Some(_) => Err(BorderError::ResourceKind(id)),
            None => Err(BorderError::UnknownResource(id)),
        }
    }

    fn run_dispatch(
        &self,
        kernel: &dyn Kernel,
        bindings: &ResolvedBindings,
        groups: WorkGroups,
    ) -> Result<()> {
        let ctx = Invocation {
            inputs: bindings
                .inputs
                .iter()
                .map(|&id| self.surface(id))
                .collect::<Result<_>>()?,
            outputs: bindings
                .outputs
                .iter()
                .map(|&id| self.surface(id))
                .collect::<Result<_>>()?,
            buffers: bindings
                .buffers
                .iter()
                .map(|&id| self.append_buffer(id))
                .collect::<Result<_>>()?,
        };

        debug!(
            kernel = kernel.name(),
            groups_x = groups.x,
            groups_y = groups.y,
            "запуск ядра"
        );

        let [width, height] = groups.extent;
        let size = groups.size;
        (0..groups.x * groups.y).into_par_iter().for_each(|g| {
            let gx = g % groups.x;
            let gy = g / groups.x;
            for ly in 0..size {
                let y = gy * size + ly;
                if y >= height {
                    break;
                }
                for lx in 0..size {
                    let x = gx * size + lx;
                    if x >= width {
                        break;
                    }
                    kernel.invoke([x, y], &ctx);
                }
            }
        });
        Ok(())
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Dispatch {
                kernel,
                bindings,
                groups,
            } => self.run_dispatch(kernel.as_ref(), &bindings, groups)?,
            Command::SetCounter { buffer, value } => {
                self.append_buffer(buffer)?
                    .counter
                    .store(value, Ordering::Relaxed);
            }
            Command::WriteArgs { buffer, words } => {
                *self.args_mut(buffer)? = words;
            }
            Command::CopyCount { src, dst, word } => {
                let count = self.append_buffer(src)?.count();
                trace!(src, dst, count, "копирование счётчика");
                self.args_mut(dst)?[word] = count;
            }
        }
        Ok(())
    }
}

impl ComputeDevice for SoftwareDevice {
    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<Surface> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BorderError::InvalidConfig(format!(
                "surface `{}` has zero size",
                desc.label
            )));
        }
        let id = self.insert(Resource::Surface(SurfaceView::new(*desc)));
        trace!(
            id,
            label = desc.label,
            width = desc.width,
            height = desc.height,
            "поверхность создана"
        );
        Ok(Surface(id))
    }

    fn upload_texture(&mut self, label: &'static str, texture: &Texture2D<Rgba8>) -> Result<Surface> {
        let desc = SurfaceDesc::new(label, texture.width, texture.height, SurfaceFormat::Rgba8Unorm)
            .sampling(texture.filter, texture.wrap);
        let surface = self.create_surface(&desc)?;
        self.surface(surface.0)?.fill_rgba8(texture);
        Ok(surface)
    }

    fn create_append_buffer(&mut self, label: &'static str, capacity: usize) -> Result<Buffer> {
        let id = self.insert(Resource::Append(AppendView::new(capacity)));
        trace!(id, label, capacity, "append-буфер создан");
        Ok(Buffer(id))
    }

    fn create_args_buffer(&mut self, label: &'static str) -> Result<Buffer> {
        let id = self.insert(Resource::Args([0; 4]));
        trace!(id, label, "буфер аргументов создан");
        Ok(Buffer(id))
    }

    fn set_counter(&mut self, buffer: Buffer, value: u32) -> Result<()> {
        self.check(buffer.0, Kind::Append)?;
        self.queue.push(Command::SetCounter {
            buffer: buffer.0,
            value,
        });
        Ok(())
    }

    fn write_args(&mut self, buffer: Buffer, words: [u32; 4]) -> Result<()> {
        self.check(buffer.0, Kind::Args)?;
        self.queue.push(Command::WriteArgs {
            buffer: buffer.0,
            words,
        });
        Ok(())
    }

    fn copy_count(&mut self, src: Buffer, dst: Buffer, word: usize) -> Result<()> {
        self.check(src.0, Kind::Append)?;
        self.check(dst.0, Kind::Args)?;
        if word >= 4 {
            return Err(BorderError::InvalidConfig(format!(
                "argument word {word} is out of range"
            )));
        }
        self.queue.push(Command::CopyCount {
            src: src.0,
            dst: dst.0,
            word,
        });
        Ok(())
    }

    fn dispatch(&mut self, kernel: Arc<dyn Kernel>, bindings: &Bindings, groups: WorkGroups) -> Result<()> {
        let resolved = bindings.resolve(kernel.as_ref())?;
        for &id in resolved.inputs.iter().chain(&resolved.outputs) {
            self.check(id, Kind::Surface)?;
        }
        for &id in &resolved.buffers {
            self.check(id, Kind::Append)?;
        }
        self.queue.push(Command::Dispatch {
            kernel,
            bindings: resolved,
            groups,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let queue = std::mem::take(&mut self.queue);
        if !queue.is_empty() {
            trace!(commands = queue.len(), "синхронизация");
        }
        for command in queue {
            self.execute(command)?;
        }
        Ok(())
    }

    fn read_surface_rgba8(&mut self, surface: Surface) -> Result<Texture2D<Rgba8>> {
        Ok(self.read_surface_f32(surface)?.map(Rgba8::from_unorm))
    }

    fn read_surface_f32(&mut self, surface: Surface) -> Result<Texture2D<[f32; 4]>> {
        self.flush()?;
        let view = self.surface(surface.0)?;
        let texture = Texture2D::from_raw(view.width(), view.height(), view.snapshot())?;
        Ok(texture.with_sampling(view.desc.filter, view.desc.wrap))
    }

    fn read_args(&mut self, buffer: Buffer) -> Result<[u32; 4]> {
        self.flush()?;
        Ok(*self.args_mut(buffer.0)?)
    }

    fn read_append(&mut self, buffer: Buffer, count: usize) -> Result<Vec<[f32; 2]>> {
        self.flush()?;
        Ok(self.append_buffer(buffer.0)?.read(count))
    }

    fn surface_desc(&self, surface: Surface) -> Result<SurfaceDesc> {
        Ok(self.surface(surface.0)?.desc)
    }

    fn release_surface(&mut self, surface: Surface) -> Result<()> {
        self.flush()?;
        self.check(surface.0, Kind::Surface)?;
        self.resources.remove(&surface.0);
        Ok(())
    }

    fn release_buffer(&mut self, buffer: Buffer) -> Result<()> {
        self.flush()?;
        match self.resources.get(&buffer.0) {
            Some(Resource::Append(_) | Resource::Args(_)) => {
                self.resources.remove(&buffer.0);
                Ok(())
            }
            Some(Resource::Surface(_)) => Err(BorderError::ResourceKind(buffer.0)),
            None => Err(BorderError::UnknownResource(buffer.0)),
        }
    }
}
