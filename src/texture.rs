// src/texture.rs
//! CPU-текстуры и правила адресации
//!
//! [`Texture2D`]: плоский вектор текселей размером `width × height`, индекс
//! `y * width + x`, как и у остальных карт крейта. Режимы фильтрации и
//! адресации хранятся вместе с данными и переходят на поверхность при загрузке
//! текстуры на устройство.
//!
//! Здесь же живёт проверка соседей по четырём направлениям, общая для
//! инициализации JFA, поиска краевых пикселей и маски границ.

use std::path::Path;

use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::color::Rgba8;
use crate::error::{BorderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMode {
    /// Ближайший тексель
    #[default]
    Point,
    Bilinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WrapMode {
    /// Координаты за краем прижимаются к краю
    #[default]
    Clamp,
    /// Текстура повторяется (тайлинг)
    Repeat,
}

impl WrapMode {
    /// Переводит произвольную координату в диапазон `0..size`
    #[must_use]
    pub fn resolve(self, c: i64, size: u32) -> u32 {
        let size = i64::from(size.max(1));
        match self {
            WrapMode::Clamp => c.clamp(0, size - 1) as u32,
            WrapMode::Repeat => c.rem_euclid(size) as u32,
        }
    }
}

/// Соседи по четырём направлениям: (dx, dy, бит маски)
pub const NEIGHBOURS_4: [(i64, i64, u8); 4] = [
    (0, -1, NORTH),
    (1, 0, EAST),
    (0, 1, SOUTH),
    (-1, 0, WEST),
];

pub const NORTH: u8 = 0b0001;
pub const EAST: u8 = 0b0010;
pub const SOUTH: u8 = 0b0100;
pub const WEST: u8 = 0b1000;

/// Маска направлений, в которых сосед имеет другой ключ
///
/// Соседи за пределами карты не учитываются: край карты не является границей
/// провинции.
pub fn neighbour_mask<K, F>(width: u32, height: u32, x: u32, y: u32, key: F) -> u8
where
    K: PartialEq,
    F: Fn(u32, u32) -> K,
{
    let own = key(x, y);
    let mut mask = 0;
    for &(dx, dy, bit) in &NEIGHBOURS_4 {
        let nx = i64::from(x) + dx;
        let ny = i64::from(y) + dy;
        if nx < 0 || ny < 0 || nx >= i64::from(width) || ny >= i64::from(height) {
            continue;
        }
        if key(nx as u32, ny as u32) != own {
            mask |= bit;
        }
    }
    mask
}

/// Двумерная текстура в памяти CPU
#[derive(Debug, Clone, PartialEq)]
pub struct Texture2D<P = Rgba8> {
    pub width: u32,
    pub height: u32,
    /// Тексели построчно, индекс `y * width + x`
    pub data: Vec<P>,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl<P: Copy> Texture2D<P> {
    #[must_use]
    pub fn new(width: u32, height: u32, fill: P) -> Self {
        Self {
            width,
            height,
            data: vec![fill; width as usize * height as usize],
            filter: FilterMode::Point,
            wrap: WrapMode::Clamp,
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<P>) -> Result<Self> {
        if data.len() != width as usize * height as usize {
            return Err(BorderError::ImageBuffer { width, height });
        }
        Ok(Self {
            width,
            height,
            data,
            filter: FilterMode::Point,
            wrap: WrapMode::Clamp,
        })
    }

    #[must_use]
    pub fn with_sampling(mut self, filter: FilterMode, wrap: WrapMode) -> Self {
        self.filter = filter;
        self.wrap = wrap;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> P {
        self.data[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: P) {
        self.data[(y * self.width + x) as usize] = value;
    }

    pub fn map<Q, F: Fn(P) -> Q>(&self, f: F) -> Texture2D<Q> {
        Texture2D {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&p| f(p)).collect(),
            filter: self.filter,
            wrap: self.wrap,
        }
    }
}

impl Texture2D<Rgba8> {
    #[must_use]
    pub fn from_image(img: &RgbaImage) -> Self {
        let data = img.pixels().map(|p| Rgba8::from_array(p.0)).collect();
        Self {
            width: img.width(),
            height: img.height(),
            data,
            filter: FilterMode::Point,
            wrap: WrapMode::Clamp,
        }
    }

    pub fn to_image(&self) -> Result<RgbaImage> {
        let raw: Vec<u8> = self.data.iter().flat_map(|c| c.to_array()).collect();
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(self.width, self.height, raw).ok_or(
            BorderError::ImageBuffer {
                width: self.width,
                height: self.height,
            },
        )
    }

    pub fn load_png(path: impl AsRef<Path>) -> Result<Self> {
        let img = image::open(path)?.to_rgba8();
        Ok(Self::from_image(&img))
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_image()?.save(path)?;
        Ok(())
    }
}

impl Texture2D<[f32; 4]> {
    /// Сохраняет поле в PNG, квантуя каналы в `0..=255`
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        self.map(Rgba8::from_unorm).save_png(path)
    }
}

impl Texture2D<u8> {
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let img: ImageBuffer<image::Luma<u8>, Vec<u8>> =
            ImageBuffer::from_raw(self.width, self.height, self.data.clone()).ok_or(
                BorderError::ImageBuffer {
                    width: self.width,
                    height: self.height,
                },
            )?;
        img.save(path)?;
        Ok(())
    }
}
