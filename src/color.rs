// src/color.rs
//! Цвет RGBA8: ключ провинции и цвет отображения
//!
//! Провинции на карте идентификаторов различаются только цветом пикселя,
//! поэтому `Rgba8` используется одновременно как ключ словаря и как значение
//! текселя. На «GPU» тексели хранятся в нормализованном виде (`0.0..=1.0`),
//! и обратное преобразование обязано давать тот же байт: сравнение цветов в
//! ядрах классификации точное.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    /// Полностью прозрачный чёрный: значение «нет провинции»
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    #[must_use]
    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// Нормализованное представление, в котором цвет живёт на поверхностях устройства
    #[must_use]
    pub fn to_unorm(self) -> [f32; 4] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
            f32::from(self.a) / 255.0,
        ]
    }

    /// Обратное к [`Rgba8::to_unorm`]; значения вне `0..=1` обрезаются
    #[must_use]
    pub fn from_unorm(v: [f32; 4]) -> Self {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::new(q(v[0]), q(v[1]), q(v[2]), q(v[3]))
    }

    #[must_use]
    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[must_use]
    pub const fn from_array(v: [u8; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    /// Упаковка в одно 32-битное слово (R в младшем байте)
    #[must_use]
    pub const fn pack(self) -> u32 {
        u32::from_le_bytes(self.to_array())
    }

    #[must_use]
    pub const fn unpack(v: u32) -> Self {
        Self::from_array(v.to_le_bytes())
    }
}

impl fmt::Display for Rgba8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}
