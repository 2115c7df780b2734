// src/province/mod.rs
//! Провинции и их реестр
//!
//! Провинция идентифицируется дважды: целым `id` и цветом на карте
//! идентификаторов. Реестр хранит провинции в одном векторе (арене) и держит
//! два индекса поверх него: по цвету и по `id`. Оба индекса меняются только
//! внутри реестра, поэтому их наборы ключей всегда совпадают и ссылаются на
//! одни и те же записи.
//!
//! Индекс арены `0` зарезервирован под фоновую провинцию. Она не попадает ни
//! в один из индексов и пропускается при агрегации.

pub mod aggregate;

use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;

use crate::classify::PixelList;
use crate::color::Rgba8;
use crate::error::{BorderError, Result};
use crate::texture::Texture2D;

/// Индекс провинции в арене реестра
pub type ProvinceIdx = usize;

/// Индекс фоновой записи
pub const BACKGROUND: ProvinceIdx = 0;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Province {
    id: u32,
    color: Rgba8,
    display_color: Rgba8,

    /// Нормализованные координаты пикселей территории (`0.0..=1.0`)
    pub pixels_x: Vec<f32>,
    pub pixels_y: Vec<f32>,

    /// Абсолютные координаты пикселей
    pub pixels_x_int: Vec<i32>,
    pub pixels_y_int: Vec<i32>,

    /// Число пикселей территории
    pub pixel_size: usize,

    /// Ограничивающий прямоугольник в нормализованных координатах;
    /// `None`, пока пиксели не собраны или территория пуста
    pub min_xy: Option<[f32; 2]>,
    pub max_xy: Option<[f32; 2]>,
}

impl Province {
    #[must_use]
    pub fn new(id: u32, color: Rgba8, display_color: Rgba8) -> Self {
        Self {
            id,
            color,
            display_color,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Цвет провинции на карте идентификаторов
    #[must_use]
    pub fn color(&self) -> Rgba8 {
        self.color
    }

    /// Текущий цвет отображения (например, цвет владельца)
    #[must_use]
    pub fn display_color(&self) -> Rgba8 {
        self.display_color
    }

    /// Сбрасывает всё, что получено из пикселей
    pub fn clear_pixels(&mut self) {
        self.pixels_x.clear();
        self.pixels_y.clear();
        self.pixels_x_int.clear();
        self.pixels_y_int.clear();
        self.pixel_size = 0;
        self.min_xy = None;
        self.max_xy = None;
    }

    /// Заполняет пиксельные поля из результата классификации
    ///
    /// Целые координаты: `round(u * width)` и `round(v * height)`, масштаб
    /// по каждой оси свой, поэтому неквадратные карты обрабатываются верно.
    pub fn apply_pixels(&mut self, pixels: PixelList, width: u32, height: u32) {
        let PixelList { xs, ys } = pixels;
        let (w, h) = (width as f32, height as f32);

        self.pixels_x_int = xs.par_iter().map(|&u| (u * w).round() as i32).collect();
        self.pixels_y_int = ys.par_iter().map(|&v| (v * h).round() as i32).collect();
        self.pixel_size = xs.len();

        let (min_x, max_x) = min_max(&xs);
        let (min_y, max_y) = min_max(&ys);
        (self.min_xy, self.max_xy) = match (min_x, max_x, min_y, max_y) {
            (Some(a), Some(b), Some(c), Some(d)) => (Some([a, c]), Some([b, d])),
            _ => (None, None),
        };

        self.pixels_x = xs;
        self.pixels_y = ys;
    }
}

fn min_max(values: &[f32]) -> (Option<f32>, Option<f32>) {
    let min = values.par_iter().copied().reduce_with(f32::min);
    let max = values.par_iter().copied().reduce_with(f32::max);
    (min, max)
}

/// Реестр провинций: арена + индексы по цвету и по `id`
#[derive(Debug, Clone)]
pub struct ProvinceRegistry {
    provinces: Vec<Province>,
    by_color: HashMap<Rgba8, ProvinceIdx>,
    by_id: HashMap<u32, ProvinceIdx>,
}

impl Default for ProvinceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvinceRegistry {
    /// Пустой реестр с фоновой записью в индексе `0`
    #[must_use]
    pub fn new() -> Self {
        Self {
            provinces: vec![Province::new(0, Rgba8::TRANSPARENT, Rgba8::TRANSPARENT)],
            by_color: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Строит реестр по уникальным цветам карты идентификаторов
    ///
    /// Провинции нумеруются с `1` в порядке возрастания цвета; цвет
    /// отображения совпадает с цветом-идентификатором. Прозрачные пиксели
    /// считаются фоном.
    #[must_use]
    pub fn from_identifier_texture(identifier: &Texture2D<Rgba8>) -> Self {
        let mut colors: Vec<Rgba8> = identifier
            .data
            .par_iter()
            .copied()
            .filter(|c| c.a != 0)
            .collect();
        colors.par_sort_unstable();
        colors.dedup();

        let mut registry = Self::new();
        for (i, color) in colors.into_iter().enumerate() {
            let idx = registry.provinces.len();
            let id = i as u32 + 1;
            registry.provinces.push(Province::new(id, color, color));
            registry.by_color.insert(color, idx);
            registry.by_id.insert(id, idx);
        }
        registry
    }

    /// Добавляет провинцию; цвет и `id` должны быть уникальны
    pub fn insert(&mut self, id: u32, color: Rgba8, display_color: Rgba8) -> Result<ProvinceIdx> {
        if self.by_color.contains_key(&color) {
            return Err(BorderError::DuplicateColor(color));
        }
        if self.by_id.contains_key(&id) {
            return Err(BorderError::DuplicateId(id));
        }
        let idx = self.provinces.len();
        self.provinces.push(Province::new(id, color, display_color));
        self.by_color.insert(color, idx);
        self.by_id.insert(id, idx);
        Ok(idx)
    }

    /// Меняет цвет отображения провинции
    ///
    /// Пиксельные данные всех провинций становятся недействительными:
    /// агрегация ищет территорию по цвету отображения.
    pub fn set_display_color(&mut self, id: u32, display_color: Rgba8) -> Result<()> {
        let idx = *self.by_id.get(&id).ok_or(BorderError::UnknownProvince(id))?;
        self.provinces[idx].display_color = display_color;
        self.invalidate_pixels();
        Ok(())
    }

    /// Сбрасывает пиксельные данные (после смены карты или раскраски)
    pub fn invalidate_pixels(&mut self) {
        self.provinces.iter_mut().for_each(Province::clear_pixels);
    }

    /// Число провинций без фоновой записи
    #[must_use]
    pub fn len(&self) -> usize {
        self.provinces.len() - 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, idx: ProvinceIdx) -> Option<&Province> {
        self.provinces.get(idx)
    }

    #[must_use]
    pub fn by_color(&self, color: Rgba8) -> Option<&Province> {
        self.by_color.get(&color).map(|&i| &self.provinces[i])
    }

    #[must_use]
    pub fn by_id(&self, id: u32) -> Option<&Province> {
        self.by_id.get(&id).map(|&i| &self.provinces[i])
    }

    #[must_use]
    pub fn index_of_color(&self, color: Rgba8) -> Option<ProvinceIdx> {
        self.by_color.get(&color).copied()
    }

    /// Все записи арены, включая фоновую
    #[must_use]
    pub fn provinces(&self) -> &[Province] {
        &self.provinces
    }

    /// Провинции без фоновой записи
    pub fn iter(&self) -> impl Iterator<Item = &Province> {
        self.provinces.iter().skip(1)
    }

    /// Изменяемый доступ к провинциям без фоновой записи.
    /// Ключи (`id`, цвет) через него изменить нельзя.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Province> {
        self.provinces.iter_mut().skip(1)
    }
}
