// src/province/aggregate.rs
//! Сбор пиксельных данных провинций
//!
//! Для каждой провинции (кроме фоновой) запрашиваются пиксели территории по
//! её цвету отображения, после чего из них выводятся число пикселей, целые
//! координаты и ограничивающий прямоугольник.
//!
//! Запрос территории передаётся замыканием, поэтому агрегация не зависит от
//! устройства и легко проверяется на подготовленных списках.

use tracing::info;

use crate::classify::PixelList;
use crate::color::Rgba8;
use crate::error::Result;
use crate::province::ProvinceRegistry;

/// Заполняет пиксельные поля всех провинций реестра
///
/// `territory` получает цвет отображения и возвращает пиксели с этим цветом.
pub fn aggregate_provinces<F>(
    registry: &mut ProvinceRegistry,
    width: u32,
    height: u32,
    mut territory: F,
) -> Result<()>
where
    F: FnMut(Rgba8) -> Result<PixelList>,
{
    let mut total = 0usize;
    let mut empty = 0usize;
    for province in registry.iter_mut() {
        let pixels = territory(province.display_color().with_alpha(255))?;
        total += pixels.len();
        if pixels.is_empty() {
            empty += 1;
        }
        province.apply_pixels(pixels, width, height);
    }
    info!(
        provinces = registry.len(),
        pixels = total,
        empty,
        "пиксели провинций собраны"
    );
    Ok(())
}
