// src/display.rs
//! Карта цветов отображения
//!
//! Для каждой ячейки палитры берётся провинция по цвету-ключу из текстуры
//! косвенной адресации; в ячейку пишется её текущий цвет отображения с
//! полной непрозрачностью. Ячейка без провинции получает нули во всех
//! каналах, включая альфу.
//!
//! Проход чисто CPU-шный и не зависит от порядка ячеек. Его можно повторять
//! при каждой смене раскраски, не перестраивая палитру.

use rayon::prelude::*;
use tracing::debug;

use crate::color::Rgba8;
use crate::province::ProvinceRegistry;
use crate::texture::{FilterMode, Texture2D, WrapMode};

#[must_use]
pub fn generate_display_color_map(
    indirection: &Texture2D<Rgba8>,
    registry: &ProvinceRegistry,
) -> Texture2D<Rgba8> {
    let data: Vec<Rgba8> = indirection
        .data
        .par_iter()
        .map(|&key| match registry.by_color(key) {
            Some(province) => province.display_color().with_alpha(255),
            None => Rgba8::TRANSPARENT,
        })
        .collect();

    let hits = data.par_iter().filter(|c| c.a != 0).count();
    debug!(hits, total = data.len(), "карта цветов отображения");

    Texture2D {
        width: indirection.width,
        height: indirection.height,
        data,
        filter: FilterMode::Point,
        wrap: WrapMode::Clamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indirection::PALETTE_SIZE;

    #[test]
    fn hits_get_opaque_display_color_and_misses_are_zero() {
        let id = Rgba8::opaque(10, 10, 10);
        let unknown = Rgba8::opaque(99, 99, 99);
        let mut reg = ProvinceRegistry::new();
        reg.insert(1, id, Rgba8::new(1, 2, 3, 17)).unwrap();

        let mut indirection = Texture2D::new(PALETTE_SIZE, PALETTE_SIZE, Rgba8::TRANSPARENT);
        indirection.set(5, 5, id);
        indirection.set(6, 5, unknown);

        let map = generate_display_color_map(&indirection, &reg);
        assert_eq!(map.get(5, 5), Rgba8::opaque(1, 2, 3));
        assert_eq!(map.get(6, 5), Rgba8::TRANSPARENT);
        assert_eq!(map.get(0, 0), Rgba8::TRANSPARENT);
        assert_eq!(map.data.len(), 65_536);
    }

    #[test]
    fn recoloring_changes_only_the_display_map() {
        let id = Rgba8::opaque(10, 10, 10);
        let mut reg = ProvinceRegistry::new();
        reg.insert(4, id, id).unwrap();
        let mut indirection = Texture2D::new(PALETTE_SIZE, PALETTE_SIZE, Rgba8::TRANSPARENT);
        indirection.set(1, 2, id);

        let before = generate_display_color_map(&indirection, &reg);
        reg.set_display_color(4, Rgba8::opaque(0, 0, 255)).unwrap();
        let after = generate_display_color_map(&indirection, &reg);
        assert_eq!(before.get(1, 2), id);
        assert_eq!(after.get(1, 2), Rgba8::opaque(0, 0, 255));
    }
}
