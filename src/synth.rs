// src/synth.rs
//! Синтетические карты провинций
//!
//! Генерирует карту идентификаторов разбиением Вороного по случайным семенам,
//! текстуру соответствия (у каждой провинции своя ячейка палитры) и реестр.
//! Генерация детерминирована: одинаковый `seed` даёт одинаковую карту.
//! Используется в тестах и командой `borderfield synth`.

use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::color::Rgba8;
use crate::error::{BorderError, Result};
use crate::indirection::{PALETTE_SIZE, lookup_texel};
use crate::province::ProvinceRegistry;
use crate::texture::Texture2D;

/// Готовые входы конвейера
#[derive(Debug, Clone)]
pub struct SyntheticMap {
    pub identifier: Texture2D<Rgba8>,
    pub lookup: Texture2D<Rgba8>,
    pub registry: ProvinceRegistry,
}

/// Ячейка палитры для провинции с индексом арены `idx`
#[must_use]
pub fn slot_for_index(idx: usize) -> [u32; 2] {
    let idx = idx as u32;
    [idx % PALETTE_SIZE, idx / PALETTE_SIZE]
}

/// Текстура соответствия для карты и реестра
///
/// Пиксель провинции получает ячейку по её индексу в арене; пиксели с
/// неизвестным цветом указывают на ячейку `(0, 0)`, которую никто не занимает.
pub fn build_lookup_texture(
    identifier: &Texture2D<Rgba8>,
    registry: &ProvinceRegistry,
) -> Result<Texture2D<Rgba8>> {
    let capacity = (PALETTE_SIZE * PALETTE_SIZE) as usize;
    if registry.len() >= capacity {
        return Err(BorderError::InvalidConfig(format!(
            "{} provinces do not fit into a {PALETTE_SIZE}x{PALETTE_SIZE} palette",
            registry.len()
        )));
    }
    let data = identifier
        .data
        .par_iter()
        .map(|&c| lookup_texel(slot_for_index(registry.index_of_color(c).unwrap_or(0))))
        .collect();
    Texture2D::from_raw(identifier.width, identifier.height, data)
}

/// Генерирует карту `width × height` из `provinces` провинций
pub fn generate(width: u32, height: u32, provinces: usize, seed: u64) -> Result<SyntheticMap> {
    if provinces == 0 || provinces > (width as usize * height as usize) {
        return Err(BorderError::InvalidConfig(format!(
            "cannot place {provinces} provinces on a {width}x{height} map"
        )));
    }
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);

    let seeds: Vec<(f32, f32)> = (0..provinces)
        .map(|_| {
            (
                rng.gen_range(0.0..width as f32),
                rng.gen_range(0.0..height as f32),
            )
        })
        .collect();

    let mut used = HashSet::new();
    let mut colors = Vec::with_capacity(provinces);
    while colors.len() < provinces {
        let c = Rgba8::opaque(rng.r#gen(), rng.r#gen(), rng.r#gen());
        if c != Rgba8::opaque(0, 0, 0) && used.insert(c) {
            colors.push(c);
        }
    }

    let data: Vec<Rgba8> = (0..width * height)
        .into_par_iter()
        .map(|i| {
            let x = (i % width) as f32 + 0.5;
            let y = (i / width) as f32 + 0.5;
            let nearest = seeds
                .iter()
                .enumerate()
                .map(|(k, &(sx, sy))| (k, (sx - x).powi(2) + (sy - y).powi(2)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map_or(0, |(k, _)| k);
            colors[nearest]
        })
        .collect();
    let identifier = Texture2D::from_raw(width, height, data)?;

    let mut registry = ProvinceRegistry::new();
    for (k, &color) in colors.iter().enumerate() {
        registry.insert(k as u32 + 1, color, color)?;
    }
    let lookup = build_lookup_texture(&identifier, &registry)?;

    Ok(SyntheticMap {
        identifier,
        lookup,
        registry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let a = generate(32, 32, 5, 7).unwrap();
        let b = generate(32, 32, 5, 7).unwrap();
        assert_eq!(a.identifier, b.identifier);
        assert_eq!(a.lookup, b.lookup);
        assert_eq!(a.registry.len(), 5);
    }

    #[test]
    fn lookup_points_each_province_at_its_own_slot() {
        let map = generate(16, 16, 3, 1).unwrap();
        for y in 0..16 {
            for x in 0..16 {
                let idx = map.registry.index_of_color(map.identifier.get(x, y)).unwrap();
                let slot = slot_for_index(idx);
                assert_eq!(map.lookup.get(x, y), lookup_texel(slot));
            }
        }
    }

    #[test]
    fn impossible_province_counts_are_rejected() {
        assert!(generate(2, 2, 0, 1).is_err());
        assert!(generate(2, 2, 5, 1).is_err());
    }
}
