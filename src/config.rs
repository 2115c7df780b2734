// src/config.rs
//! Конфигурация конвейера границ
//!
//! Параметры, управляющие построением палитры, поля расстояний и разбиением
//! на рабочие группы. Все структуры читаются из TOML; отсутствующие поля
//! получают значения по умолчанию, совпадающие с эталонной настройкой карты
//! (шаги JFA 32…1, отсечка 16 пикселей, группы 32×32).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BorderError, Result};

/// Что делать с картой, размер которой не кратен рабочей группе
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TilePolicy {
    /// Запускать покрывающую сетку групп и пропускать вызовы за краем карты
    #[default]
    Mask,
    /// Считать такой размер ошибкой конфигурации
    Reject,
}

/// Настройки прохода JFA
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistanceSettings {
    /// Максимальное расстояние до границы (в пикселях), которое ещё кодируется;
    /// всё, что дальше, получает максимальное значение.
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,

    /// Первый (наибольший) шаг JFA; должен быть степенью двойки.
    /// Последовательность шагов: `initial_step, initial_step / 2, …, 1`.
    #[serde(default = "default_initial_step")]
    pub initial_step: u32,

    /// Радиус финального размытия (0 = без размытия)
    #[serde(default = "default_blur_radius")]
    pub blur_radius: u32,
}

fn default_max_distance() -> f32 {
    16.0
}
fn default_initial_step() -> u32 {
    32
}
fn default_blur_radius() -> u32 {
    1
}

impl Default for DistanceSettings {
    fn default() -> Self {
        Self {
            max_distance: 16.0,
            initial_step: 32,
            blur_radius: 1,
        }
    }
}

impl DistanceSettings {
    /// Убывающая последовательность шагов: 32, 16, 8, 4, 2, 1
    #[must_use]
    pub fn steps(&self) -> Vec<u32> {
        std::iter::successors(Some(self.initial_step.max(1)), |&s| (s > 1).then_some(s / 2))
            .collect()
    }

    /// Минимальное число итераций для заданной отсечки: `ceil(log2(N)) + 1`
    #[must_use]
    pub fn required_iterations(&self) -> usize {
        self.max_distance.max(1.0).log2().ceil() as usize + 1
    }
}

/// Полная конфигурация одного запуска
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorderConfig {
    /// Карта идентификаторов провинций (PNG)
    #[serde(default)]
    pub identifier_path: Option<PathBuf>,

    /// Текстура соответствия «пиксель → ячейка палитры» (PNG)
    #[serde(default)]
    pub lookup_path: Option<PathBuf>,

    /// Каталог для результатов CLI
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Сторона квадратной рабочей группы в пикселях
    #[serde(default = "default_workgroup_size")]
    pub workgroup_size: u32,

    #[serde(default)]
    pub tile_policy: TilePolicy,

    /// Число потоков пула rayon (по умолчанию глобальный пул)
    #[serde(default)]
    pub threads: Option<usize>,

    #[serde(default)]
    pub distance: DistanceSettings,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_workgroup_size() -> u32 {
    32
}

impl Default for BorderConfig {
    fn default() -> Self {
        Self {
            identifier_path: None,
            lookup_path: None,
            output_dir: default_output_dir(),
            workgroup_size: 32,
            tile_policy: TilePolicy::Mask,
            threads: None,
            distance: DistanceSettings::default(),
        }
    }
}

impl BorderConfig {
    /// Загружает конфигурацию из TOML-файла и проверяет её
    ///
    /// # Пример
    /// ```toml
    /// # border.toml
    /// identifier_path = "provinces.png"
    /// lookup_path = "lookup.png"
    /// tile_policy = "Reject"
    ///
    /// [distance]
    /// max_distance = 16.0
    /// initial_step = 32
    /// ```
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| BorderError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workgroup_size == 0 {
            return Err(BorderError::InvalidConfig(
                "workgroup_size must be positive".into(),
            ));
        }
        if !self.distance.initial_step.is_power_of_two() {
            return Err(BorderError::InvalidConfig(format!(
                "initial_step {} is not a power of two",
                self.distance.initial_step
            )));
        }
        if !self.distance.max_distance.is_finite() || self.distance.max_distance <= 0.0 {
            return Err(BorderError::InvalidConfig(format!(
                "max_distance {} must be a positive number",
                self.distance.max_distance
            )));
        }
        if self.threads == Some(0) {
            return Err(BorderError::InvalidConfig("threads must be positive".into()));
        }
        if self.distance.steps().len() < self.distance.required_iterations() {
            tracing::warn!(
                steps = self.distance.steps().len(),
                required = self.distance.required_iterations(),
                "последовательность шагов JFA короче, чем нужно для max_distance"
            );
        }
        Ok(())
    }

    /// Собственный пул rayon на `threads` потоков
    ///
    /// `None` означает глобальный пул. Все CPU-проходы конвейера и запуски
    /// ядер программного устройства исполняются внутри этого пула.
    pub fn thread_pool(&self) -> Result<Option<rayon::ThreadPool>> {
        self.threads
            .map(|threads| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("borderfield-{i}"))
                    .build()
                    .map_err(|e| BorderError::InvalidConfig(format!("thread pool: {e}")))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_steps_halve_down_to_one() {
        let d = DistanceSettings::default();
        assert_eq!(d.steps(), vec![32, 16, 8, 4, 2, 1]);
        assert_eq!(d.required_iterations(), 5);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = BorderConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.workgroup_size, 32);
        assert_eq!(cfg.tile_policy, TilePolicy::Mask);
        assert_eq!(cfg.distance, DistanceSettings::default());
    }

    #[test]
    fn partial_toml_overrides_selected_fields() {
        let cfg = BorderConfig::from_toml_str(
            r#"
            identifier_path = "ids.png"
            tile_policy = "Reject"
            [distance]
            initial_step = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.identifier_path, Some(PathBuf::from("ids.png")));
        assert_eq!(cfg.tile_policy, TilePolicy::Reject);
        assert_eq!(cfg.distance.steps(), vec![8, 4, 2, 1]);
        assert_eq!(cfg.distance.max_distance, 16.0);
    }

    #[test]
    fn non_power_of_two_step_is_rejected() {
        let err = BorderConfig::from_toml_str("[distance]\ninitial_step = 12").unwrap_err();
        assert!(matches!(err, BorderError::InvalidConfig(_)));
    }

    #[test]
    fn threads_setting_sizes_a_dedicated_pool() {
        let cfg = BorderConfig::from_toml_str("threads = 3").unwrap();
        let pool = cfg.thread_pool().unwrap().unwrap();
        assert_eq!(pool.current_num_threads(), 3);
        assert_eq!(pool.install(rayon::current_num_threads), 3);

        assert!(BorderConfig::default().thread_pool().unwrap().is_none());
        assert!(BorderConfig::from_toml_str("threads = 0").is_err());
    }
}
