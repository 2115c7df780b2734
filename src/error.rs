// src/error.rs
//! Ошибки конвейера границ
//!
//! Все ошибки библиотеки сводятся к одному перечислению [`BorderError`].
//! Ошибки конфигурации (нет входной текстуры, не привязан слот ядра, размер
//! не кратен рабочей группе) обнаруживаются до запуска вычислений и считаются
//! фатальными: повторять операцию бессмысленно.

use std::path::PathBuf;

use thiserror::Error;

use crate::color::Rgba8;

pub type Result<T> = std::result::Result<T, BorderError>;

#[derive(Debug, Error)]
pub enum BorderError {
    #[error("missing input texture: {0}")]
    MissingTexture(&'static str),

    #[error("texture `{name}` is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        name: &'static str,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("map size {width}x{height} is not a multiple of the {group}x{group} work-group")]
    UnalignedDimensions { width: u32, height: u32, group: u32 },

    #[error("kernel `{kernel}` dispatched without a binding for slot `{slot}`")]
    UnboundSlot {
        kernel: &'static str,
        slot: &'static str,
    },

    #[error("unknown or released GPU resource #{0}")]
    UnknownResource(u32),

    #[error("resource #{0} has the wrong kind for this operation")]
    ResourceKind(u32),

    #[error("duplicate province color {0}")]
    DuplicateColor(Rgba8),

    #[error("duplicate province id {0}")]
    DuplicateId(u32),

    #[error("unknown province id {0}")]
    UnknownProvince(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to build image buffer {width}x{height}")]
    ImageBuffer { width: u32, height: u32 },
}
