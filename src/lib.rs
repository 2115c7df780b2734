pub mod border;
pub mod classify;
pub mod color;
pub mod config;
pub mod display;
pub mod distance;
pub mod error;
pub mod gpu;
pub mod indirection;
pub mod pipeline;
pub mod province;
pub mod synth;
pub mod texture;

pub use border::{Border, BorderGraph};
pub use classify::PixelList;
pub use color::Rgba8;
pub use config::{BorderConfig, DistanceSettings, TilePolicy};
pub use error::{BorderError, Result};
pub use gpu::{ComputeDevice, SoftwareDevice};
pub use pipeline::{BorderPipeline, TerritorySource};
pub use province::{Province, ProvinceRegistry};
pub use texture::Texture2D;
