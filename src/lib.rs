//! z64-relocator - Relocateur de fichiers pour images N64 (Ocarina of Time)
//!
//! Cette bibliothèque découpe une image selon sa table DMA, décode les
//! tables qui référencent des fichiers par plage VROM, replace les fichiers
//! déplaçables en VROM et en ROM, puis réécrit tables et image.

pub mod config;
pub mod error;
pub mod memory;
pub mod modules;
pub mod realloc;
pub mod relocator;
pub mod rom;
pub mod tables;

pub use config::*;
pub use error::{RelocError, Result};
pub use memory::*;
pub use modules::*;
pub use realloc::*;
pub use relocator::*;
pub use rom::*;

/// Version du relocateur
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
