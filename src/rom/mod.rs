//! Image ROM : lecture, modèle de fichiers et écriture
//!
//! - `database` : descripteurs de révisions
//! - `file` : entrées DMA et fichiers
//! - `image` : agrégat `Rom`
//! - `reader` / `writer` : découpage de l'image et sérialisation
//! - `validation` : ordre des octets et empreintes
//! - `synthetic` : images construites de toutes pièces

pub mod database;
pub mod file;
pub mod image;
pub mod reader;
pub mod synthetic;
pub mod validation;
pub mod writer;

pub use database::*;
pub use file::*;
pub use image::*;
pub use reader::*;
pub use synthetic::*;
pub use validation::*;
pub use writer::*;
