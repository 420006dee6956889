//! Modules de tables et orchestration
//!
//! - `orchestrator` : ordre d'enregistrement, événements et écouteurs
//! - `context` : état partagé (`Rom`, données des modules, dump)

pub mod context;
pub mod orchestrator;

pub use context::*;
pub use orchestrator::*;

use crate::tables::{actor_overlay_table, object_table, scene_headers, scene_table};

/// Modules intégrés, dans leur ordre de chargement
pub fn builtin_modules() -> Vec<ModuleInfo> {
    vec![
        object_table::module_info(),
        actor_overlay_table::module_info(),
        scene_headers::module_info(),
        scene_table::module_info(),
    ]
}
