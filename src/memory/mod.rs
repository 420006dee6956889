//! Gestion de l'espace d'adresses
//!
//! - `allocator` : plages libres et allocation alignée
//! - `interface` : accès big-endian bornés aux buffers
//! - `pool` : pools de chaînes embarquées (réclamation, réinternement)

pub mod allocator;
pub mod interface;
pub mod pool;

pub use allocator::*;
pub use interface::*;
pub use pool::*;
