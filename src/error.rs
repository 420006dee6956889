//! Erreurs du relocateur
//!
//! Toutes les violations d'invariants sont fatales : le pipeline s'arrête et
//! aucune image n'est écrite. Les variantes suivent trois familles :
//! format (données de l'image), capacité (place insuffisante) et
//! configuration (erreur d'intégration ou de programmation).

use thiserror::Error;

/// Erreur du relocateur
#[derive(Debug, Error)]
pub enum RelocError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Données de l'image mal formées
    #[error("format error at {location}: {message}")]
    Format { location: String, message: String },

    /// Accès hors d'un buffer
    #[error("out of bounds access: {offset:#x}+{size} past buffer of {len:#x} bytes")]
    OutOfBounds { offset: usize, size: usize, len: usize },

    /// Une adresse VROM ne correspond pas à exactement un fichier
    #[error("VROM {vrom:#010x} matches {matches} files (expected exactly 1)")]
    VromLookup { vrom: u32, matches: usize },

    /// Aucune plage libre ne peut satisfaire l'allocation
    #[error("out of space: cannot allocate {size:#x} bytes aligned to {align:#x}")]
    OutOfSpace { size: u32, align: u32 },

    /// Un fichier fixe a changé de taille
    #[error("fixed file {name} was resized: range holds {expected:#x} bytes, data is {found:#x} bytes")]
    FixedFileResized {
        name: String,
        expected: u32,
        found: usize,
    },

    /// Table ou espace plein
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Erreur de configuration ou d'intégration
    #[error("configuration error: {0}")]
    Config(String),

    /// Erreur annotée avec son contexte (événement, tâche...)
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<RelocError>,
    },
}

pub type Result<T> = std::result::Result<T, RelocError>;

impl RelocError {
    pub fn format(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::Capacity(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Enveloppe l'erreur dans un contexte lisible
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Retourne l'erreur d'origine sous les couches de contexte
    pub fn root(&self) -> &RelocError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}
