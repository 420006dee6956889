//! Configuration du relocateur

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::rom::RevisionInfo;

/// Plafond par défaut des espaces VROM et ROM (64 Mo).
///
/// `DmaMgr_SendRequestImpl` refuse les adresses VROM au-delà.
pub const DEFAULT_ADDRESS_CEILING: u32 = 0x0400_0000;

/// Alignement par défaut des fichiers déplacés
pub const DEFAULT_ALIGNMENT: u32 = 0x10;

/// Configuration principale du relocateur
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocatorConfig {
    /// Nom de la révision, ou "auto" pour l'identifier par MD5
    pub revision: String,
    pub realloc: ReallocConfig,
    pub output: OutputConfig,

    /// Révisions supplémentaires, ajoutées à la base intégrée
    pub revisions: Vec<RevisionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReallocConfig {
    /// Autorise le déplacement en VROM des fichiers marqués par les tables
    pub move_vrom: bool,
    /// Autorise le déplacement en ROM de tous les fichiers non fixes
    pub move_rom: bool,
    pub max_vrom: u32,
    pub max_rom: u32,
    pub alignment: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Produit le dump JSON des tables
    pub dump_tables: bool,
    /// Liste les plages de l'image d'origine couvertes par aucun fichier
    pub log_unaccounted: bool,
}

impl Default for RelocatorConfig {
    fn default() -> Self {
        Self {
            revision: "auto".to_string(),
            realloc: ReallocConfig::default(),
            output: OutputConfig::default(),
            revisions: Vec::new(),
        }
    }
}

impl Default for ReallocConfig {
    fn default() -> Self {
        Self {
            move_vrom: true,
            move_rom: true,
            max_vrom: DEFAULT_ADDRESS_CEILING,
            max_rom: DEFAULT_ADDRESS_CEILING,
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl RelocatorConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let config: RelocatorConfig =
            toml::from_str(&contents).with_context(|| format!("parsing config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn load_or_default(path: &str) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.revision.is_empty() {
            bail!("revision must be \"auto\" or a revision name");
        }
        if self.realloc.alignment == 0 {
            bail!("realloc.alignment must be non-zero");
        }
        if self.realloc.max_vrom == 0 || self.realloc.max_rom == 0 {
            bail!("realloc.max_vrom and realloc.max_rom must be non-zero");
        }
        for revision in &self.revisions {
            revision
                .validate()
                .with_context(|| format!("revision {}", revision.name))?;
        }
        Ok(())
    }
}
