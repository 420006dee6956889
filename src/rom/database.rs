//! Base de données des révisions d'image supportées
//!
//! Chaque révision décrit où se trouvent la table DMA, les fichiers
//! privilégiés et les tables structurées dans `code`. Ce sont des données :
//! aucune révision n'est codée en dur ailleurs dans la crate.

use serde::{Deserialize, Serialize};

use crate::error::{RelocError, Result};

/// Table à longueur fixe dans `code`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Offset de la table dans `code`
    pub offset: u32,

    /// Nombre d'entrées
    pub length: u32,
}

/// Table d'objets : la longueur est elle-même un mot dans `code`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTableDescriptor {
    /// Offset du mot de longueur dans `code`
    pub length_offset: u32,

    /// Offset de la table dans `code`
    pub offset: u32,

    /// Nombre maximal d'entrées
    pub max_length: u32,
}

/// Informations sur une révision d'image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    /// Identifiant court
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Hash MD5 de l'image d'origine, pour l'auto-détection
    #[serde(default)]
    pub md5: Option<String>,

    /// Offset ROM de la table DMA
    pub dmadata_rom_start: u32,

    pub dma_index_makerom: usize,
    pub dma_index_boot: usize,
    pub dma_index_dmadata: usize,
    pub dma_index_code: usize,

    /// Offset dans `boot` de la table des pointeurs de noms de fichiers
    /// (absente des images sans noms)
    #[serde(default)]
    pub dma_table_filenames_boot_offset: Option<u32>,

    pub boot_vram_start: u32,
    pub code_vram_start: u32,

    /// Fichiers jamais déplacés en ROM
    #[serde(default)]
    pub fixed_rom_files: Vec<usize>,

    #[serde(default)]
    pub object_table: Option<ObjectTableDescriptor>,

    #[serde(default)]
    pub actor_overlay_table: Option<TableDescriptor>,

    #[serde(default)]
    pub scene_table: Option<TableDescriptor>,
}

impl RevisionInfo {
    /// Ocarina of Time Master Quest, version debug
    pub fn oot_mq_debug() -> Self {
        const CODE_VRAM: u32 = 0x8001CE60;
        const BOOT_VRAM: u32 = 0x80000460;

        Self {
            name: "oot-mq-debug".to_string(),
            description: "The Legend of Zelda: Ocarina of Time Master Quest (debug)".to_string(),
            md5: Some("f0b7f35375f9cc8ca1b2d59d78e35405".to_string()),
            dmadata_rom_start: 0x012F70,
            dma_index_makerom: 0,
            dma_index_boot: 1,
            dma_index_dmadata: 2,
            dma_index_code: 28,
            // sDmaMgrFileNames (ROM 0xA06C, boot à ROM 0x1060)
            dma_table_filenames_boot_offset: Some(0x00A06C - 0x001060),
            boot_vram_start: BOOT_VRAM,
            code_vram_start: CODE_VRAM,
            // makerom, boot, dmadata, Audiobank, Audioseq, Audiotable
            fixed_rom_files: vec![0, 1, 2, 3, 4, 5],
            // gObjectTable
            object_table: Some(ObjectTableDescriptor {
                length_offset: 0x80127524 - CODE_VRAM,
                offset: 0x80127528 - CODE_VRAM,
                max_length: 402,
            }),
            // gActorOverlayTable
            actor_overlay_table: Some(TableDescriptor {
                offset: 0x801162A0 - CODE_VRAM,
                length: 471,
            }),
            // gSceneTable
            scene_table: Some(TableDescriptor {
                offset: 0x80129A10 - CODE_VRAM,
                length: 110,
            }),
        }
    }

    /// Vérifie la cohérence interne de la révision
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RelocError::config("revision name must not be empty"));
        }

        for (label, index) in [
            ("makerom", self.dma_index_makerom),
            ("boot", self.dma_index_boot),
            ("dmadata", self.dma_index_dmadata),
        ] {
            if !self.fixed_rom_files.contains(&index) {
                return Err(RelocError::config(format!(
                    "revision {}: {} (index {}) must be listed in fixed_rom_files",
                    self.name, label, index
                )));
            }
        }

        if let Some(objects) = &self.object_table {
            if objects.length_offset >= objects.offset {
                return Err(RelocError::config(format!(
                    "revision {}: object table length word must precede the table",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

/// Base de données des révisions connues
#[derive(Debug, Clone)]
pub struct RevisionDatabase {
    revisions: Vec<RevisionInfo>,
}

impl RevisionDatabase {
    /// Crée la base avec les révisions intégrées
    pub fn new() -> Self {
        Self {
            revisions: vec![RevisionInfo::oot_mq_debug()],
        }
    }

    /// Base sans aucune révision
    pub fn empty() -> Self {
        Self {
            revisions: Vec::new(),
        }
    }

    /// Ajoute une révision, en remplaçant celle de même nom
    pub fn add_revision(&mut self, revision: RevisionInfo) {
        match self.revisions.iter_mut().find(|r| r.name == revision.name) {
            Some(existing) => *existing = revision,
            None => self.revisions.push(revision),
        }
    }

    pub fn find(&self, name: &str) -> Option<&RevisionInfo> {
        self.revisions.iter().find(|r| r.name == name)
    }

    /// Trouve une révision par le MD5 de son image
    pub fn find_by_md5(&self, md5: &str) -> Option<&RevisionInfo> {
        self.revisions
            .iter()
            .find(|r| r.md5.as_deref().map_or(false, |m| m.eq_ignore_ascii_case(md5)))
    }

    pub fn list(&self) -> &[RevisionInfo] {
        &self.revisions
    }

    /// Charge des révisions supplémentaires depuis un fichier JSON
    pub fn load_from_file(&mut self, path: &str) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(path)?;
        let revisions: Vec<RevisionInfo> = serde_json::from_str(&content)?;

        for revision in revisions {
            revision.validate()?;
            self.add_revision(revision);
        }

        Ok(())
    }

    /// Sauvegarde la base dans un fichier JSON
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(&self.revisions)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for RevisionDatabase {
    fn default() -> Self {
        Self::new()
    }
}
