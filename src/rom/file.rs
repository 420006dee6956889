//! Fichiers de l'image et entrées de la table DMA

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RelocError, Result};
use crate::memory::{AddrRange, StringPool};

/// Taille d'une entrée de la table DMA
pub const DMA_ENTRY_SIZE: usize = 0x10;

/// Position d'un fichier dans la table DMA.
///
/// Les entrées de tables gardent ce handle plutôt qu'une référence : la
/// réallocation met à jour l'unique copie dans `Rom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub usize);

impl FileId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:04}", self.0)
    }
}

bitflags! {
    /// Espaces d'adresses dans lesquels un fichier peut être déplacé
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AddressSpaces: u8 {
        /// Espace virtuel (décompressé)
        const VROM = 1 << 0;

        /// Offsets physiques dans l'image
        const ROM = 1 << 1;
    }
}

/// Entrée de la table DMA
///
/// Un fichier inséré n'a pas encore d'adresses : `vrom` et `rom_start`
/// restent à `None` jusqu'à la réallocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmaEntry {
    pub vrom: Option<AddrRange>,
    pub rom_start: Option<u32>,

    /// 0 signifie "dérivé de la taille"
    pub rom_end: u32,

    pub name: Option<String>,
}

impl DmaEntry {
    pub fn new(vrom_start: u32, vrom_end: u32, rom_start: u32, rom_end: u32) -> Self {
        Self {
            vrom: Some(AddrRange::new(vrom_start, vrom_end)),
            rom_start: Some(rom_start),
            rom_end,
            name: None,
        }
    }

    /// Entrée d'un fichier pas encore placé
    pub fn unplaced(name: impl Into<String>) -> Self {
        Self {
            vrom: None,
            rom_start: None,
            rom_end: 0,
            name: Some(name.into()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_placed(&self) -> bool {
        self.vrom.is_some() && self.rom_start.is_some()
    }

    pub fn vrom(&self) -> Result<AddrRange> {
        self.vrom.ok_or_else(|| {
            RelocError::config(format!("file {} has no VROM address yet", self.display_name()))
        })
    }

    pub fn vrom_start(&self) -> Result<u32> {
        Ok(self.vrom()?.start)
    }

    pub fn vrom_end(&self) -> Result<u32> {
        Ok(self.vrom()?.end)
    }

    pub fn rom_start(&self) -> Result<u32> {
        self.rom_start.ok_or_else(|| {
            RelocError::config(format!("file {} has no ROM address yet", self.display_name()))
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("-")
    }

    /// Les quatre mots de l'entrée, dans l'ordre de la table
    pub fn to_words(&self) -> Result<[u32; 4]> {
        let vrom = self.vrom()?;
        Ok([vrom.start, vrom.end, self.rom_start()?, self.rom_end])
    }
}

impl fmt::Display for DmaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vrom {
            Some(vrom) => write!(f, "VROM {}", vrom)?,
            None => write!(f, "VROM unplaced")?,
        }
        match (self.rom_start, self.rom_end) {
            (Some(start), 0) => write!(f, " ROM 0x{:08X}", start)?,
            (Some(start), end) => write!(f, " ROM 0x{:08X}-0x{:08X}", start, end)?,
            (None, _) => write!(f, " ROM unplaced")?,
        }
        write!(f, " {}", self.display_name())
    }
}

/// Fichier de l'image
#[derive(Debug, Clone)]
pub struct RomFile {
    pub data: Vec<u8>,
    pub dma_entry: DmaEntry,
    pub moveable_rom: bool,
    pub moveable_vrom: bool,

    /// Pool de chaînes embarquées (`boot` et `code` uniquement)
    pub pool: Option<StringPool>,
}

impl RomFile {
    pub fn new(data: Vec<u8>, dma_entry: DmaEntry) -> Self {
        Self {
            data,
            dma_entry,
            moveable_rom: false,
            moveable_vrom: false,
            pool: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.dma_entry.name.as_deref()
    }

    /// Taille des données
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Plage ROM occupée par les données
    pub fn rom_range(&self) -> Result<AddrRange> {
        let start = self.dma_entry.rom_start()?;
        let end = start.checked_add(self.size()).ok_or_else(|| {
            RelocError::format(
                format!("file {}", self.dma_entry.display_name()),
                "ROM range overflows the 32-bit address space",
            )
        })?;
        Ok(AddrRange::new(start, end))
    }

    pub fn is_movable(&self, spaces: AddressSpaces) -> bool {
        (!spaces.contains(AddressSpaces::VROM) || self.moveable_vrom)
            && (!spaces.contains(AddressSpaces::ROM) || self.moveable_rom)
    }

    pub fn mark_movable(&mut self, spaces: AddressSpaces) {
        if spaces.contains(AddressSpaces::VROM) {
            self.moveable_vrom = true;
        }
        if spaces.contains(AddressSpaces::ROM) {
            self.moveable_rom = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dma_entry_display() {
        let entry = DmaEntry::new(0x1000, 0x1200, 0x3000, 0).with_name("gameplay_keep");
        assert_eq!(
            entry.to_string(),
            "VROM 0x00001000-0x00001200 ROM 0x00003000 gameplay_keep"
        );

        let explicit = DmaEntry::new(0, 0x10, 0, 0x10);
        assert_eq!(
            explicit.to_string(),
            "VROM 0x00000000-0x00000010 ROM 0x00000000-0x00000010 -"
        );
    }

    #[test]
    fn test_unplaced_entry() {
        let entry = DmaEntry::unplaced("new_file");
        assert!(!entry.is_placed());
        assert!(matches!(entry.vrom(), Err(RelocError::Config(_))));
        assert!(entry.to_words().is_err());
        assert_eq!(entry.to_string(), "VROM unplaced ROM unplaced new_file");
    }

    #[test]
    fn test_mark_movable() {
        let mut file = RomFile::new(vec![0; 0x20], DmaEntry::new(0, 0x20, 0x40, 0));
        assert!(!file.is_movable(AddressSpaces::VROM));

        file.mark_movable(AddressSpaces::VROM);
        assert!(file.is_movable(AddressSpaces::VROM));
        assert!(!file.is_movable(AddressSpaces::all()));

        file.mark_movable(AddressSpaces::ROM);
        assert!(file.is_movable(AddressSpaces::all()));
        assert_eq!(file.rom_range().unwrap(), AddrRange::new(0x40, 0x60));
    }
}
