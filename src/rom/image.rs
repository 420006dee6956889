//! Agrégat `Rom` : fichiers indexés par position dans la table DMA

use log::{debug, trace};

use super::database::RevisionInfo;
use super::file::{AddressSpaces, DmaEntry, FileId, RomFile};
use crate::error::{RelocError, Result};
use crate::memory::{AddrRange, RangeAllocator, StringPool};

/// Image découpée en fichiers
#[derive(Debug, Clone)]
pub struct Rom {
    revision: RevisionInfo,
    files: Vec<RomFile>,

    /// Taille de l'image d'origine
    source_len: usize,

    /// Nombre d'entrées de la table des noms de fichiers dans `boot`
    filename_slots: usize,
}

impl Rom {
    /// Construit l'agrégat et attache les pools de chaînes à `boot` et `code`
    pub fn new(
        revision: RevisionInfo,
        mut files: Vec<RomFile>,
        source_len: usize,
        filename_slots: usize,
    ) -> Result<Self> {
        for (label, index) in [
            ("makerom", revision.dma_index_makerom),
            ("boot", revision.dma_index_boot),
            ("dmadata", revision.dma_index_dmadata),
            ("code", revision.dma_index_code),
        ] {
            if index >= files.len() {
                return Err(RelocError::format(
                    "DMA table",
                    format!(
                        "{} index {} is past the end of the table ({} entries)",
                        label,
                        index,
                        files.len()
                    ),
                ));
            }
        }

        for (index, vram_start) in [
            (revision.dma_index_boot, revision.boot_vram_start),
            (revision.dma_index_code, revision.code_vram_start),
        ] {
            let file = &mut files[index];
            if file.pool.is_none() {
                file.pool = Some(StringPool::new(vram_start));
            }
        }

        Ok(Self {
            revision,
            files,
            source_len,
            filename_slots,
        })
    }

    pub fn revision(&self) -> &RevisionInfo {
        &self.revision
    }

    pub fn files(&self) -> &[RomFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn source_len(&self) -> usize {
        self.source_len
    }

    pub fn filename_slots(&self) -> usize {
        self.filename_slots
    }

    pub fn file_ids(&self) -> impl Iterator<Item = FileId> {
        (0..self.files.len()).map(FileId)
    }

    pub fn file(&self, id: FileId) -> Result<&RomFile> {
        self.files
            .get(id.0)
            .ok_or_else(|| RelocError::config(format!("unknown file {}", id)))
    }

    pub fn file_mut(&mut self, id: FileId) -> Result<&mut RomFile> {
        self.files
            .get_mut(id.0)
            .ok_or_else(|| RelocError::config(format!("unknown file {}", id)))
    }

    pub fn makerom(&self) -> FileId {
        FileId(self.revision.dma_index_makerom)
    }

    pub fn boot(&self) -> FileId {
        FileId(self.revision.dma_index_boot)
    }

    pub fn dmadata(&self) -> FileId {
        FileId(self.revision.dma_index_dmadata)
    }

    pub fn code(&self) -> FileId {
        FileId(self.revision.dma_index_code)
    }

    /// Trouve l'unique fichier dont la plage VROM contient `vrom`
    pub fn find_file_by_vrom(&self, vrom: u32) -> Result<FileId> {
        let mut matches = self.files.iter().enumerate().filter(|(_, file)| {
            file.dma_entry
                .vrom
                .map_or(false, |range| range.contains(vrom))
        });

        match (matches.next(), matches.count()) {
            (Some((index, _)), 0) => Ok(FileId(index)),
            (first, rest) => Err(RelocError::VromLookup {
                vrom,
                matches: rest + usize::from(first.is_some()),
            }),
        }
    }

    /// Résout un champ de plage VROM d'une table.
    ///
    /// `(0, 0)` et les plages vides sont nulles ; sinon la plage doit
    /// correspondre exactement à celle d'un fichier.
    pub fn resolve_vrom_range(&self, start: u32, end: u32) -> Result<Option<FileId>> {
        if start > end {
            return Err(RelocError::format(
                format!("VROM 0x{:08X}-0x{:08X}", start, end),
                "range start is past its end",
            ));
        }
        if start == end {
            return Ok(None);
        }

        let id = self.find_file_by_vrom(start)?;
        let range = self.files[id.0].dma_entry.vrom()?;
        if range != AddrRange::new(start, end) {
            return Err(RelocError::format(
                format!("VROM 0x{:08X}-0x{:08X}", start, end),
                format!("range does not match file {} ({})", id, range),
            ));
        }
        Ok(Some(id))
    }

    /// Ajoute un nouveau fichier, déplaçable dans les deux espaces et sans
    /// adresse jusqu'à la réallocation
    pub fn insert_file(&mut self, name: impl Into<String>, data: Vec<u8>) -> FileId {
        let mut file = RomFile::new(data, DmaEntry::unplaced(name));
        file.mark_movable(AddressSpaces::all());
        self.files.push(file);

        let id = FileId(self.files.len() - 1);
        debug!("Inserted file {} ({} bytes)", id, self.files[id.0].size());
        id
    }

    /// Autorise le déplacement d'un fichier
    pub fn mark_movable(&mut self, id: FileId, spaces: AddressSpaces) -> Result<()> {
        let file = self.file_mut(id)?;
        file.mark_movable(spaces);
        trace!("{} movable in {:?}: {}", id, spaces, file.dma_entry);
        Ok(())
    }

    /// Marque tous les fichiers déplaçables en ROM, sauf ceux que la
    /// révision déclare fixes
    pub fn mark_rom_movable(&mut self) {
        for (index, file) in self.files.iter_mut().enumerate() {
            if !self.revision.fixed_rom_files.contains(&index) {
                file.moveable_rom = true;
            }
        }
    }

    /// Pool de chaînes d'un fichier
    pub fn string_pool(&self, id: FileId) -> Result<&StringPool> {
        self.file(id)?
            .pool
            .as_ref()
            .ok_or_else(|| RelocError::config(format!("file {} has no string pool", id)))
    }

    /// Donne accès simultanément au pool et aux données d'un fichier
    pub fn with_pool<R>(
        &mut self,
        id: FileId,
        f: impl FnOnce(&mut StringPool, &mut Vec<u8>) -> Result<R>,
    ) -> Result<R> {
        let file = self.file_mut(id)?;
        let pool = file
            .pool
            .as_mut()
            .ok_or_else(|| RelocError::config(format!("file {} has no string pool", id)))?;
        f(pool, &mut file.data)
    }

    /// Lit une chaîne embarquée et la marque comme consommée
    pub fn read_pool_string(&mut self, id: FileId, vram: u32) -> Result<String> {
        self.with_pool(id, |pool, data| pool.read_string(data, vram))
    }

    /// Écrit une chaîne dans le pool d'un fichier, retourne son adresse VRAM
    pub fn intern_pool_string(&mut self, id: FileId, value: &str) -> Result<u32> {
        self.with_pool(id, |pool, data| pool.intern(data, value))
    }

    /// Rend aux allocateurs l'espace de toutes les chaînes consommées
    pub fn reclaim_string_pools(&mut self) {
        for (index, file) in self.files.iter_mut().enumerate() {
            if let Some(pool) = file.pool.as_mut() {
                let strands = pool.reclaim(&file.data);
                if !strands.is_empty() {
                    debug!(
                        "{} string pool: {}",
                        FileId(index),
                        pool.allocator()
                    );
                }
            }
        }
    }

    /// Plages de l'image d'origine couvertes par aucun fichier
    pub fn unaccounted_ranges(&self) -> Vec<AddrRange> {
        let mut allocator = RangeAllocator::new();
        allocator.free(0, self.source_len.min(u32::MAX as usize) as u32);

        for file in &self.files {
            if let Ok(range) = file.rom_range() {
                allocator.alloc_range(range.start, range.end);
            }
        }

        allocator.free_ranges().to_vec()
    }
}
