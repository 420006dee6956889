//! Lecture de la table DMA et découpage de l'image en fichiers

use log::{debug, info};

use super::database::RevisionInfo;
use super::file::{DmaEntry, RomFile, DMA_ENTRY_SIZE};
use super::image::Rom;
use crate::error::{RelocError, Result};
use crate::memory::{AddrRange, BufferInterface, StringPool};

/// Lecteur d'image brute
pub struct RomReader<'a> {
    revision: &'a RevisionInfo,
    data: &'a [u8],
}

impl<'a> RomReader<'a> {
    pub fn new(revision: &'a RevisionInfo, data: &'a [u8]) -> Self {
        Self { revision, data }
    }

    /// Découpe l'image selon la table DMA
    pub fn read(self) -> Result<Rom> {
        let revision = self.revision;

        // dmadata est lu en premier pour connaître la taille de la table
        let dmadata =
            self.read_entry(revision.dmadata_rom_start as usize, revision.dma_index_dmadata)?;
        let dmadata_start = dmadata.rom_start()?;
        if dmadata_start != revision.dmadata_rom_start {
            return Err(RelocError::format(
                format!("DMA entry {}", revision.dma_index_dmadata),
                format!(
                    "dmadata entry points at ROM 0x{:08X}, expected 0x{:08X}",
                    dmadata_start, revision.dmadata_rom_start
                ),
            ));
        }
        let dmadata_range = self.rom_range(revision.dma_index_dmadata, &dmadata)?;

        // boot ensuite, pour les noms de fichiers
        let boot = self.read_entry(dmadata_start as usize, revision.dma_index_boot)?;
        let boot_range = self.rom_range(revision.dma_index_boot, &boot)?;
        let boot_data = &self.data[boot_range.start as usize..boot_range.end as usize];
        let mut boot_pool = StringPool::new(revision.boot_vram_start);

        let mut files = Vec::new();
        let mut offset = dmadata_range.start as usize;
        while offset + DMA_ENTRY_SIZE <= dmadata_range.end as usize {
            let index = files.len();
            let words = self.read_words(offset)?;
            if words == [0; 4] {
                break;
            }

            let mut entry = self.decode_entry(index, words)?;
            let range = self.rom_range(index, &entry)?;

            if let Some(table_offset) = revision.dma_table_filenames_boot_offset {
                let pointer = boot_data
                    .read_u32(table_offset as usize + index * 4)
                    .map_err(|e| e.context(format!("filename pointer of DMA entry {}", index)))?;
                if pointer != 0 {
                    let name = boot_pool
                        .read_string(boot_data, pointer)
                        .map_err(|e| e.context(format!("filename of DMA entry {}", index)))?;
                    entry.name = Some(name);
                }
            }

            debug!("{:04} {}", index, entry);
            let data = self.data[range.start as usize..range.end as usize].to_vec();
            files.push(RomFile::new(data, entry));
            offset += DMA_ENTRY_SIZE;
        }

        info!("DMA table: {} files", files.len());

        let filename_slots = if revision.dma_table_filenames_boot_offset.is_some() {
            files.len()
        } else {
            0
        };

        if let Some(file) = files.get_mut(revision.dma_index_boot) {
            file.pool = Some(boot_pool);
        }

        Rom::new(revision.clone(), files, self.data.len(), filename_slots)
    }

    fn read_words(&self, offset: usize) -> Result<[u32; 4]> {
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.data.read_u32(offset + i * 4)?;
        }
        Ok(words)
    }

    /// Lit l'entrée `index` d'une table commençant à `table_start`
    fn read_entry(&self, table_start: usize, index: usize) -> Result<DmaEntry> {
        let words = self
            .read_words(table_start + index * DMA_ENTRY_SIZE)
            .map_err(|e| e.context(format!("DMA entry {}", index)))?;
        self.decode_entry(index, words)
    }

    fn decode_entry(&self, index: usize, words: [u32; 4]) -> Result<DmaEntry> {
        let [vrom_start, vrom_end, rom_start, rom_end] = words;
        if vrom_start > vrom_end {
            return Err(RelocError::format(
                format!("DMA entry {}", index),
                format!("vrom_start 0x{:08X} > vrom_end 0x{:08X}", vrom_start, vrom_end),
            ));
        }

        // les entrées compressées ont rom_end != 0 et une taille ROM différente
        if rom_end != 0 && rom_end.wrapping_sub(rom_start) != vrom_end - vrom_start {
            return Err(RelocError::format(
                format!("DMA entry {}", index),
                "compressed files are not supported",
            ));
        }

        Ok(DmaEntry::new(vrom_start, vrom_end, rom_start, rom_end))
    }

    /// Plage ROM des données du fichier, vérifiée contre la taille de l'image
    fn rom_range(&self, index: usize, entry: &DmaEntry) -> Result<AddrRange> {
        let start = entry.rom_start()?;
        let size = entry.vrom()?.len();
        match start.checked_add(size) {
            Some(end) if end as usize <= self.data.len() => Ok(AddrRange::new(start, end)),
            _ => Err(RelocError::format(
                format!("DMA entry {}", index),
                format!(
                    "file at ROM 0x{:08X} ({:#x} bytes) runs past the end of the image ({:#x} bytes)",
                    start,
                    size,
                    self.data.len()
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::synthetic::SyntheticRom;

    #[test]
    fn test_read_synthetic_image() -> Result<()> {
        let image = SyntheticRom::new()
            .file("first", vec![0xAA; 0x30])
            .file("second", vec![0xBB; 0x18])
            .build();

        let rom = RomReader::new(&image.revision, &image.data).read()?;
        assert_eq!(rom.len(), image.revision.dma_index_code + 3);

        let first = &rom.files()[rom.len() - 2];
        assert_eq!(first.name(), Some("first"));
        assert_eq!(first.data, vec![0xAA; 0x30]);
        assert_eq!(first.dma_entry.vrom()?.len(), 0x30);

        let boot = rom.string_pool(rom.boot())?;
        assert_eq!(boot.consumed().len(), rom.len());
        assert_eq!(rom.filename_slots(), rom.len());
        Ok(())
    }

    #[test]
    fn test_read_rejects_bad_order() {
        let mut image = SyntheticRom::new().file("a", vec![1; 0x10]).build();
        let entry = image.revision.dmadata_rom_start as usize + 4 * DMA_ENTRY_SIZE;
        // vrom_end < vrom_start
        image.data[entry + 4..entry + 8].copy_from_slice(&0u32.to_be_bytes());
        image.data[entry..entry + 4].copy_from_slice(&0x100u32.to_be_bytes());

        let result = RomReader::new(&image.revision, &image.data).read();
        assert!(matches!(result, Err(RelocError::Format { .. })));
    }

    #[test]
    fn test_read_rejects_compressed_entry() {
        let mut image = SyntheticRom::new().file("a", vec![1; 0x40]).build();
        let index = image.revision.dma_index_code + 1;
        let entry = image.revision.dmadata_rom_start as usize + index * DMA_ENTRY_SIZE;
        let rom_start = u32::from_be_bytes(image.data[entry + 8..entry + 12].try_into().unwrap());
        image.data[entry + 12..entry + 16].copy_from_slice(&(rom_start + 0x20).to_be_bytes());

        let result = RomReader::new(&image.revision, &image.data).read();
        assert!(result.is_err());
    }

    #[test]
    fn test_read_without_filenames() -> Result<()> {
        let mut image = SyntheticRom::new().file("a", vec![1; 0x10]).build();
        image.revision.dma_table_filenames_boot_offset = None;

        let rom = RomReader::new(&image.revision, &image.data).read()?;
        assert!(rom.files().iter().all(|f| f.name().is_none()));
        assert_eq!(rom.filename_slots(), 0);
        assert!(rom.string_pool(rom.boot())?.consumed().is_empty());
        Ok(())
    }
}
