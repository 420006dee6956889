//! Sérialisation : table DMA, table des noms de fichiers et image finale

use log::{debug, info};

use super::file::DMA_ENTRY_SIZE;
use super::image::Rom;
use crate::error::{RelocError, Result};
use crate::memory::BufferInterface;

/// Réécrit la table des pointeurs de noms de fichiers dans `boot`.
///
/// Les noms sont réinternés dans l'espace réclamé du pool de `boot`. La
/// table ne peut pas dépasser son nombre d'entrées d'origine.
pub fn pack_dma_filenames(rom: &mut Rom) -> Result<()> {
    let Some(table_offset) = rom.revision().dma_table_filenames_boot_offset else {
        debug!("No DMA filename table for this revision");
        return Ok(());
    };

    if rom.len() > rom.filename_slots() {
        return Err(RelocError::capacity(format!(
            "DMA filename table holds {} names, the image has {} files",
            rom.filename_slots(),
            rom.len()
        )));
    }

    let names: Vec<Option<String>> = rom
        .files()
        .iter()
        .map(|file| file.dma_entry.name.clone())
        .collect();

    let boot = rom.boot();
    let mut pointers = Vec::with_capacity(names.len());
    for name in &names {
        let vram = match name {
            Some(name) => rom
                .intern_pool_string(boot, name)
                .map_err(|e| e.context("packing DMA filenames"))?,
            None => 0,
        };
        pointers.push(vram);
    }

    let boot_data = &mut rom.file_mut(boot)?.data;
    for (i, vram) in pointers.into_iter().enumerate() {
        boot_data.write_u32(table_offset as usize + i * 4, vram)?;
    }

    debug!("DMA filename table: {} names packed", names.len());
    Ok(())
}

/// Réécrit la table DMA dans `dmadata`.
///
/// Les emplacements non utilisés sont remis à zéro.
pub fn pack_dma_table(rom: &mut Rom) -> Result<()> {
    let dmadata = rom.dmadata();
    let size = rom.file(dmadata)?.data.len();
    let capacity = size / DMA_ENTRY_SIZE;

    if rom.len() > capacity {
        return Err(RelocError::capacity(format!(
            "DMA table holds {} entries, the image has {} files",
            capacity,
            rom.len()
        )));
    }

    let mut table = vec![0u8; size];
    for (i, file) in rom.files().iter().enumerate() {
        let words = file
            .dma_entry
            .to_words()
            .map_err(|e| e.context(format!("DMA entry {}", i)))?;
        for (w, word) in words.iter().enumerate() {
            table.write_u32(i * DMA_ENTRY_SIZE + w * 4, *word)?;
        }
        debug!("{:04} {}", i, file.dma_entry);
    }

    rom.file_mut(dmadata)?.data = table;
    info!("Built DMA table: {} of {} entries used", rom.len(), capacity);
    Ok(())
}

/// Assemble l'image de sortie.
///
/// Le buffer est rempli de zéros et dimensionné au maximum de
/// `rom_start + len` ; chaque fichier est copié à sa plage ROM.
pub fn build_image(rom: &Rom) -> Result<Vec<u8>> {
    let mut size = 0usize;
    for file in rom.files() {
        size = size.max(file.rom_range()?.end as usize);
    }

    let mut image = vec![0u8; size];
    for file in rom.files() {
        let range = file.rom_range()?;
        image.write_block(range.start as usize, &file.data)?;
    }

    info!("Output image: {:#x} bytes", size);
    Ok(image)
}
