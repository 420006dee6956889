//! Réallocation des fichiers déplaçables
//!
//! Deux passes indépendantes, VROM puis ROM. Pour chaque espace, l'espace
//! libre part de `[0, plafond)`, les fichiers fixes en sont retirés, puis les
//! fichiers déplaçables sont placés du plus grand au plus petit. Ce placement
//! glouton n'est pas un bin packing optimal.

use log::{debug, info, trace};

use crate::config::ReallocConfig;
use crate::error::{RelocError, Result};
use crate::memory::{AddrRange, RangeAllocator};
use crate::rom::{AddressSpaces, FileId, Rom, RomFile};

/// Moteur de réallocation
pub struct ReallocEngine<'a> {
    config: &'a ReallocConfig,
}

impl<'a> ReallocEngine<'a> {
    pub fn new(config: &'a ReallocConfig) -> Self {
        Self { config }
    }

    /// Réalloue la VROM puis la ROM
    pub fn run(&self, rom: &mut Rom) -> Result<()> {
        let moved_vrom = self.realloc_vrom(rom)?;
        let moved_rom = self.realloc_rom(rom)?;
        info!(
            "Reallocation done: {} files moved in VROM, {} in ROM",
            moved_vrom.len(),
            moved_rom.len()
        );
        Ok(())
    }

    /// Place les fichiers déplaçables en VROM, retourne les fichiers placés
    pub fn realloc_vrom(&self, rom: &mut Rom) -> Result<Vec<FileId>> {
        self.realloc_space(rom, AddressSpaces::VROM)
    }

    /// Place les fichiers déplaçables en ROM ; `rom_end` est remis à 0
    pub fn realloc_rom(&self, rom: &mut Rom) -> Result<Vec<FileId>> {
        self.realloc_space(rom, AddressSpaces::ROM)
    }

    /// Un fichier non placé est toujours déplacé, quels que soient les
    /// interrupteurs de la configuration
    fn is_movable(&self, file: &RomFile, space: AddressSpaces) -> bool {
        if space == AddressSpaces::VROM {
            file.dma_entry.vrom.is_none() || (self.config.move_vrom && file.moveable_vrom)
        } else {
            file.dma_entry.rom_start.is_none() || (self.config.move_rom && file.moveable_rom)
        }
    }

    fn ceiling(&self, space: AddressSpaces) -> u32 {
        if space == AddressSpaces::VROM {
            self.config.max_vrom
        } else {
            self.config.max_rom
        }
    }

    /// Plage occupée par un fichier fixe, après vérification de sa taille
    fn fixed_range(file: &RomFile, space: AddressSpaces) -> Result<AddrRange> {
        let range = if space == AddressSpaces::VROM {
            file.dma_entry.vrom()?
        } else if file.dma_entry.rom_end != 0 {
            AddrRange::new(file.dma_entry.rom_start()?, file.dma_entry.rom_end)
        } else {
            return file.rom_range();
        };

        if range.len() as usize != file.data.len() {
            return Err(RelocError::FixedFileResized {
                name: file.dma_entry.display_name().to_string(),
                expected: range.len(),
                found: file.data.len(),
            });
        }
        Ok(range)
    }

    fn realloc_space(&self, rom: &mut Rom, space: AddressSpaces) -> Result<Vec<FileId>> {
        let label = if space == AddressSpaces::VROM { "VROM" } else { "ROM" };

        let mut allocator = RangeAllocator::new();
        allocator.free(0, self.ceiling(space));

        let mut fixed: Vec<(AddrRange, FileId)> = Vec::new();
        let mut movable: Vec<FileId> = Vec::new();
        for (index, file) in rom.files().iter().enumerate() {
            let id = FileId(index);
            if self.is_movable(file, space) {
                if file.name().is_none() {
                    return Err(RelocError::config(format!(
                        "movable file {} has no name, {} placement would not be deterministic",
                        id, label
                    )));
                }
                movable.push(id);
            } else {
                let range = Self::fixed_range(file, space)
                    .map_err(|e| e.context(format!("fixed {} file {}", label, id)))?;
                fixed.push((range, id));
            }
        }

        check_disjoint(&mut fixed, label)?;
        for (range, _) in &fixed {
            allocator.alloc_range(range.start, range.end);
        }
        debug!("Free {} ranges: {}", label, allocator);

        // du plus grand au plus petit, puis par nom décroissant
        let files = rom.files();
        movable.sort_by(|a, b| {
            let a = &files[a.0];
            let b = &files[b.0];
            (b.data.len(), b.name()).cmp(&(a.data.len(), a.name()))
        });

        for id in &movable {
            let file = rom.file_mut(*id)?;
            let granted = allocator
                .alloc(file.size(), self.config.alignment)
                .map_err(|e| {
                    e.context(format!(
                        "placing {} in {} ({:#x} bytes)",
                        file.dma_entry.display_name(),
                        label,
                        file.data.len()
                    ))
                })?;

            if space == AddressSpaces::VROM {
                file.dma_entry.vrom = Some(granted);
            } else {
                file.dma_entry.rom_start = Some(granted.start);
                file.dma_entry.rom_end = 0;
            }
            trace!("{}> {}", label, file.dma_entry);
        }

        debug!(
            "{}: {} fixed files, {} placed, remaining {}",
            label,
            fixed.len(),
            movable.len(),
            allocator
        );
        Ok(movable)
    }
}

/// Vérifie que les fichiers fixes ne se chevauchent pas.
///
/// Les plages vides n'occupent rien et sont ignorées.
fn check_disjoint(fixed: &mut [(AddrRange, FileId)], label: &str) -> Result<()> {
    fixed.sort();
    let mut previous: Option<&(AddrRange, FileId)> = None;
    for current in fixed.iter().filter(|(range, _)| !range.is_empty()) {
        if let Some((range, id)) = previous {
            if range.overlaps(&current.0) {
                return Err(RelocError::format(
                    format!("{} {}", label, current.0),
                    format!("fixed files {} ({}) and {} overlap", id, range, current.1),
                ));
            }
        }
        previous = Some(current);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{DmaEntry, RevisionInfo};

    fn config() -> ReallocConfig {
        ReallocConfig {
            max_vrom: 0x1000,
            max_rom: 0x1000,
            ..ReallocConfig::default()
        }
    }

    fn test_rom(extra: Vec<RomFile>) -> Rom {
        let mut revision = RevisionInfo::oot_mq_debug();
        revision.dma_index_makerom = 0;
        revision.dma_index_boot = 0;
        revision.dma_index_dmadata = 1;
        revision.dma_index_code = 0;
        revision.fixed_rom_files = vec![0, 1];

        let mut files = vec![
            RomFile::new(vec![0; 0x20], DmaEntry::new(0x00, 0x20, 0x00, 0).with_name("boot")),
            RomFile::new(vec![0; 0x40], DmaEntry::new(0x20, 0x60, 0x20, 0).with_name("dmadata")),
        ];
        files.extend(extra);
        Rom::new(revision, files, 0x200, 0).unwrap()
    }

    fn movable(name: &str, size: usize, vrom_start: u32) -> RomFile {
        let end = vrom_start + size as u32;
        let mut file = RomFile::new(
            vec![0; size],
            DmaEntry::new(vrom_start, end, vrom_start, 0).with_name(name),
        );
        file.mark_movable(AddressSpaces::all());
        file
    }

    #[test]
    fn test_largest_first() -> Result<()> {
        let mut rom = test_rom(vec![movable("small", 50, 0x100), movable("big", 100, 0x140)]);
        let config = config();
        let placed = ReallocEngine::new(&config).realloc_vrom(&mut rom)?;
        assert_eq!(placed, vec![FileId(3), FileId(2)]);

        let big = rom.file(FileId(3))?.dma_entry.vrom()?;
        let small = rom.file(FileId(2))?.dma_entry.vrom()?;
        assert_eq!(big, AddrRange::new(0x60, 0x60 + 100));
        assert_eq!(small.start % 16, 0);
        assert!(!big.overlaps(&small));
        Ok(())
    }

    #[test]
    fn test_rom_pass_clears_rom_end() -> Result<()> {
        let mut file = movable("explicit", 0x10, 0x100);
        file.dma_entry.rom_end = 0x110;
        let mut rom = test_rom(vec![file]);
        rom.mark_rom_movable();

        let config = config();
        ReallocEngine::new(&config).realloc_rom(&mut rom)?;
        let entry = &rom.file(FileId(2))?.dma_entry;
        assert_eq!(entry.rom_start, Some(0x60));
        assert_eq!(entry.rom_end, 0);
        Ok(())
    }

    #[test]
    fn test_fixed_file_resized() {
        let mut rom = test_rom(vec![]);
        rom.file_mut(FileId(1)).unwrap().data.push(0);

        let config = config();
        let err = ReallocEngine::new(&config).realloc_vrom(&mut rom).unwrap_err();
        assert!(matches!(
            err.root(),
            RelocError::FixedFileResized { expected: 0x40, found: 0x41, .. }
        ));
    }

    #[test]
    fn test_fixed_overlap() {
        let overlapping = RomFile::new(
            vec![0; 0x20],
            DmaEntry::new(0x10, 0x30, 0x80, 0).with_name("overlapping"),
        );
        let mut rom = test_rom(vec![overlapping]);

        let config = config();
        let err = ReallocEngine::new(&config).realloc_vrom(&mut rom).unwrap_err();
        assert!(matches!(err, RelocError::Format { .. }));
    }

    #[test]
    fn test_unnamed_movable_rejected() {
        let mut file = movable("x", 0x10, 0x100);
        file.dma_entry.name = None;
        let mut rom = test_rom(vec![file]);

        let config = config();
        let result = ReallocEngine::new(&config).realloc_vrom(&mut rom);
        assert!(matches!(result, Err(RelocError::Config(_))));
    }

    #[test]
    fn test_switch_keeps_files_fixed() -> Result<()> {
        let mut rom = test_rom(vec![movable("a", 0x10, 0x100)]);
        let inserted = rom.insert_file("new", vec![0; 0x08]);

        let config = ReallocConfig {
            move_vrom: false,
            move_rom: false,
            ..config()
        };
        let engine = ReallocEngine::new(&config);
        assert_eq!(engine.realloc_vrom(&mut rom)?, vec![inserted]);
        assert_eq!(engine.realloc_rom(&mut rom)?, vec![inserted]);

        assert_eq!(rom.file(FileId(2))?.dma_entry.vrom()?, AddrRange::new(0x100, 0x110));
        assert!(rom.file(inserted)?.dma_entry.is_placed());
        Ok(())
    }

    #[test]
    fn test_out_of_space() {
        let mut rom = test_rom(vec![movable("huge", 0x2000, 0x100)]);
        let config = config();
        let err = ReallocEngine::new(&config).run(&mut rom).unwrap_err();
        assert!(matches!(err.root(), RelocError::OutOfSpace { size: 0x2000, .. }));
    }

    #[test]
    fn test_deterministic() -> Result<()> {
        let build = || {
            test_rom(vec![
                movable("c", 0x30, 0x100),
                movable("a", 0x30, 0x130),
                movable("b", 0x50, 0x160),
                movable("d", 0x08, 0x1B0),
            ])
        };
        let config = config();

        let mut first = build();
        let mut second = build();
        ReallocEngine::new(&config).run(&mut first)?;
        ReallocEngine::new(&config).run(&mut second)?;

        let entries = |rom: &Rom| -> Vec<DmaEntry> {
            rom.files().iter().map(|f| f.dma_entry.clone()).collect()
        };
        assert_eq!(entries(&first), entries(&second));

        // à taille égale, le nom le plus grand passe en premier
        let c = first.file(FileId(2))?.dma_entry.vrom()?;
        let a = first.file(FileId(3))?.dma_entry.vrom()?;
        assert!(c.start < a.start);
        Ok(())
    }
}
