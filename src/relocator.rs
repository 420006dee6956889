//! Pipeline complet : lecture, décodage des tables, réallocation, écriture

use log::{debug, info, log_enabled, Level};
use serde_json::{json, Value};

use crate::config::RelocatorConfig;
use crate::error::{RelocError, Result};
use crate::modules::{builtin_modules, Event, Orchestrator, RelocContext};
use crate::realloc::ReallocEngine;
use crate::rom::{
    build_image, pack_dma_filenames, pack_dma_table, ImageByteOrder, ImageDigest, RevisionDatabase,
    RevisionInfo, Rom, RomReader,
};

/// Résultat d'un passage
#[derive(Debug, Clone)]
pub struct RelocationOutput {
    pub revision: String,
    pub image: Vec<u8>,
    pub input_digest: ImageDigest,
    pub output_digest: ImageDigest,

    /// Dump JSON des tables, si demandé
    pub dump: Option<Value>,
}

/// Relocateur d'images
pub struct Relocator {
    config: RelocatorConfig,
    database: RevisionDatabase,
}

impl Relocator {
    /// Crée un relocateur avec la base intégrée, complétée par les
    /// révisions de la configuration
    pub fn new(config: RelocatorConfig) -> Self {
        let mut database = RevisionDatabase::new();
        for revision in &config.revisions {
            database.add_revision(revision.clone());
        }
        Self { config, database }
    }

    pub fn with_database(config: RelocatorConfig, database: RevisionDatabase) -> Self {
        Self { config, database }
    }

    pub fn config(&self) -> &RelocatorConfig {
        &self.config
    }

    pub fn database(&self) -> &RevisionDatabase {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut RevisionDatabase {
        &mut self.database
    }

    /// Choisit la révision : par nom, ou par MD5 si la configuration dit "auto"
    pub fn identify(&self, data: &[u8]) -> Result<&RevisionInfo> {
        if self.config.revision == "auto" {
            let md5 = ImageDigest::calculate_md5(data);
            self.database.find_by_md5(&md5).ok_or_else(|| {
                RelocError::config(format!(
                    "unknown image (MD5 {}), select a revision explicitly",
                    md5
                ))
            })
        } else {
            self.database
                .find(&self.config.revision)
                .ok_or_else(|| RelocError::config(format!("unknown revision {}", self.config.revision)))
        }
    }

    pub fn run(&self, data: &[u8]) -> Result<RelocationOutput> {
        let revision = self.identify(data)?.clone();
        self.run_with_revision(&revision, data)
    }

    pub fn run_with_revision(&self, revision: &RevisionInfo, data: &[u8]) -> Result<RelocationOutput> {
        revision.validate()?;
        ImageByteOrder::require_big_endian(data)?;

        let input_digest = ImageDigest::compute(data);
        info!("Input image: {}", input_digest);
        info!("Revision: {} ({})", revision.name, revision.description);

        let mut rom = RomReader::new(revision, data).read()?;
        if self.config.realloc.move_rom {
            rom.mark_rom_movable();
        }

        let mut ctx = RelocContext::new(rom);
        let mut orchestrator = Orchestrator::new();
        for event in Event::ALL {
            orchestrator.declare_event(event)?;
        }
        orchestrator.load_modules(builtin_modules())?;
        orchestrator.register_modules(&mut ctx)?;

        orchestrator.raise_event(Event::Parse, &mut ctx)?;
        ctx.rom.reclaim_string_pools();
        self.log_unaccounted(&ctx.rom);

        let dump = if self.config.output.dump_tables {
            let files = dma_json(&ctx.rom);
            ctx.dump_section("dma", files);
            orchestrator.raise_event(Event::Dump, &mut ctx)?;
            Some(Value::Object(std::mem::take(&mut ctx.dump)))
        } else {
            None
        };

        orchestrator.raise_event(Event::PackBeforeRealloc, &mut ctx)?;
        pack_dma_filenames(&mut ctx.rom)?;

        ReallocEngine::new(&self.config.realloc).run(&mut ctx.rom)?;

        orchestrator.raise_event(Event::PackAfterRealloc, &mut ctx)?;
        pack_dma_table(&mut ctx.rom)?;

        let image = build_image(&ctx.rom)?;
        let output_digest = ImageDigest::compute(&image);
        info!("Output image: {}", output_digest);

        Ok(RelocationOutput {
            revision: revision.name.clone(),
            image,
            input_digest,
            output_digest,
            dump,
        })
    }

    fn log_unaccounted(&self, rom: &Rom) {
        let level = if self.config.output.log_unaccounted {
            Level::Info
        } else {
            Level::Debug
        };
        if !log_enabled!(level) {
            return;
        }

        let ranges = rom.unaccounted_ranges();
        let total: u64 = ranges.iter().map(|r| u64::from(r.len())).sum();
        log::log!(level, "Unaccounted ROM: {} ranges, {:#x} bytes", ranges.len(), total);
        for range in ranges {
            debug!("  {} ({:#x} bytes)", range, range.len());
        }
    }
}

/// Liste des fichiers de la table DMA, pour le dump
fn dma_json(rom: &Rom) -> Value {
    let files: Vec<Value> = rom
        .files()
        .iter()
        .enumerate()
        .map(|(index, file)| {
            json!({
                "index": index,
                "name": file.name(),
                "vrom": file.dma_entry.vrom.map(|range| range.to_string()),
                "rom_start": file.dma_entry.rom_start,
                "size": file.data.len(),
            })
        })
        .collect();
    Value::Array(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::SyntheticRom;

    #[test]
    fn test_identify() {
        let image = SyntheticRom::minimal().build();

        let mut config = RelocatorConfig::default();
        config.revisions.push(image.revision.clone());
        let relocator = Relocator::new(config.clone());
        // l'image synthétique n'a pas de MD5 connu
        assert!(matches!(relocator.identify(&image.data), Err(RelocError::Config(_))));

        config.revision = "synthetic".to_string();
        let relocator = Relocator::new(config);
        assert_eq!(relocator.identify(&image.data).unwrap().name, "synthetic");
    }

    #[test]
    fn test_identify_by_md5() {
        let image = SyntheticRom::minimal().build();
        let mut revision = image.revision.clone();
        revision.md5 = Some(ImageDigest::calculate_md5(&image.data));

        let mut relocator = Relocator::new(RelocatorConfig::default());
        relocator.database_mut().add_revision(revision);
        assert_eq!(relocator.identify(&image.data).unwrap().name, "synthetic");
    }

    #[test]
    fn test_run_minimal() -> Result<()> {
        let image = SyntheticRom::minimal()
            .file("a", vec![1; 0x24])
            .file("b", vec![2; 0x10])
            .build();

        let relocator = Relocator::new(RelocatorConfig::default());
        let output = relocator.run_with_revision(&image.revision, &image.data)?;
        assert_eq!(output.revision, "synthetic");
        assert!(output.dump.is_none());
        assert_eq!(output.input_digest.size, image.data.len());
        assert_eq!(&output.image[..4], &image.data[..4]);
        Ok(())
    }

    #[test]
    fn test_rejects_byte_swapped() {
        let mut image = SyntheticRom::minimal().build();
        image.data[..4].copy_from_slice(&[0x37, 0x80, 0x40, 0x12]);
        let relocator = Relocator::new(RelocatorConfig::default());
        assert!(relocator.run_with_revision(&image.revision, &image.data).is_err());
    }
}
