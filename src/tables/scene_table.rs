//! Table des scènes (`gSceneTable`)
//!
//! Enregistrements de 0x14 octets : plage VROM de la scène, plage VROM du
//! titre, puis quatre octets conservés tels quels (`unk_10`, `config`,
//! `unk_12`, `unk_13`). Les plages vides gardent leur adresse.

use log::{debug, info};
use serde_json::{json, Value};

use super::{
    file_json, mark_vrom_movable, read_vrom_range, table_bounds, write_vrom_range, VromField,
};
use crate::error::{RelocError, Result};
use crate::memory::BufferInterface;
use crate::modules::{Event, ModuleInfo, Orchestrator, RelocContext};
use crate::rom::{FileId, Rom, TableDescriptor};

pub const TASK: &str = "scene table";

/// Taille d'un enregistrement
pub const SCENE_ENTRY_SIZE: usize = 0x14;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneTableEntry {
    /// Plage vide pour un emplacement inutilisé
    pub scene: VromField,
    pub title: VromField,
    pub unk_10: u8,
    pub config: u8,
    pub unk_12: u8,
    pub unk_13: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneTable {
    pub entries: Vec<SceneTableEntry>,
}

impl SceneTable {
    pub fn parse(rom: &Rom, descriptor: &TableDescriptor) -> Result<Self> {
        let code = &rom.file(rom.code())?.data;
        let length = descriptor.length as usize;
        let base = table_bounds(TASK, code.len(), descriptor.offset, length, SCENE_ENTRY_SIZE)?;

        let mut entries = Vec::with_capacity(length);
        for scene_id in 0..length {
            let offset = base + scene_id * SCENE_ENTRY_SIZE;
            let entry = Self::decode(rom, code, offset)
                .map_err(|e| e.context(format!("scene {:03}", scene_id)))?;
            debug!(
                "{:03} scene {} title {} config {}",
                scene_id,
                display_file(rom, entry.scene),
                display_file(rom, entry.title),
                entry.config
            );
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    fn decode(rom: &Rom, code: &[u8], offset: usize) -> Result<SceneTableEntry> {
        Ok(SceneTableEntry {
            scene: read_vrom_range(rom, code, offset)?,
            title: read_vrom_range(rom, code, offset + 0x08)?,
            unk_10: code.read_u8(offset + 0x10)?,
            config: code.read_u8(offset + 0x11)?,
            unk_12: code.read_u8(offset + 0x12)?,
            unk_13: code.read_u8(offset + 0x13)?,
        })
    }

    /// Fichiers de scène, sans doublons, dans l'ordre de la table
    pub fn scene_files(&self) -> Vec<FileId> {
        let mut files: Vec<FileId> = Vec::new();
        for id in self.entries.iter().filter_map(|entry| entry.scene.file()) {
            if !files.contains(&id) {
                files.push(id);
            }
        }
        files
    }

    /// Fichiers de scène et de titre
    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.entries
            .iter()
            .flat_map(|entry| entry.scene.file().into_iter().chain(entry.title.file()))
    }

    pub fn pack(&self, rom: &mut Rom, descriptor: &TableDescriptor) -> Result<()> {
        let length = descriptor.length as usize;
        if self.entries.len() > length {
            return Err(RelocError::capacity(format!(
                "{} has {} entries, the maximum is {}",
                TASK,
                self.entries.len(),
                length
            )));
        }

        let code_id = rom.code();
        let mut code = std::mem::take(&mut rom.file_mut(code_id)?.data);
        let result = self.write_entries(rom, &mut code, descriptor);
        rom.file_mut(code_id)?.data = code;
        result
    }

    fn write_entries(&self, rom: &Rom, code: &mut [u8], descriptor: &TableDescriptor) -> Result<()> {
        let length = descriptor.length as usize;
        let base = table_bounds(TASK, code.len(), descriptor.offset, length, SCENE_ENTRY_SIZE)?;
        let empty = SceneTableEntry::default();

        for scene_id in 0..length {
            let entry = self.entries.get(scene_id).unwrap_or(&empty);
            let offset = base + scene_id * SCENE_ENTRY_SIZE;
            write_vrom_range(rom, code, offset, entry.scene)?;
            write_vrom_range(rom, code, offset + 0x08, entry.title)?;
            code.write_u8(offset + 0x10, entry.unk_10)?;
            code.write_u8(offset + 0x11, entry.config)?;
            code.write_u8(offset + 0x12, entry.unk_12)?;
            code.write_u8(offset + 0x13, entry.unk_13)?;
        }
        Ok(())
    }

    pub fn to_json(&self, rom: &Rom) -> Result<Value> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            entries.push(json!({
                "scene": file_json(rom, entry.scene.file())?,
                "title": file_json(rom, entry.title.file())?,
                "unk_10": entry.unk_10,
                "config": entry.config,
                "unk_12": entry.unk_12,
                "unk_13": entry.unk_13,
            }));
        }
        Ok(Value::Array(entries))
    }
}

fn display_file(rom: &Rom, field: VromField) -> String {
    field
        .file()
        .and_then(|id| rom.file(id).ok())
        .map_or_else(|| "-".to_string(), |f| f.dma_entry.display_name().to_string())
}

fn descriptor(ctx: &RelocContext) -> Result<TableDescriptor> {
    ctx.rom
        .revision()
        .scene_table
        .clone()
        .ok_or_else(|| RelocError::config(format!("no {} for this revision", TASK)))
}

fn on_parse(ctx: &mut RelocContext) -> Result<()> {
    let descriptor = descriptor(ctx)?;
    let table = SceneTable::parse(&ctx.rom, &descriptor)?;
    mark_vrom_movable(&mut ctx.rom, table.files())?;
    info!("Parsed {}: {} entries", TASK, table.entries.len());
    *ctx.modules.get_mut::<SceneTable>()? = table;
    Ok(())
}

fn on_dump(ctx: &mut RelocContext) -> Result<()> {
    let value = ctx.modules.get::<SceneTable>()?.to_json(&ctx.rom)?;
    ctx.dump_section(TASK, value);
    Ok(())
}

fn on_pack(ctx: &mut RelocContext) -> Result<()> {
    let descriptor = descriptor(ctx)?;
    let RelocContext { rom, modules, .. } = ctx;
    modules.get::<SceneTable>()?.pack(rom, &descriptor)
}

fn register(orchestrator: &mut Orchestrator, ctx: &mut RelocContext) -> Result<()> {
    if ctx.rom.revision().scene_table.is_none() {
        info!("Revision {} has no {}, skipping", ctx.rom.revision().name, TASK);
        return Ok(());
    }
    ctx.modules.insert(SceneTable::default());
    orchestrator.add_event_listener(Event::Parse, on_parse)?;
    orchestrator.add_event_listener(Event::Dump, on_dump)?;
    orchestrator.add_event_listener(Event::PackAfterRealloc, on_pack)
}

pub fn module_info() -> ModuleInfo {
    ModuleInfo {
        task: TASK,
        task_dependencies: &[],
        description: "Handles parsing and packing the scene table.",
        register,
    }
}
