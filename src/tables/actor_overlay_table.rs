//! Table des overlays d'acteurs (`gActorOverlayTable`)
//!
//! Enregistrements de 0x20 octets :
//! `vrom_start, vrom_end, vram_start, vram_end, loaded_ram_addr, init,
//! name, alloc_type (u16), num_loaded (i8), padding`.
//!
//! Les noms sont des chaînes de `code` : ils sont réclamés après le décodage
//! puis réinternés avant la réallocation. Les champs remplis à l'exécution
//! (`loaded_ram_addr`, `num_loaded`) sont réécrits à 0.

use log::{debug, info};
use serde_json::{json, Value};
use std::fmt;

use super::{file_json, mark_vrom_movable, table_bounds, vrom_range_words};
use crate::error::{RelocError, Result};
use crate::memory::BufferInterface;
use crate::modules::{Event, ModuleInfo, Orchestrator, RelocContext};
use crate::rom::{FileId, Rom, TableDescriptor};

pub const TASK: &str = "actor overlay table";

/// Taille d'un enregistrement
pub const ACTOR_OVERLAY_SIZE: usize = 0x20;

/// Entrée définie de la table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorOverlay {
    /// Fichier de l'overlay, `None` pour un acteur interne à `code`
    pub file: Option<FileId>,
    pub vram_start: u32,
    pub vram_end: u32,
    pub init_vram: u32,
    pub name: Option<String>,
    pub alloc_type: u16,

    /// Adresse du nom après réinternement
    name_vram: u32,
}

impl ActorOverlay {
    pub fn is_overlay(&self) -> bool {
        self.file.is_some()
    }
}

impl fmt::Display for ActorOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file {
            Some(id) => write!(f, "{}", id)?,
            None => write!(f, "internal")?,
        }
        write!(
            f,
            " VRAM 0x{:08X}-0x{:08X} init 0x{:08X} alloc {} {}",
            self.vram_start,
            self.vram_end,
            self.init_vram,
            self.alloc_type,
            self.name.as_deref().unwrap_or("-")
        )
    }
}

/// Table décodée, une entrée par identifiant d'acteur
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorOverlayTable {
    pub entries: Vec<Option<ActorOverlay>>,
}

impl ActorOverlayTable {
    /// Décode la table et consomme les noms dans le pool de `code`
    pub fn parse(rom: &mut Rom, descriptor: &TableDescriptor) -> Result<Self> {
        let code_id = rom.code();
        let length = descriptor.length as usize;

        let mut records = Vec::with_capacity(length);
        {
            let code = &rom.file(code_id)?.data;
            let base = table_bounds(TASK, code.len(), descriptor.offset, length, ACTOR_OVERLAY_SIZE)?;
            for actor_id in 0..length {
                records.push(RawRecord::read(code, base + actor_id * ACTOR_OVERLAY_SIZE)?);
            }
        }

        let mut entries = Vec::with_capacity(length);
        for (actor_id, record) in records.into_iter().enumerate() {
            let entry = Self::decode(rom, &record)
                .map_err(|e| e.context(format!("actor {:03}", actor_id)))?;
            match &entry {
                Some(actor) => debug!("{:03} {}", actor_id, actor),
                None => debug!("{:03} -", actor_id),
            }
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    fn decode(rom: &mut Rom, record: &RawRecord) -> Result<Option<ActorOverlay>> {
        if record.init_vram == 0 {
            return Ok(None);
        }

        let is_overlay = record.vrom_start != 0
            || record.vrom_end != 0
            || record.vram_start != 0
            || record.vram_end != 0;

        let file = if is_overlay {
            if !(record.vram_start <= record.init_vram && record.init_vram < record.vram_end) {
                return Err(RelocError::format(
                    TASK,
                    format!(
                        "init 0x{:08X} is outside of VRAM 0x{:08X}-0x{:08X}",
                        record.init_vram, record.vram_start, record.vram_end
                    ),
                ));
            }
            let file = rom.resolve_vrom_range(record.vrom_start, record.vrom_end)?;
            if file.is_none() {
                return Err(RelocError::format(
                    TASK,
                    format!(
                        "overlay has an empty VROM range 0x{:08X}-0x{:08X}",
                        record.vrom_start, record.vrom_end
                    ),
                ));
            }
            file
        } else {
            None
        };

        let name = match record.name_vram {
            0 => None,
            vram => Some(rom.read_pool_string(rom.code(), vram)?),
        };

        Ok(Some(ActorOverlay {
            file,
            vram_start: record.vram_start,
            vram_end: record.vram_end,
            init_vram: record.init_vram,
            name,
            alloc_type: record.alloc_type,
            name_vram: record.name_vram,
        }))
    }

    /// Overlays référencés
    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.entries
            .iter()
            .flatten()
            .filter_map(|actor| actor.file)
    }

    /// Réinterne les noms dans le pool de `code`
    pub fn intern_names(&mut self, rom: &mut Rom) -> Result<()> {
        let code_id = rom.code();
        for actor in self.entries.iter_mut().flatten() {
            actor.name_vram = match &actor.name {
                Some(name) => rom.intern_pool_string(code_id, name)?,
                None => 0,
            };
        }
        Ok(())
    }

    /// Réécrit la table ; les emplacements au-delà des entrées sont vidés
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

        let mut records = Vec::with_capacity(length);
        for actor in &self.entries {
            let record = match actor {
                Some(actor) => {
                    let (vrom_start, vrom_end) = vrom_range_words(rom, actor.file)?;
                    RawRecord {
                        vrom_start,
                        vrom_end,
                        vram_start: actor.vram_start,
                        vram_end: actor.vram_end,
                        init_vram: actor.init_vram,
                        name_vram: actor.name_vram,
                        alloc_type: actor.alloc_type,
                    }
                }
                None => RawRecord::default(),
            };
            records.push(record);
        }
        records.resize(length, RawRecord::default());

        let code = &mut rom.file_mut(rom.code())?.data;
        let base = table_bounds(TASK, code.len(), descriptor.offset, length, ACTOR_OVERLAY_SIZE)?;
        for (actor_id, record) in records.iter().enumerate() {
            record.write(code, base + actor_id * ACTOR_OVERLAY_SIZE)?;
        }
        Ok(())
    }

    pub fn to_json(&self, rom: &Rom) -> Result<Value> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for actor in &self.entries {
            let value = match actor {
                Some(actor) => json!({
                    "file": file_json(rom, actor.file)?,
                    "vram": format!("0x{:08X}-0x{:08X}", actor.vram_start, actor.vram_end),
                    "init": format!("0x{:08X}", actor.init_vram),
                    "name": actor.name,
                    "alloc_type": actor.alloc_type,
                }),
                None => Value::Null,
            };
            entries.push(value);
        }
        Ok(Value::Array(entries))
    }
}

/// Enregistrement brut, champs d'exécution exclus
#[derive(Debug, Clone, Copy, Default)]
struct RawRecord {
    vrom_start: u32,
    vrom_end: u32,
    vram_start: u32,
    vram_end: u32,
    init_vram: u32,
    name_vram: u32,
    alloc_type: u16,
}

impl RawRecord {
    fn read(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            vrom_start: data.read_u32(offset)?,
            vrom_end: data.read_u32(offset + 0x04)?,
            vram_start: data.read_u32(offset + 0x08)?,
            vram_end: data.read_u32(offset + 0x0C)?,
            init_vram: data.read_u32(offset + 0x14)?,
            name_vram: data.read_u32(offset + 0x18)?,
            alloc_type: data.read_u16(offset + 0x1C)?,
        })
    }

    fn write(&self, data: &mut [u8], offset: usize) -> Result<()> {
        data.write_u32(offset, self.vrom_start)?;
        data.write_u32(offset + 0x04, self.vrom_end)?;
        data.write_u32(offset + 0x08, self.vram_start)?;
        data.write_u32(offset + 0x0C, self.vram_end)?;
        // loaded_ram_addr
        data.write_u32(offset + 0x10, 0)?;
        data.write_u32(offset + 0x14, self.init_vram)?;
        data.write_u32(offset + 0x18, self.name_vram)?;
        data.write_u16(offset + 0x1C, self.alloc_type)?;
        // num_loaded, padding
        data.write_u16(offset + 0x1E, 0)
    }
}

fn descriptor(ctx: &RelocContext) -> Result<TableDescriptor> {
    ctx.rom
        .revision()
        .actor_overlay_table
        .clone()
        .ok_or_else(|| RelocError::config(format!("no {} for this revision", TASK)))
}

fn on_parse(ctx: &mut RelocContext) -> Result<()> {
    let descriptor = descriptor(ctx)?;
    let table = ActorOverlayTable::parse(&mut ctx.rom, &descriptor)?;
    mark_vrom_movable(&mut ctx.rom, table.files())?;
    info!(
        "Parsed {}: {} entries, {} overlays",
        TASK,
        table.entries.len(),
        table.files().count()
    );
    *ctx.modules.get_mut::<ActorOverlayTable>()? = table;
    Ok(())
}

fn on_dump(ctx: &mut RelocContext) -> Result<()> {
    let value = ctx.modules.get::<ActorOverlayTable>()?.to_json(&ctx.rom)?;
    ctx.dump_section(TASK, value);
    Ok(())
}

fn on_intern(ctx: &mut RelocContext) -> Result<()> {
    let RelocContext { rom, modules, .. } = ctx;
    modules.get_mut::<ActorOverlayTable>()?.intern_names(rom)
}

fn on_pack(ctx: &mut RelocContext) -> Result<()> {
    let descriptor = descriptor(ctx)?;
    let RelocContext { rom, modules, .. } = ctx;
    modules.get::<ActorOverlayTable>()?.pack(rom, &descriptor)
}

fn register(orchestrator: &mut Orchestrator, ctx: &mut RelocContext) -> Result<()> {
    if ctx.rom.revision().actor_overlay_table.is_none() {
        info!("Revision {} has no {}, skipping", ctx.rom.revision().name, TASK);
        return Ok(());
    }
    ctx.modules.insert(ActorOverlayTable::default());
    orchestrator.add_event_listener(Event::Parse, on_parse)?;
    orchestrator.add_event_listener(Event::Dump, on_dump)?;
    orchestrator.add_event_listener(Event::PackBeforeRealloc, on_intern)?;
    orchestrator.add_event_listener(Event::PackAfterRealloc, on_pack)
}

pub fn module_info() -> ModuleInfo {
    ModuleInfo {
        task: TASK,
        task_dependencies: &[],
        description: "Handles parsing and packing the actor overlay table.",
        register,
    }
}
