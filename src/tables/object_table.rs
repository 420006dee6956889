//! Table des objets (`gObjectTable`)
//!
//! Un mot de longueur suivi de plages VROM de 8 octets. Une plage vide est une
//! entrée inutilisée ; son adresse est conservée à la réécriture.

use log::{debug, info};
use serde_json::{json, Value};

use super::{file_json, mark_vrom_movable, read_vrom_range, table_bounds, write_vrom_range};
use super::{VromField, VROM_RANGE_SIZE};
use crate::error::{RelocError, Result};
use crate::memory::BufferInterface;
use crate::modules::{Event, ModuleInfo, Orchestrator, RelocContext};
use crate::rom::{FileId, ObjectTableDescriptor, Rom};

pub const TASK: &str = "object table";

/// Table des objets décodée
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectTable {
    pub entries: Vec<VromField>,

    /// Longueur lue dans `code` ; la table réécrite garde la même
    parsed_length: usize,
}

impl ObjectTable {
    pub fn parse(rom: &Rom, descriptor: &ObjectTableDescriptor) -> Result<Self> {
        let code = &rom.file(rom.code())?.data;
        let length = code.read_u32(descriptor.length_offset as usize)?;
        if length > descriptor.max_length {
            return Err(RelocError::format(
                TASK,
                format!(
                    "length {} exceeds the maximum of {}",
                    length, descriptor.max_length
                ),
            ));
        }

        let length = length as usize;
        let base = table_bounds(TASK, code.len(), descriptor.offset, length, VROM_RANGE_SIZE)?;

        let mut entries = Vec::with_capacity(length);
        for object_id in 0..length {
            let field = read_vrom_range(rom, code, base + object_id * VROM_RANGE_SIZE)
                .map_err(|e| e.context(format!("object {:03}", object_id)))?;
            match field {
                VromField::File(id) => debug!("{:03} {}", object_id, rom.file(id)?.dma_entry),
                VromField::Empty { start } => debug!("{:03} - ({:#x})", object_id, start),
            }
            entries.push(field);
        }

        Ok(Self {
            entries,
            parsed_length: length,
        })
    }

    /// Fichiers référencés
    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.entries.iter().filter_map(|field| field.file())
    }

    pub fn pack(&self, rom: &mut Rom, descriptor: &ObjectTableDescriptor) -> Result<()> {
        if self.entries.len() != self.parsed_length {
            return Err(RelocError::capacity(format!(
                "{} has {} entries, it must keep its length of {}",
                TASK,
                self.entries.len(),
                self.parsed_length
            )));
        }
        if self.entries.len() > descriptor.max_length as usize {
            return Err(RelocError::capacity(format!(
                "{} has {} entries, the maximum is {}",
                TASK,
                self.entries.len(),
                descriptor.max_length
            )));
        }

        let code_id = rom.code();
        let mut code = std::mem::take(&mut rom.file_mut(code_id)?.data);
        let result = self.write_entries(rom, &mut code, descriptor);
        rom.file_mut(code_id)?.data = code;
        result
    }

    fn write_entries(
        &self,
        rom: &Rom,
        code: &mut [u8],
        descriptor: &ObjectTableDescriptor,
    ) -> Result<()> {
        let base = table_bounds(
            TASK,
            code.len(),
            descriptor.offset,
            self.entries.len(),
            VROM_RANGE_SIZE,
        )?;
        code.write_u32(descriptor.length_offset as usize, self.entries.len() as u32)?;
        for (object_id, field) in self.entries.iter().enumerate() {
            write_vrom_range(rom, code, base + object_id * VROM_RANGE_SIZE, *field)?;
        }
        Ok(())
    }

    pub fn to_json(&self, rom: &Rom) -> Result<Value> {
        let entries = self
            .entries
            .iter()
            .map(|field| file_json(rom, field.file()))
            .collect::<Result<Vec<_>>>()?;
        Ok(json!({ "length": self.parsed_length, "entries": entries }))
    }
}

fn descriptor(ctx: &RelocContext) -> Result<ObjectTableDescriptor> {
    ctx.rom
        .revision()
        .object_table
        .clone()
        .ok_or_else(|| RelocError::config(format!("no {} for this revision", TASK)))
}

fn on_parse(ctx: &mut RelocContext) -> Result<()> {
    let descriptor = descriptor(ctx)?;
    let table = ObjectTable::parse(&ctx.rom, &descriptor)?;
    mark_vrom_movable(&mut ctx.rom, table.files())?;
    info!("Parsed {}: {} entries", TASK, table.entries.len());
    *ctx.modules.get_mut::<ObjectTable>()? = table;
    Ok(())
}

fn on_dump(ctx: &mut RelocContext) -> Result<()> {
    let value = ctx.modules.get::<ObjectTable>()?.to_json(&ctx.rom)?;
    ctx.dump_section(TASK, value);
    Ok(())
}

fn on_pack(ctx: &mut RelocContext) -> Result<()> {
    let descriptor = descriptor(ctx)?;
    let RelocContext { rom, modules, .. } = ctx;
    modules.get::<ObjectTable>()?.pack(rom, &descriptor)
}

fn register(orchestrator: &mut Orchestrator, ctx: &mut RelocContext) -> Result<()> {
    if ctx.rom.revision().object_table.is_none() {
        info!("Revision {} has no {}, skipping", ctx.rom.revision().name, TASK);
        return Ok(());
    }
    ctx.modules.insert(ObjectTable::default());
    orchestrator.add_event_listener(Event::Parse, on_parse)?;
    orchestrator.add_event_listener(Event::Dump, on_dump)?;
    orchestrator.add_event_listener(Event::PackAfterRealloc, on_pack)
}

pub fn module_info() -> ModuleInfo {
    ModuleInfo {
        task: TASK,
        task_dependencies: &[],
        description: "Handles parsing and packing the object table.",
        register,
    }
}
