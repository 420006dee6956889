//! Listes de salles des en-têtes de scène
//!
//! Un en-tête est une suite de commandes de 8 octets
//! `(code u8, data1 u8, padding u16, data2 u32)` terminée par `0x14`. La
//! commande `0x18` pointe vers une liste d'en-têtes alternatifs, la commande
//! `0x04` vers la liste des salles (`data1` plages VROM de 8 octets).
//!
//! Chaque en-tête accepté garde sa propre liste ; les listes sont réécrites
//! à leur offset d'origine dans le fichier de scène.

use log::{debug, info};
use serde_json::{json, Value};

use super::scene_table::SceneTable;
use super::{
    file_json, mark_vrom_movable, write_vrom_range, SegmentAddress, VromField, SCENE_SEGMENT,
};
use super::VROM_RANGE_SIZE;
use crate::error::{RelocError, Result};
use crate::memory::BufferInterface;
use crate::modules::{Event, ModuleInfo, Orchestrator, RelocContext};
use crate::rom::{FileId, Rom};

pub const TASK: &str = "scene header room lists";

/// Taille d'une commande d'en-tête
pub const COMMAND_SIZE: usize = 8;

const CMD_ROOM_LIST: u8 = 0x04;
const CMD_END: u8 = 0x14;
const CMD_ALTERNATE_HEADERS: u8 = 0x18;

/// Premier code de commande invalide
const CMD_INVALID: u8 = 0x1A;

/// Commandes interdites dans un en-tête alternatif
const ALTERNATE_FORBIDDEN: [u8; 4] = [0x01, 0x0A, 0x0B, 0x18];

/// Commandes dont `data2` est une adresse dans le fichier de scène
const SEGMENTED_DATA2: [u8; 7] = [0x00, 0x03, 0x04, 0x06, 0x0E, 0x0F, 0x13];

/// Commande d'en-tête de scène
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneCommand {
    pub code: u8,
    pub data1: u8,
    pub data2: u32,
}

impl SceneCommand {
    pub fn read(data: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            code: data.read_u8(offset)?,
            data1: data.read_u8(offset + 1)?,
            data2: data.read_u32(offset + 4)?,
        })
    }
}

/// Liste de salles référencée par une commande `0x04`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomList {
    /// Offset de la liste dans le fichier de scène
    pub offset: u32,
    pub rooms: Vec<FileId>,
}

/// En-tête de scène accepté
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneHeader {
    pub offset: u32,
    pub room_lists: Vec<RoomList>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneRoomLists {
    pub scene: FileId,
    pub headers: Vec<SceneHeader>,
}

impl SceneRoomLists {
    /// Salles de tous les en-têtes
    pub fn rooms(&self) -> impl Iterator<Item = FileId> + '_ {
        self.headers
            .iter()
            .flat_map(|header| header.room_lists.iter())
            .flat_map(|list| list.rooms.iter().copied())
    }
}

/// Offsets des en-têtes d'un fichier de scène : l'en-tête principal à 0,
/// puis les en-têtes alternatifs acceptés.
pub fn find_header_offsets(scene: &[u8]) -> Result<Vec<u32>> {
    let mut offsets = vec![0];
    let mut offset = 0usize;
    loop {
        let command = SceneCommand::read(scene, offset)?;
        offset += COMMAND_SIZE;
        match command.code {
            CMD_END => break,
            CMD_ALTERNATE_HEADERS => {
                let list = SegmentAddress::from_raw(command.data2);
                if list.segment != SCENE_SEGMENT {
                    return Err(RelocError::format(
                        format!("scene header +0x{:X}", offset - COMMAND_SIZE),
                        format!("alternate header list at {} is not in the scene", list),
                    ));
                }
                offsets.extend(alternate_headers(scene, list.offset as usize)?);
            }
            _ => {}
        }
    }
    Ok(offsets)
}

/// Parcourt une liste d'en-têtes alternatifs.
///
/// Les entrées nulles sont sautées ; une adresse hors du segment de scène
/// ou un candidat invalide termine la liste.
fn alternate_headers(scene: &[u8], mut list_offset: usize) -> Result<Vec<u32>> {
    let mut offsets = Vec::new();
    while list_offset + 4 <= scene.len() {
        let raw = scene.read_u32(list_offset)?;
        list_offset += 4;
        if raw == 0 {
            continue;
        }
        let address = SegmentAddress::from_raw(raw);
        if address.segment != SCENE_SEGMENT {
            break;
        }
        if !is_valid_alternate_header(scene, address.offset as usize)? {
            debug!("Alternate header list ends at {}", address);
            break;
        }
        offsets.push(address.offset);
    }
    Ok(offsets)
}

/// Vrai si les données à `offset` ressemblent à un en-tête alternatif
pub fn is_valid_alternate_header(scene: &[u8], mut offset: usize) -> Result<bool> {
    while offset + COMMAND_SIZE <= scene.len() {
        let command = SceneCommand::read(scene, offset)?;
        offset += COMMAND_SIZE;

        if command.code == CMD_END {
            return Ok(true);
        }
        if command.code >= CMD_INVALID || ALTERNATE_FORBIDDEN.contains(&command.code) {
            return Ok(false);
        }
        if SEGMENTED_DATA2.contains(&command.code)
            && !SegmentAddress::from_raw(command.data2).is_in_scene(scene.len())
        {
            return Ok(false);
        }
    }
    Ok(false)
}

/// Lit les listes de salles d'un en-tête
fn read_room_lists(rom: &Rom, scene: &[u8], header_offset: u32) -> Result<Vec<RoomList>> {
    let mut lists = Vec::new();
    let mut offset = header_offset as usize;
    loop {
        let command = SceneCommand::read(scene, offset)?;
        offset += COMMAND_SIZE;
        match command.code {
            CMD_END => break,
            CMD_ROOM_LIST => {
                let address = SegmentAddress::from_raw(command.data2);
                let count = command.data1 as usize;
                let location = format!("room list at {}", address);
                if address.segment != SCENE_SEGMENT {
                    return Err(RelocError::format(location, "room list is not in the scene"));
                }
                let start = address.offset as usize;
                if start + count * VROM_RANGE_SIZE > scene.len() {
                    return Err(RelocError::format(
                        location,
                        format!("{} rooms run past the end of the scene", count),
                    ));
                }

                let mut rooms = Vec::with_capacity(count);
                for room_index in 0..count {
                    let slot = start + room_index * VROM_RANGE_SIZE;
                    let room = rom
                        .resolve_vrom_range(scene.read_u32(slot)?, scene.read_u32(slot + 4)?)
                        .map_err(|e| e.context(format!("room {}", room_index)))?
                        .ok_or_else(|| {
                            RelocError::format(location.clone(), format!("room {} is empty", room_index))
                        })?;
                    rooms.push(room);
                }
                lists.push(RoomList {
                    offset: address.offset,
                    rooms,
                });
            }
            _ => {}
        }
    }
    Ok(lists)
}

/// Listes de salles de toutes les scènes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneHeaderRoomLists {
    pub scenes: Vec<SceneRoomLists>,
}

impl SceneHeaderRoomLists {
    pub fn parse(rom: &Rom, scene_files: &[FileId]) -> Result<Self> {
        let mut scenes = Vec::with_capacity(scene_files.len());
        for &scene in scene_files {
            let file = rom.file(scene)?;
            let context = format!("scene {}", file.dma_entry.display_name());

            let offsets = find_header_offsets(&file.data).map_err(|e| e.context(context.clone()))?;
            let mut headers = Vec::with_capacity(offsets.len());
            for offset in offsets {
                let room_lists = read_room_lists(rom, &file.data, offset)
                    .map_err(|e| e.context(format!("{}, header 0x{:06X}", context, offset)))?;
                headers.push(SceneHeader { offset, room_lists });
            }

            let lists = SceneRoomLists { scene, headers };
            debug!(
                "{} {}: {} headers, {} rooms",
                scene,
                file.dma_entry.display_name(),
                lists.headers.len(),
                lists.rooms().count()
            );
            scenes.push(lists);
        }
        Ok(Self { scenes })
    }

    /// Fichiers de salles référencés
    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.scenes.iter().flat_map(SceneRoomLists::rooms)
    }

    /// Réécrit les plages VROM des salles dans les fichiers de scène
    pub fn pack(&self, rom: &mut Rom) -> Result<()> {
        for lists in &self.scenes {
            let mut data = std::mem::take(&mut rom.file_mut(lists.scene)?.data);
            let result = Self::write_scene(rom, lists, &mut data);
            rom.file_mut(lists.scene)?.data = data;
            result?;
        }
        Ok(())
    }

    fn write_scene(rom: &Rom, lists: &SceneRoomLists, data: &mut [u8]) -> Result<()> {
        for header in &lists.headers {
            for list in &header.room_lists {
                for (room_index, room) in list.rooms.iter().enumerate() {
                    let slot = list.offset as usize + room_index * VROM_RANGE_SIZE;
                    write_vrom_range(rom, data, slot, VromField::File(*room))?;
                }
            }
        }
        Ok(())
    }

    pub fn to_json(&self, rom: &Rom) -> Result<Value> {
        let mut scenes = Vec::with_capacity(self.scenes.len());
        for lists in &self.scenes {
            let mut headers = Vec::with_capacity(lists.headers.len());
            for header in &lists.headers {
                let mut rooms = Vec::new();
                for room in header.room_lists.iter().flat_map(|l| l.rooms.iter()) {
                    rooms.push(file_json(rom, Some(*room))?);
                }
                headers.push(json!({
                    "offset": format!("0x{:06X}", header.offset),
                    "rooms": rooms,
                }));
            }
            scenes.push(json!({
                "scene": file_json(rom, Some(lists.scene))?,
                "headers": headers,
            }));
        }
        Ok(Value::Array(scenes))
    }
}

fn on_parse(ctx: &mut RelocContext) -> Result<()> {
    let scene_files = ctx.modules.get::<SceneTable>()?.scene_files();
    let lists = SceneHeaderRoomLists::parse(&ctx.rom, &scene_files)?;
    mark_vrom_movable(&mut ctx.rom, lists.files())?;
    info!(
        "Parsed {}: {} scenes, {} room references",
        TASK,
        lists.scenes.len(),
        lists.files().count()
    );
    *ctx.modules.get_mut::<SceneHeaderRoomLists>()? = lists;
    Ok(())
}

fn on_dump(ctx: &mut RelocContext) -> Result<()> {
    let value = ctx.modules.get::<SceneHeaderRoomLists>()?.to_json(&ctx.rom)?;
    ctx.dump_section(TASK, value);
    Ok(())
}

fn on_pack(ctx: &mut RelocContext) -> Result<()> {
    let RelocContext { rom, modules, .. } = ctx;
    modules.get::<SceneHeaderRoomLists>()?.pack(rom)
}

fn register(orchestrator: &mut Orchestrator, ctx: &mut RelocContext) -> Result<()> {
    if !ctx.modules.contains::<SceneTable>() {
        info!("No scene table registered, skipping {}", TASK);
        return Ok(());
    }
    ctx.modules.insert(SceneHeaderRoomLists::default());
    orchestrator.add_event_listener(Event::Parse, on_parse)?;
    orchestrator.add_event_listener(Event::Dump, on_dump)?;
    orchestrator.add_event_listener(Event::PackAfterRealloc, on_pack)
}

pub fn module_info() -> ModuleInfo {
    ModuleInfo {
        task: TASK,
        task_dependencies: &[super::scene_table::TASK],
        description: "Handles parsing and packing the room lists in scene headers.",
        register,
    }
}
