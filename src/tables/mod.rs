//! Tables structurées qui référencent des fichiers par plage VROM
//!
//! Chaque table est un module de l'orchestrateur : elle se décode sur
//! `Event::Parse`, marque ses fichiers déplaçables en VROM, puis réécrit les
//! plages à jour sur `Event::PackAfterRealloc`.

pub mod actor_overlay_table;
pub mod object_table;
pub mod scene_headers;
pub mod scene_table;

use serde_json::{json, Value};
use std::fmt;

use crate::error::{RelocError, Result};
use crate::memory::BufferInterface;
use crate::rom::{AddressSpaces, FileId, Rom};

/// Taille d'une plage VROM `(start, end)` dans une table
pub const VROM_RANGE_SIZE: usize = 8;

/// Segment du fichier de scène courant
pub const SCENE_SEGMENT: u8 = 0x02;

/// Adresse segmentée : segment sur l'octet de poids fort, offset sur 24 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentAddress {
    pub segment: u8,
    pub offset: u32,
}

impl SegmentAddress {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            segment: (raw >> 24) as u8,
            offset: raw & 0x00FF_FFFF,
        }
    }

    pub fn to_raw(self) -> u32 {
        (u32::from(self.segment) << 24) | (self.offset & 0x00FF_FFFF)
    }

    /// Vrai si l'adresse désigne un offset dans un fichier de scène de
    /// `len` octets
    pub fn is_in_scene(self, len: usize) -> bool {
        self.segment == SCENE_SEGMENT && (self.offset as usize) < len
    }
}

impl fmt::Display for SegmentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:06X}", self.segment, self.offset)
    }
}

/// Champ de plage VROM d'une table
///
/// Une plage vide n'a pas de fichier mais garde son adresse : certaines
/// entrées inutilisées valent `(x, x)` avec `x != 0` et sont réécrites telles
/// quelles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VromField {
    Empty { start: u32 },
    File(FileId),
}

impl VromField {
    /// Champ nul `(0, 0)`
    pub const NULL: VromField = VromField::Empty { start: 0 };

    pub fn file(self) -> Option<FileId> {
        match self {
            VromField::File(id) => Some(id),
            VromField::Empty { .. } => None,
        }
    }

    pub fn is_empty(self) -> bool {
        matches!(self, VromField::Empty { .. })
    }
}

impl Default for VromField {
    fn default() -> Self {
        Self::NULL
    }
}

impl From<Option<FileId>> for VromField {
    fn from(file: Option<FileId>) -> Self {
        file.map_or(Self::NULL, VromField::File)
    }
}

/// Lit une plage VROM à `offset` dans `data` et la résout en fichier
pub fn read_vrom_range(rom: &Rom, data: &[u8], offset: usize) -> Result<VromField> {
    let start = data.read_u32(offset)?;
    let end = data.read_u32(offset + 4)?;
    Ok(match rom.resolve_vrom_range(start, end)? {
        Some(id) => VromField::File(id),
        None => VromField::Empty { start },
    })
}

/// Plage VROM actuelle d'un champ de table, `(0, 0)` pour un champ nul
pub fn vrom_range_words(rom: &Rom, file: Option<FileId>) -> Result<(u32, u32)> {
    match file {
        Some(id) => {
            let range = rom.file(id)?.dma_entry.vrom()?;
            Ok((range.start, range.end))
        }
        None => Ok((0, 0)),
    }
}

/// Écrit la plage VROM actuelle d'un champ de table
pub fn write_vrom_range(
    rom: &Rom,
    data: &mut [u8],
    offset: usize,
    field: VromField,
) -> Result<()> {
    let (start, end) = match field {
        VromField::File(id) => vrom_range_words(rom, Some(id))?,
        VromField::Empty { start } => (start, start),
    };
    data.write_u32(offset, start)?;
    data.write_u32(offset + 4, end)
}

/// Marque les fichiers référencés par une table comme déplaçables en VROM
pub fn mark_vrom_movable(rom: &mut Rom, files: impl IntoIterator<Item = FileId>) -> Result<()> {
    for id in files {
        rom.mark_movable(id, AddressSpaces::VROM)?;
    }
    Ok(())
}

/// Description JSON d'un champ fichier, pour les dumps
pub fn file_json(rom: &Rom, file: Option<FileId>) -> Result<Value> {
    let Some(id) = file else {
        return Ok(Value::Null);
    };
    let file = rom.file(id)?;
    Ok(json!({
        "index": id.index(),
        "name": file.name(),
        "vrom": file.dma_entry.vrom.map(|range| range.to_string()),
    }))
}

/// Offset dans `code` d'une table, vérifié contre la taille du fichier
pub(crate) fn table_bounds(
    label: &str,
    code_len: usize,
    offset: u32,
    count: usize,
    stride: usize,
) -> Result<usize> {
    let start = offset as usize;
    match count.checked_mul(stride).and_then(|size| size.checked_add(start)) {
        Some(end) if end <= code_len => Ok(start),
        _ => Err(RelocError::format(
            label,
            format!(
                "{} entries of {:#x} bytes at {:#x} run past the end of code ({:#x} bytes)",
                count, stride, offset, code_len
            ),
        )),
    }
}
