//! Construction d'images synthétiques
//!
//! Sert aux tests, aux benchmarks et au binaire de démonstration : produit
//! une image cohérente (table DMA, noms de fichiers dans `boot`, tables
//! structurées dans `code`) et la révision qui la décrit.

use std::collections::HashMap;

use super::database::{ObjectTableDescriptor, RevisionInfo, TableDescriptor};
use super::file::DMA_ENTRY_SIZE;
use crate::memory::AddrRange;

/// En-tête PI d'une image big-endian
pub const Z64_MAGIC: [u8; 4] = [0x80, 0x37, 0x12, 0x40];

const BOOT_VRAM: u32 = 0x8000_0460;
const CODE_VRAM: u32 = 0x8001_CE60;
const FILENAME_TABLE_OFFSET: u32 = 0x10;
const ACTOR_VRAM_BASE: u32 = 0x8080_0000;

/// Image produite par `SyntheticRom::build`
#[derive(Debug, Clone)]
pub struct SyntheticImage {
    pub revision: RevisionInfo,
    pub data: Vec<u8>,

    /// Nom et plage (VROM et ROM identiques) de chaque fichier, dans
    /// l'ordre de la table DMA
    pub files: Vec<(String, AddrRange)>,
}

impl SyntheticImage {
    /// Plage d'un fichier par son nom
    pub fn range_of(&self, name: &str) -> Option<AddrRange> {
        self.files.iter().find(|(n, _)| n == name).map(|(_, r)| *r)
    }
}

/// Entrée de la table des acteurs
#[derive(Debug, Clone)]
enum ActorSpec {
    Unset,
    Internal { name: String },
    Overlay { file: String, name: String, alloc_type: u16 },
}

#[derive(Debug, Clone)]
struct SceneSpec {
    scene: Option<String>,
    title: Option<String>,
}

/// Fichier de scène dont les en-têtes référencent des salles
#[derive(Debug, Clone)]
struct SceneFileSpec {
    name: String,
    /// Salles de chaque en-tête (le premier est l'en-tête principal)
    headers: Vec<Vec<String>>,
}

/// Constructeur d'images synthétiques
#[derive(Debug, Clone)]
pub struct SyntheticRom {
    minimal: bool,
    files: Vec<(String, Vec<u8>)>,
    scene_files: Vec<SceneFileSpec>,
    objects: Vec<Option<String>>,
    actors: Vec<ActorSpec>,
    scenes: Vec<SceneSpec>,
    spare_dma_entries: usize,
    trailing_padding: usize,
}

impl SyntheticRom {
    /// Image avec `makerom`, `boot`, `dmadata` et `code` en tête
    pub fn new() -> Self {
        Self {
            minimal: false,
            files: Vec::new(),
            scene_files: Vec::new(),
            objects: Vec::new(),
            actors: Vec::new(),
            scenes: Vec::new(),
            spare_dma_entries: 4,
            trailing_padding: 0,
        }
    }

    /// Image réduite à `boot` (qui tient aussi lieu de `makerom` et `code`)
    /// et `dmadata`
    pub fn minimal() -> Self {
        Self {
            minimal: true,
            ..Self::new()
        }
    }

    /// Ajoute un fichier de données
    pub fn file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.files.push((name.to_string(), data));
        self
    }

    /// Ajoute un fichier de scène ; chaque élément de `headers` liste les
    /// salles d'un en-tête, le premier étant l'en-tête principal
    pub fn scene_file(mut self, name: &str, headers: &[&[&str]]) -> Self {
        self.scene_files.push(SceneFileSpec {
            name: name.to_string(),
            headers: headers
                .iter()
                .map(|rooms| rooms.iter().map(|r| r.to_string()).collect())
                .collect(),
        });
        self
    }

    /// Ajoute une entrée à la table des objets (`None` pour une entrée vide)
    pub fn object(mut self, file: Option<&str>) -> Self {
        self.objects.push(file.map(str::to_string));
        self
    }

    pub fn actor_overlay(mut self, file: &str, name: &str, alloc_type: u16) -> Self {
        self.actors.push(ActorSpec::Overlay {
            file: file.to_string(),
            name: name.to_string(),
            alloc_type,
        });
        self
    }

    pub fn internal_actor(mut self, name: &str) -> Self {
        self.actors.push(ActorSpec::Internal {
            name: name.to_string(),
        });
        self
    }

    pub fn unset_actor(mut self) -> Self {
        self.actors.push(ActorSpec::Unset);
        self
    }

    /// Ajoute une entrée à la table des scènes
    pub fn scene(mut self, scene: Option<&str>, title: Option<&str>) -> Self {
        self.scenes.push(SceneSpec {
            scene: scene.map(str::to_string),
            title: title.map(str::to_string),
        });
        self
    }

    pub fn spare_dma_entries(mut self, count: usize) -> Self {
        self.spare_dma_entries = count;
        self
    }

    /// Octets non référencés ajoutés à la fin de l'image
    pub fn trailing_padding(mut self, size: usize) -> Self {
        self.trailing_padding = size;
        self
    }

    pub fn build(&self) -> SyntheticImage {
        let names = self.file_names();
        let entry_count = names.len();

        // tailles, puis placement contigu aligné sur 16 octets
        let boot_size = self.boot_size(&names);
        let dmadata_size = (entry_count + self.spare_dma_entries) * DMA_ENTRY_SIZE;
        let code_layout = self.code_layout();

        let mut sizes: Vec<usize> = Vec::with_capacity(entry_count);
        if !self.minimal {
            sizes.push(0x40);
        }
        sizes.push(boot_size);
        sizes.push(dmadata_size);
        if !self.minimal {
            sizes.push(code_layout.size);
        }
        sizes.extend(self.files.iter().map(|(_, data)| data.len()));
        sizes.extend(self.scene_files.iter().map(scene_file_size));

        let mut ranges = Vec::with_capacity(entry_count);
        let mut cursor = 0u32;
        for size in &sizes {
            ranges.push(AddrRange::new(cursor, cursor + *size as u32));
            cursor = (cursor + *size as u32 + 0xF) & !0xF;
        }
        let by_name: HashMap<&str, AddrRange> = names
            .iter()
            .map(String::as_str)
            .zip(ranges.iter().copied())
            .collect();

        let (boot_index, dmadata_index, code_index) =
            if self.minimal { (0, 1, 0) } else { (1, 2, 3) };
        let revision = self.revision(&ranges, &code_layout, boot_index, dmadata_index, code_index);

        let mut data = vec![0u8; cursor as usize + self.trailing_padding];

        // contenus
        let mut contents: Vec<Vec<u8>> = Vec::with_capacity(entry_count);
        if !self.minimal {
            contents.push(vec![0; 0x40]);
        }
        contents.push(self.boot_data(&names, boot_size));
        contents.push(dma_table(&ranges, dmadata_size));
        if !self.minimal {
            contents.push(self.code_data(&code_layout, &by_name));
        }
        contents.extend(self.files.iter().map(|(_, d)| d.clone()));
        contents.extend(self.scene_files.iter().map(|s| scene_file_data(s, &by_name)));

        for (range, content) in ranges.iter().zip(&contents) {
            data[range.start as usize..range.end as usize].copy_from_slice(content);
        }
        data[..4].copy_from_slice(&Z64_MAGIC);

        SyntheticImage {
            revision,
            data,
            files: names.into_iter().zip(ranges).collect(),
        }
    }

    fn file_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if !self.minimal {
            names.push("makerom".to_string());
        }
        names.push("boot".to_string());
        names.push("dmadata".to_string());
        if !self.minimal {
            names.push("code".to_string());
        }
        names.extend(self.files.iter().map(|(n, _)| n.clone()));
        names.extend(self.scene_files.iter().map(|s| s.name.clone()));
        names
    }

    fn boot_size(&self, names: &[String]) -> usize {
        let strings: usize = names.iter().map(|n| padded_len(n)).sum();
        // l'en-tête PI occupe le début de boot dans l'image minimale
        (FILENAME_TABLE_OFFSET as usize + names.len() * 4 + strings).max(0x20)
    }

    fn boot_data(&self, names: &[String], size: usize) -> Vec<u8> {
        let mut data = vec![0u8; size];
        let mut string_offset = FILENAME_TABLE_OFFSET as usize + names.len() * 4;
        for (i, name) in names.iter().enumerate() {
            let slot = FILENAME_TABLE_OFFSET as usize + i * 4;
            let vram = BOOT_VRAM + string_offset as u32;
            data[slot..slot + 4].copy_from_slice(&vram.to_be_bytes());
            data[string_offset..string_offset + name.len()].copy_from_slice(name.as_bytes());
            string_offset += padded_len(name);
        }
        data
    }

    fn code_layout(&self) -> CodeLayout {
        let mut cursor = 0x10u32;

        let object_table = (!self.objects.is_empty()).then(|| {
            let descriptor = ObjectTableDescriptor {
                length_offset: cursor,
                offset: cursor + 4,
                max_length: self.objects.len() as u32 + 2,
            };
            cursor += 4 + descriptor.max_length * 8;
            descriptor
        });

        let actor_overlay_table = (!self.actors.is_empty()).then(|| {
            let descriptor = TableDescriptor {
                offset: cursor,
                length: self.actors.len() as u32,
            };
            cursor += descriptor.length * 0x20;
            descriptor
        });

        let scene_table = (!self.scenes.is_empty()).then(|| {
            let descriptor = TableDescriptor {
                offset: cursor,
                length: self.scenes.len() as u32,
            };
            cursor += descriptor.length * 0x14;
            descriptor
        });

        let strings_offset = cursor;
        let strings: u32 = self
            .actors
            .iter()
            .map(|actor| match actor {
                ActorSpec::Unset => 0,
                ActorSpec::Internal { name } | ActorSpec::Overlay { name, .. } => {
                    padded_len(name) as u32
                }
            })
            .sum();

        CodeLayout {
            object_table,
            actor_overlay_table,
            scene_table,
            strings_offset,
            size: (strings_offset + strings + 0x10) as usize,
        }
    }

    fn code_data(&self, layout: &CodeLayout, by_name: &HashMap<&str, AddrRange>) -> Vec<u8> {
        let mut data = vec![0u8; layout.size];
        let range_of = |name: &Option<String>| -> (u32, u32) {
            name.as_deref()
                .and_then(|n| by_name.get(n))
                .map_or((0, 0), |r| (r.start, r.end))
        };

        if let Some(objects) = &layout.object_table {
            put_u32(&mut data, objects.length_offset, self.objects.len() as u32);
            for (i, object) in self.objects.iter().enumerate() {
                let (start, end) = range_of(object);
                let at = objects.offset + i as u32 * 8;
                put_u32(&mut data, at, start);
                put_u32(&mut data, at + 4, end);
            }
        }

        if let Some(actors) = &layout.actor_overlay_table {
            let mut string_offset = layout.strings_offset;
            for (i, actor) in self.actors.iter().enumerate() {
                let at = actors.offset + i as u32 * 0x20;
                let name = match actor {
                    ActorSpec::Unset => continue,
                    ActorSpec::Internal { name } => {
                        // init pointe dans code pour un acteur interne
                        put_u32(&mut data, at + 0x14, CODE_VRAM + 0x10 + i as u32 * 4);
                        name
                    }
                    ActorSpec::Overlay {
                        file,
                        name,
                        alloc_type,
                    } => {
                        let (start, end) = range_of(&Some(file.clone()));
                        let vram_start = ACTOR_VRAM_BASE + i as u32 * 0x1_0000;
                        let vram_end = vram_start + (end - start).max(0x10);
                        put_u32(&mut data, at, start);
                        put_u32(&mut data, at + 0x04, end);
                        put_u32(&mut data, at + 0x08, vram_start);
                        put_u32(&mut data, at + 0x0C, vram_end);
                        put_u32(&mut data, at + 0x14, vram_start);
                        data[at as usize + 0x1C..at as usize + 0x1E]
                            .copy_from_slice(&alloc_type.to_be_bytes());
                        name
                    }
                };
                put_u32(&mut data, at + 0x18, CODE_VRAM + string_offset);
                let start = string_offset as usize;
                data[start..start + name.len()].copy_from_slice(name.as_bytes());
                string_offset += padded_len(name) as u32;
            }
        }

        if let Some(scenes) = &layout.scene_table {
            for (i, scene) in self.scenes.iter().enumerate() {
                let at = scenes.offset + i as u32 * 0x14;
                let (scene_start, scene_end) = range_of(&scene.scene);
                let (title_start, title_end) = range_of(&scene.title);
                put_u32(&mut data, at, scene_start);
                put_u32(&mut data, at + 0x04, scene_end);
                put_u32(&mut data, at + 0x08, title_start);
                put_u32(&mut data, at + 0x0C, title_end);
                data[at as usize + 0x10..at as usize + 0x14].copy_from_slice(&[1, i as u8, 2, 3]);
            }
        }

        data
    }

    fn revision(
        &self,
        ranges: &[AddrRange],
        code: &CodeLayout,
        boot_index: usize,
        dmadata_index: usize,
        code_index: usize,
    ) -> RevisionInfo {
        let mut fixed_rom_files = vec![0, boot_index, dmadata_index];
        fixed_rom_files.dedup();

        RevisionInfo {
            name: "synthetic".to_string(),
            description: "Synthetic test image".to_string(),
            md5: None,
            dmadata_rom_start: ranges[dmadata_index].start,
            dma_index_makerom: 0,
            dma_index_boot: boot_index,
            dma_index_dmadata: dmadata_index,
            dma_index_code: code_index,
            dma_table_filenames_boot_offset: Some(FILENAME_TABLE_OFFSET),
            boot_vram_start: BOOT_VRAM,
            code_vram_start: if self.minimal { BOOT_VRAM } else { CODE_VRAM },
            fixed_rom_files,
            object_table: code.object_table.clone().filter(|_| !self.minimal),
            actor_overlay_table: code.actor_overlay_table.clone().filter(|_| !self.minimal),
            scene_table: code.scene_table.clone().filter(|_| !self.minimal),
        }
    }
}

impl Default for SyntheticRom {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct CodeLayout {
    object_table: Option<ObjectTableDescriptor>,
    actor_overlay_table: Option<TableDescriptor>,
    scene_table: Option<TableDescriptor>,
    strings_offset: u32,
    size: usize,
}

/// Longueur d'une chaîne C bourrée à 4 octets
fn padded_len(value: &str) -> usize {
    (value.len() + 1 + 3) & !3
}

fn put_u32(data: &mut [u8], offset: u32, value: u32) {
    let offset = offset as usize;
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn dma_table(ranges: &[AddrRange], size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    for (i, range) in ranges.iter().enumerate() {
        let at = (i * DMA_ENTRY_SIZE) as u32;
        put_u32(&mut data, at, range.start);
        put_u32(&mut data, at + 4, range.end);
        put_u32(&mut data, at + 8, range.start);
    }
    data
}

/// Taille d'un fichier de scène :
/// en-tête principal, liste d'en-têtes alternatifs, en-têtes alternatifs,
/// listes de salles
fn scene_file_size(spec: &SceneFileSpec) -> usize {
    let layout = SceneFileLayout::new(spec);
    layout.size
}

struct SceneFileLayout {
    /// Offset de la liste d'en-têtes alternatifs
    alt_list: usize,
    /// Offset de chaque en-tête
    headers: Vec<usize>,
    /// Offset de chaque liste de salles
    room_lists: Vec<usize>,
    size: usize,
}

impl SceneFileLayout {
    fn new(spec: &SceneFileSpec) -> Self {
        let alternates = spec.headers.len().saturating_sub(1);
        let main_len = if alternates > 0 { 3 * 8 } else { 2 * 8 };
        let alt_list = main_len;
        // un emplacement nul en tête de liste, sauté au parcours
        let mut cursor = alt_list + if alternates > 0 { (alternates + 1) * 4 } else { 0 };

        let mut headers = vec![0];
        for _ in 0..alternates {
            cursor = (cursor + 7) & !7;
            headers.push(cursor);
            cursor += 2 * 8;
        }

        let mut room_lists = Vec::with_capacity(spec.headers.len());
        for rooms in &spec.headers {
            room_lists.push(cursor);
            cursor += rooms.len() * 8;
        }

        Self {
            alt_list,
            headers,
            room_lists,
            size: cursor.max(0x10),
        }
    }
}

fn scene_file_data(spec: &SceneFileSpec, by_name: &HashMap<&str, AddrRange>) -> Vec<u8> {
    let layout = SceneFileLayout::new(spec);
    let mut data = vec![0u8; layout.size];

    let command = |data: &mut [u8], at: usize, code: u8, data1: u8, data2: u32| {
        data[at] = code;
        data[at + 1] = data1;
        put_u32(data, at as u32 + 4, data2);
    };

    for (h, rooms) in spec.headers.iter().enumerate() {
        let mut at = layout.headers[h];
        if h == 0 && spec.headers.len() > 1 {
            command(&mut data, at, 0x18, 0, 0x0200_0000 | layout.alt_list as u32);
            at += 8;
        }
        command(
            &mut data,
            at,
            0x04,
            rooms.len() as u8,
            0x0200_0000 | layout.room_lists[h] as u32,
        );
        command(&mut data, at + 8, 0x14, 0, 0);

        for (r, room) in rooms.iter().enumerate() {
            let (start, end) = by_name
                .get(room.as_str())
                .map_or((0, 0), |range| (range.start, range.end));
            let slot = (layout.room_lists[h] + r * 8) as u32;
            put_u32(&mut data, slot, start);
            put_u32(&mut data, slot + 4, end);
        }
    }

    for (i, header) in layout.headers.iter().enumerate().skip(1) {
        put_u32(
            &mut data,
            (layout.alt_list + i * 4) as u32,
            0x0200_0000 | *header as u32,
        );
    }

    data
}
