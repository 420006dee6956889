//! Tests d'intégration du relocateur

use z64_relocator::memory::{align_up, AddrRange};
use z64_relocator::tables::actor_overlay_table::ActorOverlayTable;
use z64_relocator::tables::object_table::ObjectTable;
use z64_relocator::tables::scene_headers::SceneHeaderRoomLists;
use z64_relocator::tables::scene_table::SceneTable;
use z64_relocator::*;

fn full_image() -> SyntheticImage {
    SyntheticRom::new()
        .file("gameplay_keep", vec![1; 0x400])
        .file("object_link", vec![2; 0x180])
        .file("ovl_En_Test", vec![3; 0x90])
        .file("ovl_Boss", vec![4; 0x50])
        .file("room_0", vec![5; 0x60])
        .file("room_1", vec![6; 0x30])
        .file("title_card", vec![7; 0x20])
        .scene_file("test_scene", &[&["room_0", "room_1"], &["room_1"]])
        .object(None)
        .object(Some("gameplay_keep"))
        .object(Some("object_link"))
        .internal_actor("Player")
        .unset_actor()
        .actor_overlay("ovl_En_Test", "En_Test", 0)
        .actor_overlay("ovl_Boss", "Boss", 2)
        .scene(Some("test_scene"), Some("title_card"))
        .scene(None, None)
        .build()
}

fn names(rom: &Rom, files: impl Iterator<Item = FileId>) -> Vec<String> {
    files
        .map(|id| rom.file(id).unwrap().name().unwrap_or("-").to_string())
        .collect()
}

fn assert_disjoint(mut ranges: Vec<AddrRange>) {
    ranges.sort_by_key(|r| r.start);
    for pair in ranges.windows(2) {
        assert!(pair[0].end <= pair[1].start, "{} overlaps {}", pair[0], pair[1]);
    }
}

/// Deux fichiers de 100 et 50 octets replacés en VROM : le plus grand prend
/// la première adresse libre alignée
#[test]
fn test_largest_file_placed_first() -> Result<()> {
    let image = SyntheticRom::minimal()
        .file("a", vec![0xAA; 100])
        .file("b", vec![0xBB; 50])
        .build();
    let mut rom = RomReader::new(&image.revision, &image.data).read()?;
    let a = FileId(2);
    let b = FileId(3);
    rom.mark_movable(a, AddressSpaces::VROM)?;
    rom.mark_movable(b, AddressSpaces::VROM)?;

    let config = ReallocConfig {
        move_rom: false,
        max_vrom: 1000,
        max_rom: 1000,
        ..ReallocConfig::default()
    };
    let moved = ReallocEngine::new(&config).realloc_vrom(&mut rom)?;
    assert_eq!(moved, vec![a, b]);

    let dmadata_end = image.range_of("dmadata").unwrap().end;
    let range_a = rom.file(a)?.dma_entry.vrom()?;
    let range_b = rom.file(b)?.dma_entry.vrom()?;
    assert_eq!(range_a.start, align_up(dmadata_end, 0x10).unwrap());
    assert_eq!(range_a.len(), 100);
    assert_eq!(range_b.len(), 50);
    assert!(range_a.end <= range_b.start);
    assert_eq!(range_b.start % 0x10, 0);

    let ranges = rom
        .files()
        .iter()
        .map(|f| f.dma_entry.vrom())
        .collect::<Result<Vec<_>>>()?;
    assert_disjoint(ranges);
    Ok(())
}

#[test]
fn test_full_pipeline() -> Result<()> {
    let image = full_image();
    let mut config = RelocatorConfig::default();
    config.output.dump_tables = true;
    let output = Relocator::new(config).run_with_revision(&image.revision, &image.data)?;

    let rom = RomReader::new(&image.revision, &output.image).read()?;
    assert_eq!(rom.len(), image.files.len());
    for (file, (name, range)) in rom.files().iter().zip(&image.files) {
        assert_eq!(file.name(), Some(name.as_str()));
        assert_eq!(file.size(), range.len());
    }

    // tous les fichiers restent disjoints dans les deux espaces
    let vrom = rom
        .files()
        .iter()
        .map(|f| f.dma_entry.vrom())
        .collect::<Result<Vec<_>>>()?;
    assert_disjoint(vrom);
    let physical = rom
        .files()
        .iter()
        .map(|f| f.rom_range())
        .collect::<Result<Vec<_>>>()?;
    assert_disjoint(physical);

    // les tables désignent toujours les mêmes fichiers
    let revision = &image.revision;
    let objects = ObjectTable::parse(&rom, revision.object_table.as_ref().unwrap())?;
    assert_eq!(
        names(&rom, objects.files()),
        vec!["gameplay_keep", "object_link"]
    );

    let scenes = SceneTable::parse(&rom, revision.scene_table.as_ref().unwrap())?;
    assert_eq!(names(&rom, scenes.files()), vec!["test_scene", "title_card"]);

    let rooms = SceneHeaderRoomLists::parse(&rom, &scenes.scene_files())?;
    assert_eq!(names(&rom, rooms.files()), vec!["room_0", "room_1", "room_1"]);

    let mut rom = rom;
    let actors = ActorOverlayTable::parse(&mut rom, revision.actor_overlay_table.as_ref().unwrap())?;
    let actor_names: Vec<Option<String>> = actors
        .entries
        .iter()
        .map(|e| e.as_ref().and_then(|a| a.name.clone()))
        .collect();
    assert_eq!(
        actor_names,
        vec![
            Some("Player".to_string()),
            None,
            Some("En_Test".to_string()),
            Some("Boss".to_string())
        ]
    );
    assert_eq!(names(&rom, actors.files()), vec!["ovl_En_Test", "ovl_Boss"]);

    let dump = output.dump.expect("dump requested");
    for section in ["dma", "object table", "actor overlay table", "scene table", "scene header room lists"] {
        assert!(dump.get(section).is_some(), "missing dump section {}", section);
    }
    Ok(())
}

#[test]
fn test_runs_are_deterministic() -> Result<()> {
    let image = full_image();
    let relocator = Relocator::new(RelocatorConfig::default());
    let first = relocator.run_with_revision(&image.revision, &image.data)?;
    let second = relocator.run_with_revision(&image.revision, &image.data)?;
    assert_eq!(first.image, second.image);
    assert_eq!(first.output_digest, second.output_digest);
    Ok(())
}

#[test]
fn test_switches_off_keep_layout() -> Result<()> {
    let image = full_image();
    let mut config = RelocatorConfig::default();
    config.realloc.move_vrom = false;
    config.realloc.move_rom = false;
    let output = Relocator::new(config).run_with_revision(&image.revision, &image.data)?;

    let rom = RomReader::new(&image.revision, &output.image).read()?;
    for (file, (_, range)) in rom.files().iter().zip(&image.files) {
        assert_eq!(file.dma_entry.vrom()?, *range);
        assert_eq!(file.rom_range()?, *range);
    }
    Ok(())
}

#[test]
fn test_auto_identification() -> Result<()> {
    let image = full_image();
    let mut revision = image.revision.clone();
    revision.name = "custom".to_string();
    revision.md5 = Some(ImageDigest::calculate_md5(&image.data));

    let mut config = RelocatorConfig::default();
    config.revisions.push(revision);
    let output = Relocator::new(config).run(&image.data)?;
    assert_eq!(output.revision, "custom");
    Ok(())
}

#[test]
fn test_inserted_file_overflows_filename_table() -> Result<()> {
    let image = SyntheticRom::minimal().file("a", vec![1; 0x20]).build();
    let mut rom = RomReader::new(&image.revision, &image.data).read()?;
    let inserted = rom.insert_file("extra", vec![2; 0x40]);

    ReallocEngine::new(&ReallocConfig::default()).run(&mut rom)?;
    let file = rom.file(inserted)?;
    assert!(file.dma_entry.is_placed());
    assert_eq!(file.dma_entry.rom_end, 0);

    rom.reclaim_string_pools();
    assert!(matches!(
        pack_dma_filenames(&mut rom),
        Err(RelocError::Capacity(_))
    ));

    // la table DMA a des emplacements libres
    pack_dma_table(&mut rom)?;
    let mut revision = image.revision.clone();
    revision.dma_table_filenames_boot_offset = None;
    let output = build_image(&rom)?;
    let reread = RomReader::new(&revision, &output).read()?;
    assert_eq!(reread.len(), 4);
    assert_eq!(reread.file(inserted)?.data, vec![2; 0x40]);
    Ok(())
}

#[test]
fn test_config_file_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("relocator.toml");
    let path = path.to_str().unwrap();

    let mut config = RelocatorConfig::default();
    config.revision = "synthetic".to_string();
    config.realloc.move_rom = false;
    config.output.dump_tables = true;
    config.revisions.push(full_image().revision);
    config.save_to_file(path)?;

    let loaded = RelocatorConfig::load_from_file(path)?;
    assert_eq!(loaded.revision, "synthetic");
    assert_eq!(loaded.realloc, config.realloc);
    assert_eq!(loaded.output, config.output);
    assert_eq!(loaded.revisions, config.revisions);

    let image = full_image();
    let output = Relocator::new(loaded).run(&image.data)?;
    assert!(output.dump.is_some());
    Ok(())
}
