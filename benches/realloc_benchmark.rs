use criterion::{black_box, criterion_group, criterion_main, Criterion};
use z64_relocator::{
    AddressSpaces, FileId, ReallocConfig, ReallocEngine, RelocatorConfig, Relocator, RomReader,
    SyntheticImage, SyntheticRom,
};

fn many_files(count: usize) -> SyntheticImage {
    let mut builder = SyntheticRom::minimal().spare_dma_entries(0);
    for i in 0..count {
        builder = builder.file(&format!("file_{:04}", i), vec![i as u8; 0x40 + (i * 0x34) % 0x400]);
    }
    builder.build()
}

fn benchmark_realloc(c: &mut Criterion) {
    let image = many_files(500);
    let rom = RomReader::new(&image.revision, &image.data).read().unwrap();
    let config = ReallocConfig::default();

    c.bench_function("realloc_500_files", |b| {
        b.iter(|| {
            let mut rom = rom.clone();
            for index in 2..rom.len() {
                rom.mark_movable(FileId(index), AddressSpaces::all()).unwrap();
            }
            ReallocEngine::new(black_box(&config)).run(&mut rom).unwrap();
            rom
        })
    });
}

fn benchmark_pipeline(c: &mut Criterion) {
    let image = SyntheticRom::new()
        .file("gameplay_keep", vec![1; 0x4000])
        .file("object_link", vec![2; 0x1800])
        .file("ovl_En_Test", vec![3; 0x900])
        .file("room_0", vec![4; 0x600])
        .file("room_1", vec![5; 0x300])
        .scene_file("test_scene", &[&["room_0", "room_1"]])
        .object(Some("gameplay_keep"))
        .object(Some("object_link"))
        .actor_overlay("ovl_En_Test", "En_Test", 0)
        .scene(Some("test_scene"), None)
        .build();
    let relocator = Relocator::new(RelocatorConfig::default());

    c.bench_function("relocator_pipeline", |b| {
        b.iter(|| {
            relocator
                .run_with_revision(&image.revision, black_box(&image.data))
                .unwrap()
        })
    });
}

criterion_group!(benches, benchmark_realloc, benchmark_pipeline);
criterion_main!(benches);
