mod common;

use common::{ObjBuilder, filler, flat_table, init_logger, read_bytes, read_u64, reloc};
use rtlink::{
    Error, Loader, ResidentSymbols,
    input::SymKind,
    metadata::{PC_BUCKET_SIZE, PcTableEncoder},
    relocation::RelocKind,
};
use rstest::rstest;

fn tables(len: usize) -> [Vec<u8>; 3] {
    [flat_table(len, 0), flat_table(len, 0), flat_table(len, 1)]
}

#[rstest]
fn auxiliary_objects_are_shared_by_name() {
    init_logger();
    static HOST_MAP: [u8; 4] = [9, 9, 9, 9];
    let host_map = HOST_MAP.as_ptr() as usize;
    let host = ResidentSymbols::new().with("gclocals.host", host_map);
    let input = ObjBuilder::new("gc.o")
        .aux("gcargs.shared", &[0xde, 0xad, 0xbe, 0xef])
        .data("stkobj.f", &[1; 8], vec![])
        .func(
            "f",
            &filler(16),
            vec![],
            &["main.go"],
            tables(16),
            &["gcargs.shared", "", "gclocals.host", "stkobj.f"],
        )
        .func(
            "g",
            &filler(16),
            vec![],
            &["main.go"],
            tables(16),
            &["gcargs.shared"],
        )
        .build();
    let module = Loader::new().load([input], &host).unwrap();
    let f = module.func("f").unwrap();
    let g = module.func("g").unwrap();

    let shared = f.funcdata(0).unwrap();
    assert_eq!(g.funcdata(0), Some(shared));
    assert!(module.rodata().contains(&shared));
    assert_eq!(module.rodata().len(), 4);
    assert_eq!(unsafe { read_bytes(shared, 4) }, &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(module.symbol_addr("gcargs.shared"), None);

    assert_eq!(f.funcdata(1), None);
    assert_eq!(f.funcdata(2), Some(host_map));
    assert_eq!(f.funcdata(3), module.symbol_addr("stkobj.f"));
    assert_eq!(f.funcdata(4), None);
}

#[rstest]
fn auxiliary_objects_are_relocated() {
    let input = ObjBuilder::new("stkobj.o")
        .data("x", &[0; 8], vec![])
        .symbol(
            "stkobj.desc",
            SymKind::Aux,
            &[0; 16],
            vec![
                reloc(0, RelocKind::Abs64, "stkobj.inner", 0),
                reloc(8, RelocKind::Abs64, "x", 0),
            ],
        )
        .symbol(
            "stkobj.inner",
            SymKind::Aux,
            &[0; 8],
            vec![reloc(0, RelocKind::Abs64, "x", 4)],
        )
        .func(
            "f",
            &filler(16),
            vec![],
            &["main.go"],
            tables(16),
            &["stkobj.desc"],
        )
        .build();
    let module = Loader::new().load([input], &()).unwrap();
    let desc = module.func("f").unwrap().funcdata(0).unwrap();
    let x = module.symbol_addr("x").unwrap();
    assert_eq!(unsafe { read_u64(desc + 8) }, x as u64);

    let inner = unsafe { read_u64(desc) } as usize;
    assert_ne!(inner, desc);
    assert!(module.rodata().contains(&inner));
    assert_eq!(unsafe { read_u64(inner) }, x as u64 + 4);
    assert_eq!(module.rodata().len(), 24);
}

#[rstest]
fn file_names_are_stored_once() {
    let input = ObjBuilder::new("files.o")
        .func("f", &filler(16), vec![], &["main.go"], tables(16), &[])
        .func(
            "g",
            &filler(16),
            vec![],
            &["main.go", "util.go"],
            tables(16),
            &[],
        )
        .build();
    let module = Loader::new().load([input], &()).unwrap();
    let filetab = module.filetab();
    assert_eq!(filetab.len(), 3);
    assert_eq!(filetab[0], filetab[1]);
    assert_ne!(filetab[1], filetab[2]);
    let pool = module.pclntable();
    let copies = pool.windows(8).filter(|w| *w == b"main.go\0").count();
    assert_eq!(copies, 1);

    let g = module.func("g").unwrap();
    assert_eq!(g.files().collect::<Vec<_>>(), ["main.go", "util.go"]);
    assert_eq!(g.args(), 16);
}

#[rstest]
fn pc_tables_decode_per_instruction() {
    let mut pcsp = PcTableEncoder::new();
    pcsp.push(8, 0).push(24, 16);
    let mut pcfile = PcTableEncoder::new();
    pcfile.push(16, 0).push(16, 1);
    let mut pcline = PcTableEncoder::new();
    pcline.push(4, 10).push(12, 11).push(16, 12);
    let input = ObjBuilder::new("lines.o")
        .func(
            "h",
            &filler(32),
            vec![],
            &["a.go", "b.go"],
            [pcsp.finish(), pcfile.finish(), pcline.finish()],
            &[],
        )
        .build();
    let module = Loader::new().load([input], &()).unwrap();
    let h = module.func("h").unwrap();
    let entry = h.entry();
    assert_eq!(h.end(), entry + 32);
    assert_eq!(h.sp_delta(entry), Some(0));
    assert_eq!(h.sp_delta(entry + 8), Some(16));
    assert_eq!(h.file(entry + 12), Some("a.go"));
    assert_eq!(h.file(entry + 16), Some("b.go"));
    assert_eq!(h.line(entry), Some(10));
    assert_eq!(h.line(entry + 4), Some(11));
    assert_eq!(h.line(entry + 31), Some(12));
    assert_eq!(h.line(entry + 32), None);
    assert_eq!(h.pcdata(0, entry), None);
}

#[rstest]
fn every_code_address_maps_to_its_function() {
    init_logger();
    let mut obj = ObjBuilder::new("many.o");
    for i in 0..300 {
        obj.text(&format!("fn{i}"), &filler(1 + (i * 7) % 40), vec![]);
    }
    let module = Loader::new().load([obj.build()], &()).unwrap();
    assert_eq!(module.nfuncs(), 300);
    let span = module.maxpc() - module.minpc();
    assert!(span > 2 * PC_BUCKET_SIZE);
    assert_eq!(module.findfunctab().len(), span.div_ceil(PC_BUCKET_SIZE));

    for (i, func) in module.funcs().enumerate() {
        assert_eq!(func.name(), format!("fn{i}"));
        assert_eq!(
            module.find_func(func.entry()).unwrap().index(),
            func.index()
        );
    }
    for pc in module.minpc()..module.maxpc() {
        let func = module.find_func(pc).unwrap();
        assert!(func.entry() <= pc && pc < func.end(), "pc 0x{pc:x}");
    }
    assert!(module.find_func(module.maxpc()).is_none());
    assert!(module.find_func(module.minpc() - 1).is_none());

    let ftab = module.ftab();
    assert_eq!(ftab.last().unwrap().entry, module.maxpc());
    assert!(ftab.windows(2).all(|w| w[0].entry < w[1].entry));
    module.verify().unwrap();
}

#[rstest]
fn each_object_gets_a_text_section() {
    let a = ObjBuilder::new("a.o")
        .text("a0", &filler(20), vec![])
        .text("a1", &filler(8), vec![])
        .build();
    let b = ObjBuilder::new("b.o").text("b0", &filler(12), vec![]).build();
    let module = Loader::new().load([a, b], &()).unwrap();
    let sects = module.textsects();
    assert_eq!(sects.len(), 2);
    let b0 = module.symbol_addr("b0").unwrap();
    assert_eq!(sects[1].vaddr, b0 - module.minpc());
    assert_eq!(sects[1].baseaddr, b0);
    assert_eq!(module.text_addr(sects[1].vaddr + 4), Some(b0 + 4));
    assert_eq!(module.text_addr(0), module.symbol_addr("a0"));
    assert_eq!(module.text_addr(sects[1].vaddr + sects[1].length), None);
}

#[rstest]
fn packed_functions_overflow_the_pc_index() {
    let mut obj = ObjBuilder::new("dense.o");
    for i in 0..300 {
        obj.text(&format!("fn{i}"), &filler(1), vec![]);
    }
    let mut loader = Loader::new();
    loader.with_func_align(1);
    let err = loader.load([obj.build()], &()).unwrap_err();
    assert!(matches!(err, Error::PcIndexOverflow { .. }), "{err}");
}

#[rstest]
fn data_only_modules_have_no_functions() {
    let input = ObjBuilder::new("data.o").data("d", &[1; 16], vec![]).build();
    let module = Loader::new().load([input], &()).unwrap();
    assert_eq!(module.nfuncs(), 0);
    assert!(module.findfunctab().is_empty());
    assert!(module.find_func(module.symbol_addr("d").unwrap()).is_none());
    module.verify().unwrap();
}
