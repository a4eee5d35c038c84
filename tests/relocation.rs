mod common;

use common::{ObjBuilder, filler, init_logger, read_bytes, read_u32, read_u64, reloc};
use rtlink::{Error, Loader, ResidentSymbols, input::SymKind, relocation::RelocKind};
use rstest::rstest;

/// An address no mapping of ours gets within 2GiB of.
const FAR: usize = 0x10;

#[rstest]
#[case(0)]
#[case(8)]
#[case(-16)]
fn absolute_addresses_include_the_addend(#[case] addend: i64) {
    init_logger();
    let input = ObjBuilder::new("abs.o")
        .data("target", &[0; 32], vec![])
        .data("ptr", &[0; 8], vec![reloc(0, RelocKind::Abs64, "target", addend)])
        .build();
    let module = Loader::new().load([input], &()).unwrap();
    let target = module.symbol_addr("target").unwrap();
    let ptr = module.symbol_addr("ptr").unwrap();
    assert_eq!(unsafe { read_u64(ptr) }, (target as i64 + addend) as u64);
}

#[rstest]
fn abs32_must_fit() {
    let host = ResidentSymbols::new()
        .with("low", 0x1234)
        .with("high", 0x1_0000_0000);
    let input = ObjBuilder::new("abs32.o")
        .data("p", &[0; 4], vec![reloc(0, RelocKind::Abs32, "low", 4)])
        .build();
    let module = Loader::new().load([input], &host).unwrap();
    assert_eq!(unsafe { read_u32(module.symbol_addr("p").unwrap()) }, 0x1238);

    let input = ObjBuilder::new("abs32.o")
        .data("p", &[0; 4], vec![reloc(0, RelocKind::Abs32, "high", 0)])
        .build();
    let err = Loader::new().load([input], &host).unwrap_err();
    assert!(matches!(err, Error::Relocation { .. }), "{err}");
}

#[rstest]
fn pc_relative_displacement_reaches_read_only_data() {
    let input = ObjBuilder::new("pcrel.o")
        .text(
            "f",
            &filler(16),
            vec![reloc(3, RelocKind::PcRel32, "table", -4)],
        )
        .symbol("table", SymKind::ReadOnly, &[1; 16], vec![])
        .build();
    let module = Loader::new().load([input], &()).unwrap();
    let f = module.symbol_addr("f").unwrap();
    let table = module.symbol_addr("table").unwrap();
    assert!(module.rodata().contains(&table));
    let disp = unsafe { read_u32(f + 3) } as i32;
    assert_eq!((f + 3 + 4) as i64 + disp as i64, table as i64);
    assert_eq!(unsafe { read_bytes(table, 16) }, &[1; 16]);
}

#[rstest]
fn module_offsets_are_relative_to_the_base() {
    let input = ObjBuilder::new("off.o")
        .text("f", &filler(8), vec![])
        .text("g", &filler(8), vec![])
        .data("off", &[0; 4], vec![reloc(0, RelocKind::ModuleOff32, "g", 2)])
        .build();
    let module = Loader::new().load([input], &()).unwrap();
    let g = module.symbol_addr("g").unwrap();
    let off = unsafe { read_u32(module.symbol_addr("off").unwrap()) };
    assert_eq!(off as usize, g + 2 - module.base());

    let host = ResidentSymbols::new().with("elsewhere", FAR);
    let input = ObjBuilder::new("off.o")
        .data("off", &[0; 4], vec![reloc(0, RelocKind::ModuleOff32, "elsewhere", 0)])
        .build();
    let err = Loader::new().load([input], &host).unwrap_err();
    assert!(matches!(err, Error::Relocation { .. }), "{err}");
}

#[rstest]
fn far_x86_calls_share_one_stub() {
    init_logger();
    let host = ResidentSymbols::new().with("far_away", FAR);
    let code = [0xe8, 0, 0, 0, 0, 0xe8, 0, 0, 0, 0, 0xc3];
    let input = ObjBuilder::new("stub.o")
        .text(
            "f",
            &code,
            vec![
                reloc(1, RelocKind::CallRel32, "far_away", -4),
                reloc(6, RelocKind::CallRel32, "far_away", -4),
            ],
        )
        .build();
    let module = Loader::new().load([input], &host).unwrap();
    let f = module.symbol_addr("f").unwrap();
    let callee = |at: usize| {
        let disp = unsafe { read_u32(at) } as i32;
        (at + 4).wrapping_add_signed(disp as isize)
    };
    let stub = callee(f + 1);
    assert_eq!(stub, callee(f + 6));
    assert!(stub >= module.maxpc() && module.text().contains(&stub));
    assert_eq!(unsafe { read_bytes(stub, 6) }, &[0xff, 0x25, 0, 0, 0, 0]);
    assert_eq!(unsafe { read_u64(stub + 6) }, FAR as u64);
}

#[rstest]
fn near_x86_calls_are_direct() {
    let input = ObjBuilder::new("near.o")
        .text("g", &filler(4), vec![])
        .text(
            "f",
            &[0xe8, 0, 0, 0, 0, 0xc3],
            vec![reloc(1, RelocKind::CallRel32, "g", -4)],
        )
        .build();
    let module = Loader::new().load([input], &()).unwrap();
    let f = module.symbol_addr("f").unwrap();
    let g = module.symbol_addr("g").unwrap();
    let disp = unsafe { read_u32(f + 1) } as i32;
    assert_eq!((f + 5).wrapping_add_signed(disp as isize), g);
    assert_eq!(module.text().end, module.maxpc());
}

const BL: [u8; 4] = 0x9400_0000u32.to_le_bytes();

#[rstest]
fn near_aarch64_branches_encode_the_word_offset() {
    let mut code = BL.to_vec();
    code.extend_from_slice(&[0; 12]);
    let input = ObjBuilder::new("bl.o")
        .text("f", &code, vec![reloc(0, RelocKind::Call26, "g", 0)])
        .text("g", &filler(4), vec![])
        .build();
    let module = Loader::new().load([input], &()).unwrap();
    let f = module.symbol_addr("f").unwrap();
    let g = module.symbol_addr("g").unwrap();
    assert_eq!(g - f, 16);
    assert_eq!(unsafe { read_u32(f) }, 0x9400_0004);
}

#[rstest]
fn far_aarch64_branches_go_through_a_stub() {
    let host = ResidentSymbols::new().with("far_away", FAR);
    let input = ObjBuilder::new("bl.o")
        .text("f", &BL, vec![reloc(0, RelocKind::Call26, "far_away", 0)])
        .build();
    let module = Loader::new().load([input], &host).unwrap();
    let f = module.symbol_addr("f").unwrap();
    let insn = unsafe { read_u32(f) };
    assert_eq!(insn & 0xfc00_0000, 0x9400_0000);
    let imm = ((insn & 0x03ff_ffff) << 6) as i32 >> 6;
    let stub = f.wrapping_add_signed(imm as isize * 4);
    assert!(stub >= module.maxpc() && module.text().contains(&stub));
    assert_eq!(
        unsafe { read_bytes(stub, 8) },
        &[0x50, 0x00, 0x00, 0x58, 0x00, 0x02, 0x1f, 0xd6]
    );
    assert_eq!(unsafe { read_u64(stub + 8) }, FAR as u64);
}
