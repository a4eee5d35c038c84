use criterion::{Criterion, criterion_group, criterion_main};
use rtlink::{
    Loader, ModuleRegistry,
    input::{FuncMeta, ObjSymbol, ObjectBinary, ObjectInput, RelocEntry, SymKind, TableRef},
    metadata::PcTableEncoder,
    relocation::RelocKind,
};
use std::hint::black_box;

/// One object of `n` functions, each calling the next and carrying side tables.
fn object(n: usize) -> ObjectInput<'static> {
    let mut bytes = vec![0u8; 16];
    let mut enc = PcTableEncoder::new();
    enc.push(16, 0).push(16, 8);
    let table = enc.finish();
    let at = bytes.len();
    bytes.extend_from_slice(&table);
    let table = TableRef::new(at, table.len());
    let code_at = bytes.len();
    bytes.extend_from_slice(&[0xe8, 0, 0, 0, 0, 0xc3]);
    bytes.resize(code_at + 32, 0xcc);

    let symbols = (0..n)
        .map(|i| {
            let next = format!("fn{}", (i + 1) % n);
            ObjSymbol::new(format!("fn{i}"), SymKind::Text, code_at, 32)
                .with_relocs(vec![RelocEntry::new(1, RelocKind::CallRel32 as u32, next, -4)])
                .with_func(FuncMeta {
                    files: vec!["bench.go".to_string()],
                    pcsp: table,
                    pcfile: table,
                    pcline: table,
                    ..Default::default()
                })
        })
        .collect();
    ObjectInput::new(ObjectBinary::new("bench.o", bytes), symbols).unwrap()
}

fn load_benchmark(c: &mut Criterion) {
    let loader = Loader::new();
    c.bench_function("rtlink:load_1000", |b| {
        b.iter(|| loader.load([object(1000)], &()).unwrap());
    });
}

fn find_func_benchmark(c: &mut Criterion) {
    let registry = ModuleRegistry::new();
    let module = registry.publish(Loader::new().load([object(1000)], &()).unwrap());
    let pcs: Vec<usize> = (module.minpc()..module.maxpc()).step_by(97).collect();
    c.bench_function("rtlink:find_func", |b| {
        b.iter(|| {
            for pc in &pcs {
                black_box(module.find_func(*pc).map(|f| f.entry()));
            }
        })
    });
    c.bench_function("rtlink:registry_line", |b| {
        b.iter(|| {
            for pc in &pcs {
                black_box(registry.with_func(*pc, |f| f.line(*pc)));
            }
        })
    });
}

criterion_group!(benches, load_benchmark, find_func_benchmark);
criterion_main!(benches);
