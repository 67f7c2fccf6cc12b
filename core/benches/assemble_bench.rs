use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use evmasm_core::{Assembly, AssemblyItem, Instruction, ItemKind, OptimiserSettings};
use std::hint::black_box;

// Dispatcher-like program: `blocks` identical revert blocks plus a constant-heavy body,
// wrapped in a creation node that copies the runtime sub-assembly.
fn make_program(blocks: usize) -> Assembly {
    let mut runtime = Assembly::new();
    let mut targets = Vec::with_capacity(blocks);
    for i in 0..blocks {
        let tag = runtime.new_tag().unwrap();
        runtime.append_push(i as u64).unwrap();
        runtime.append(Instruction::CALLDATALOAD).unwrap();
        runtime.append_jumpi(&tag).unwrap();
        targets.push(tag);
    }
    runtime.append_push(u64::MAX).unwrap();
    runtime.append_push(0xff00u64).unwrap();
    runtime.append(Instruction::AND).unwrap();
    runtime.append_push(0u64).unwrap();
    runtime.append(Instruction::SSTORE).unwrap();
    runtime.append(Instruction::STOP).unwrap();
    for tag in targets {
        runtime.append(tag).unwrap();
        runtime.append_push(0u64).unwrap();
        runtime.append(Instruction::DUP1).unwrap();
        runtime.append(Instruction::REVERT).unwrap();
    }

    let mut creation = Assembly::new();
    let sub = creation.append_sub(runtime).unwrap();
    let size = creation.new_push_sub_size(sub);
    creation.append(size).unwrap();
    creation.append(Instruction::DUP1).unwrap();
    creation.append(AssemblyItem::new(ItemKind::PushSub(sub))).unwrap();
    creation.append_push(0u64).unwrap();
    creation.append(Instruction::CODECOPY).unwrap();
    creation.append_push(0u64).unwrap();
    creation.append(Instruction::RETURN).unwrap();
    creation
}

fn bench_assemble(c: &mut Criterion) {
    c.bench_function("assemble_unoptimised_200", |b| {
        b.iter_batched(
            || make_program(200),
            |mut asm| {
                let len = asm.assemble().unwrap().len();
                black_box(len);
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_optimise(c: &mut Criterion) {
    let settings = OptimiserSettings::full();
    c.bench_function("optimise_and_assemble_200", |b| {
        b.iter_batched(
            || make_program(200),
            |mut asm| {
                asm.optimise(&settings).unwrap();
                let len = asm.assemble().unwrap().len();
                black_box(len);
            },
            BatchSize::SmallInput,
        )
    });

    // Peephole alone, to compare against the full pipeline
    let minimal = OptimiserSettings::minimal();
    c.bench_function("peephole_only_200", |b| {
        b.iter_batched(
            || make_program(200),
            |mut asm| {
                asm.optimise(&minimal).unwrap();
                black_box(asm.items().len());
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_assemble, bench_optimise);
criterion_main!(benches);
