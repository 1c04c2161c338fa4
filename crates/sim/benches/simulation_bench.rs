use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ligo_sim::base::SequenceType;
use ligo_sim::generative::{GenerativeModel, GenerativeModelConfig, RecombinationModel};
use ligo_sim::implants::{SeedMotif, Signal, SignalAnnotator};
use ligo_sim::simulation::{LigoImplanter, SignalTarget, SimConfig, SimConfigItem, SimulationParams};
use std::collections::BTreeMap;
use std::sync::Arc;

fn model() -> Arc<dyn GenerativeModel> {
    Arc::new(RecombinationModel::builtin("humanTRB", true).unwrap())
}

fn signals() -> Vec<Signal> {
    vec![
        Signal::new("s1", vec![SeedMotif::new("m1", "AS/G").with_gap(1, 2)]),
        Signal::new(
            "s2",
            vec![SeedMotif::new("m2", "QETQ").with_hamming_distances(BTreeMap::from([(0, 0.5), (1, 0.5)]))],
        ),
    ]
}

fn bench_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("generation");
    let model = model();

    for size in [100, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("recombination", size), &size, |b, &size| {
            b.iter(|| {
                black_box(
                    model
                        .generate_sequences(black_box(size), 42, SequenceType::AminoAcid, false)
                        .unwrap(),
                )
            })
        });
    }

    let batch = model.generate_sequences(100, 42, SequenceType::AminoAcid, false).unwrap();
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("p_gen_amino_acid", |b| {
        b.iter(|| black_box(model.compute_p_gens(black_box(&batch), SequenceType::AminoAcid).unwrap()))
    });

    group.finish();
}

fn bench_annotation(c: &mut Criterion) {
    let mut group = c.benchmark_group("annotation");
    let batch = model().generate_sequences(1_000, 7, SequenceType::AminoAcid, false).unwrap();
    let annotator = SignalAnnotator::new(&signals(), SequenceType::AminoAcid).unwrap();

    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("annotate_all", |b| {
        b.iter_batched(
            || batch.clone(),
            |batch| black_box(annotator.annotate_all(batch)),
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_make_sequences(c: &mut Criterion) {
    let mut group = c.benchmark_group("make_sequences");
    group.sample_size(10);

    let signals = signals();
    let item = SimConfigItem::new("bench", GenerativeModelConfig::recombination("humanTRB"))
        .with_examples(500)
        .with_signal("s1", SignalTarget::Rate(0.1))
        .with_seed(1);
    let sim = SimConfig::new(vec![item.clone()]);
    let params = SimulationParams {
        sequence_batch_size: 1_000,
        ..SimulationParams::default()
    };
    let model = model();

    group.throughput(Throughput::Elements(item.number_of_examples as u64));
    group.bench_function("implanting", |b| {
        b.iter(|| {
            let mut implanter = LigoImplanter::new(&item, &sim, &params, &signals, Arc::clone(&model)).unwrap();
            black_box(implanter.make_sequences().unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_generation, bench_annotation, bench_make_sequences);
criterion_main!(benches);
