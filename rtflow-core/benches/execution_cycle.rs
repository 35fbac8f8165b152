//! Execution cycle benchmark: cost of one tick for gain chains and fan-in
//! trees of increasing size.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use rtflow_core::systems::{Constant, Gain, Polarity, Summer};
use rtflow_core::ManualExecutionManager;

/// Constant -> Gain -> Gain -> ... (`len` gains), sink managed.
fn gain_chain(len: usize) -> ManualExecutionManager {
    let manager = ManualExecutionManager::new(0.001).expect("valid period");
    {
        let mut graph = manager.lock();
        let source = Constant::add(&mut graph, 1.0_f64);
        let mut upstream = graph.system(source).expect("source").output();
        let mut last = None;
        for _ in 0..len {
            let gain = Gain::add(&mut graph, 1.000_1);
            let (input, output) = {
                let gain = graph.system(gain).expect("gain");
                (gain.input(), gain.output())
            };
            graph.connect(upstream, input).expect("connect");
            upstream = output;
            last = Some(gain);
        }
        if let Some(sink) = last {
            graph.start_managing(sink, true).expect("manage");
        }
    }
    manager
}

/// One constant fanned out to `width` gains, all summed by one summer.
fn fan_in(width: usize) -> ManualExecutionManager {
    let manager = ManualExecutionManager::new(0.001).expect("valid period");
    {
        let mut graph = manager.lock();
        let source = Constant::add(&mut graph, 2.0_f64);
        let source_out = graph.system(source).expect("source").output();
        let summer = Summer::<f64>::add(&mut graph, &vec![Polarity::Positive; width]);
        for index in 0..width {
            let gain = Gain::add(&mut graph, index as f64);
            let (input, output) = {
                let gain = graph.system(gain).expect("gain");
                (gain.input(), gain.output())
            };
            let summer_in = graph.system(summer).expect("summer").input(index).expect("input");
            graph.connect(source_out, input).expect("connect");
            graph.connect(output, summer_in).expect("connect");
        }
        graph.start_managing(summer, true).expect("manage");
    }
    manager
}

fn bench_gain_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("gain_chain");
    for len in [1, 16, 128, 512] {
        let manager = gain_chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| manager.run_execution_cycle().expect("cycle"));
        });
    }
    group.finish();
}

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_in");
    for width in [2, 16, 128] {
        let manager = fan_in(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| manager.run_execution_cycle().expect("cycle"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gain_chain, bench_fan_in);
criterion_main!(benches);
