use std::f64::consts::PI;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rustpti::decimation::DecimationSetup;
use rustpti::frame::RawFrame;
use rustpti::interferometer::{CalibrationModel, ChannelCalibration};
use rustpti::pipeline::Pipeline;

const SAMPLES: usize = 8000;
const PERIOD: usize = 100;

fn synthetic_frame(theta: f64) -> RawFrame {
    let output_phases = [0.0, 2.0 * PI / 3.0, 4.0 * PI / 3.0];
    let omega = 2.0 * PI / PERIOD as f64;
    let reference: Vec<f64> = (0..SAMPLES)
        .map(|i| if i % PERIOD < PERIOD / 2 { 1.0 } else { 0.0 })
        .collect();
    let dc: Vec<Vec<f64>> = output_phases
        .iter()
        .map(|offset| vec![2.0 + (theta - offset).cos(); SAMPLES])
        .collect();
    let ac: Vec<Vec<f64>> = output_phases
        .iter()
        .map(|offset| {
            (0..SAMPLES)
                .map(|i| 0.01 * (omega * i as f64 + offset).sin())
                .collect()
        })
        .collect();
    RawFrame::new(dc.try_into().unwrap(), ac.try_into().unwrap(), reference).unwrap()
}

fn production_model() -> CalibrationModel {
    let output_phases = [0.0, 2.0 * PI / 3.0, 4.0 * PI / 3.0];
    let mut channels = [ChannelCalibration::default(); 3];
    for (index, channel) in channels.iter_mut().enumerate() {
        channel.min_intensity = 1.0;
        channel.max_intensity = 3.0;
        channel.output_phase = output_phases[index];
    }
    CalibrationModel::new(channels, false).unwrap()
}

pub fn frame_pipeline(c: &mut Criterion) {
    let pipeline = Pipeline::new(DecimationSetup::new(), production_model());
    let frame = synthetic_frame(0.8);
    c.bench_function("process_frame 8k samples", |b| {
        b.iter(|| black_box(pipeline.process_frame(black_box(&frame))))
    });
}

pub fn phase_recovery(c: &mut Criterion) {
    let model = production_model();
    c.bench_function("interferometric_phase", |b| {
        b.iter(|| black_box(model.interferometric_phase(black_box([2.3, 1.4, 2.1]))))
    });
}

criterion_group!(benches, frame_pipeline, phase_recovery);
criterion_main!(benches);
