//! Benchmark for the full compile pipeline and artifact encoding.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use glsl_xc::{compile, CompileOptions, CompiledArtifact, DiagnosticLog, Stage, TargetProfile};

const FRAGMENT: &str = "#version 300 es
uniform vec4 u_tint;
uniform vec4 u_lights[8];
uniform sampler2D s_albedo;
in vec2 v_uv;
out vec4 o_color;

vec4 accumulate(vec4 base) {
    vec4 sum = vec4(0.0);
    for (int i = 0; i < 8; i++) {
        sum += u_lights[i] * base;
    }
    return sum;
}

void main() {
    vec4 albedo = texture(s_albedo, v_uv) * u_tint;
    o_color = accumulate(albedo);
}
";

fn options(optimize: bool, target: TargetProfile) -> CompileOptions {
    let mut options = CompileOptions::new(Stage::Fragment, "bench.frag");
    options.optimize = optimize;
    options.target = target;
    options
}

fn benchmark_compile(c: &mut Criterion) {
    let optimized = options(true, TargetProfile::new(300, true));
    c.bench_function("compile fragment (optimize)", |b| {
        b.iter(|| {
            let mut log = DiagnosticLog::new();
            black_box(compile(FRAGMENT, &optimized, &mut log).unwrap())
        });
    });

    let plain = options(false, TargetProfile::new(300, true));
    c.bench_function("compile fragment (legalize only)", |b| {
        b.iter(|| {
            let mut log = DiagnosticLog::new();
            black_box(compile(FRAGMENT, &plain, &mut log).unwrap())
        });
    });

    let legacy = options(true, TargetProfile::new(100, true));
    c.bench_function("compile fragment (es 100)", |b| {
        b.iter(|| {
            let mut log = DiagnosticLog::new();
            black_box(compile(FRAGMENT, &legacy, &mut log).unwrap())
        });
    });
}

fn benchmark_artifact(c: &mut Criterion) {
    let mut log = DiagnosticLog::new();
    let artifact = compile(FRAGMENT, &options(true, TargetProfile::default()), &mut log).unwrap();
    let bytes = artifact.to_bytes().unwrap();

    c.bench_function("artifact encode", |b| {
        b.iter(|| black_box(artifact.to_bytes().unwrap()));
    });
    c.bench_function("artifact decode", |b| {
        b.iter(|| black_box(CompiledArtifact::read_from(&bytes).unwrap()));
    });
}

criterion_group!(benches, benchmark_compile, benchmark_artifact);
criterion_main!(benches);
