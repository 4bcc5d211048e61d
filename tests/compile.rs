//! End-to-end compile scenarios.

use std::fs;

use glsl_xc::{
    compile, compile_shader, compile_with, CompileOptions, CompiledArtifact, DiagnosticLog,
    MemoryIncluder, ShaderError, Stage, TargetProfile, UniformType,
};
use rand::Rng;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fragment(file: impl Into<String>) -> CompileOptions {
    CompileOptions::new(Stage::Fragment, file)
}

const LIT: &str = "#version 300 es
uniform vec4 u_tint;
uniform vec4 u_lights[4];
uniform mat4 u_view;
uniform sampler2D s_albedo;
in vec2 v_uv;
out vec4 o_color;

float luminance(vec3 c) {
    return dot(c, vec3(0.299, 0.587, 0.114));
}

void main() {
    vec4 base = texture(s_albedo, v_uv) * u_tint;
    vec4 sum = vec4(0.0);
    for (int i = 0; i < 4; i++) {
        sum += u_lights[i] * base;
    }
    if (luminance(sum.rgb) < 0.01) {
        discard;
    }
    o_color = u_view * sum;
}
";

#[test]
fn test_tint_and_albedo_table() {
    init_logger();
    let mut log = DiagnosticLog::new();
    let artifact = compile(
        "uniform vec4 u_tint; uniform sampler2D s_albedo; void main(){}",
        &fragment("tint.frag"),
        &mut log,
    )
    .unwrap();

    let table = artifact.uniforms.descriptors();
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].name, "u_tint");
    assert_eq!(table[0].ty, UniformType::Vec4);
    assert_eq!(
        (table[0].count, table[0].reg_index, table[0].reg_count),
        (1, 0, 1)
    );
    assert_eq!(table[1].name, "s_albedo");
    assert_eq!(table[1].ty, UniformType::Sampler);
    assert_eq!(
        (table[1].count, table[1].reg_index, table[1].reg_count),
        (1, 1, 1)
    );
}

#[test]
fn test_array_uniform_reserves_registers() {
    let mut log = DiagnosticLog::new();
    let artifact = compile(
        "uniform vec4 u_arr[4]; uniform mat4 u_next; void main(){}",
        &fragment("arr.frag"),
        &mut log,
    )
    .unwrap();
    let arr = artifact.uniforms.get("u_arr").unwrap();
    assert_eq!((arr.count, arr.reg_index, arr.reg_count), (4, 0, 4));
    assert_eq!(artifact.uniforms.get("u_next").unwrap().reg_index, 4);
}

#[test]
fn test_optimize_flag_changes_only_the_text() {
    let mut plain = fragment("lit.frag");
    plain.optimize = false;
    let optimized = fragment("lit.frag");

    let mut log = DiagnosticLog::new();
    let a = compile(LIT, &plain, &mut log).unwrap();
    assert!(!log.has_errors(), "{}", log.info_log());
    let b = compile(LIT, &optimized, &mut log).unwrap();
    assert!(!log.has_errors(), "{}", log.info_log());

    assert_eq!(a.uniforms, b.uniforms);
    assert!(a.source.contains("void main()"));
    assert!(b.source.contains("void main()"));
    assert!(a.source.contains("luminance"));
    // имена uniform сохраняются в обоих вариантах
    for name in ["u_tint", "u_lights", "u_view", "s_albedo"] {
        assert!(b.source.contains(name), "{} missing from\n{}", name, b.source);
    }
}

#[test]
fn test_compilation_is_deterministic() {
    let mut log = DiagnosticLog::new();
    let options = fragment("lit.frag");
    let first = compile(LIT, &options, &mut log).unwrap().to_bytes().unwrap();
    let second = compile(LIT, &options, &mut log).unwrap().to_bytes().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_targets() {
    let mut log = DiagnosticLog::new();
    for (target, header) in [
        (TargetProfile::new(100, true), "#version 100\n"),
        (TargetProfile::new(300, true), "#version 300 es\n"),
        (TargetProfile::new(120, false), "#version 120\n"),
        (TargetProfile::new(330, false), "#version 330\n"),
        (TargetProfile::new(450, false), "#version 450\n"),
    ] {
        let mut options = fragment("lit.frag");
        options.target = target;
        let artifact = compile(LIT, &options, &mut log).unwrap();
        assert!(artifact.source.starts_with(header), "{}", artifact.source);
    }
}

#[test]
fn test_syntax_error_produces_no_artifact() {
    let mut log = DiagnosticLog::new();
    let mut out = Vec::new();
    let result = compile_shader(
        "uniform vec4 u_tint void main(){}",
        &fragment("broken.frag"),
        &mut out,
        &mut log,
    );
    assert!(matches!(result, Err(ShaderError::Parse(_))));
    assert!(out.is_empty());
    assert!(log.has_errors());
    assert!(log.first_error().unwrap().source.contains("broken.frag"));
}

#[test]
fn test_link_error_is_reported() {
    let mut log = DiagnosticLog::new();
    let result = compile("uniform vec4 u_tint;", &fragment("nomain.frag"), &mut log);
    assert!(matches!(result, Err(ShaderError::Link(_))));
    assert!(log.has_errors());
}

#[test]
fn test_local_include_wins_over_system() {
    let root = tempfile::tempdir().unwrap();
    let shaders = root.path().join("shaders");
    let system = root.path().join("system");
    fs::create_dir_all(&shaders).unwrap();
    fs::create_dir_all(&system).unwrap();
    fs::write(shaders.join("common.sh"), "uniform vec4 u_local;\n").unwrap();
    fs::write(system.join("common.sh"), "uniform vec4 u_system;\n").unwrap();
    fs::write(system.join("only_system.sh"), "uniform vec4 u_fallback;\n").unwrap();

    let main = shaders.join("main.frag");
    let mut options = fragment(main.to_string_lossy());
    options.include_dirs = vec![system.clone()];
    let mut log = DiagnosticLog::new();

    let artifact = compile(
        "#include \"common.sh\"\nvoid main(){}",
        &options,
        &mut log,
    )
    .unwrap();
    assert!(artifact.uniforms.get("u_local").is_some());
    assert!(artifact.uniforms.get("u_system").is_none());

    let artifact = compile("#include <common.sh>\nvoid main(){}", &options, &mut log).unwrap();
    assert!(artifact.uniforms.get("u_system").is_some());

    // кавычки без локального файла: поиск по каталогам
    let artifact = compile(
        "#include \"only_system.sh\"\nvoid main(){}",
        &options,
        &mut log,
    )
    .unwrap();
    assert!(artifact.uniforms.get("u_fallback").is_some());
}

#[test]
fn test_system_dirs_first_match_wins() {
    let root = tempfile::tempdir().unwrap();
    let first = root.path().join("a");
    let second = root.path().join("b");
    fs::create_dir_all(&first).unwrap();
    fs::create_dir_all(&second).unwrap();
    fs::write(first.join("lib.sh"), "uniform vec4 u_first;\n").unwrap();
    fs::write(second.join("lib.sh"), "uniform vec4 u_second;\n").unwrap();

    let mut options = fragment(root.path().join("main.frag").to_string_lossy());
    options.include_dirs = vec![first, second];
    let mut log = DiagnosticLog::new();
    let artifact = compile("#include <lib.sh>\nvoid main(){}", &options, &mut log).unwrap();
    assert!(artifact.uniforms.get("u_first").is_some());
    assert!(artifact.uniforms.get("u_second").is_none());
}

#[test]
fn test_missing_include() {
    let mut log = DiagnosticLog::new();
    let result = compile_with(
        "#include <nowhere.sh>\nvoid main(){}",
        &fragment("inc.frag"),
        &mut MemoryIncluder::new(),
        &mut log,
    );
    assert!(matches!(
        result,
        Err(ShaderError::IncludeNotFound { ref name, .. }) if name == "nowhere.sh"
    ));
    assert!(log.has_errors());
}

#[test]
fn test_artifact_round_trip() {
    let mut log = DiagnosticLog::new();
    let artifact = compile(LIT, &fragment("lit.frag"), &mut log).unwrap();
    let mut bytes = Vec::new();
    artifact.write_to(&mut bytes).unwrap();
    let back = CompiledArtifact::read_from(&bytes).unwrap();
    assert_eq!(back, artifact);
    assert_eq!(*bytes.last().unwrap(), 0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lit.bin");
    artifact.write_to_path(&path).unwrap();
    assert_eq!(fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_random_tables_are_contiguous() {
    let mut rng = rand::rng();
    let mut log = DiagnosticLog::new();
    for _ in 0..20 {
        let mut src = String::new();
        let mut expected = Vec::new();
        for n in 0..rng.random_range(1..12) {
            let (decl, ty, count) = match rng.random_range(0..6) {
                0 => ("vec4".to_string(), UniformType::Vec4, 1),
                1 => ("mat3".to_string(), UniformType::Mat3, 1),
                2 => ("mat4".to_string(), UniformType::Mat4, 1),
                3 => ("float".to_string(), UniformType::Unknown, 1),
                4 => ("sampler2D".to_string(), UniformType::Sampler, 1),
                _ => {
                    let len = rng.random_range(1..6u32);
                    (format!("vec4@[{}]", len), UniformType::Vec4, len)
                }
            };
            let name = format!("u_{}", n);
            let line = match decl.split_once('@') {
                Some((base, dims)) => format!("uniform {} {}{};\n", base, name, dims),
                None => format!("uniform {} {};\n", decl, name),
            };
            src.push_str(&line);
            expected.push((name, ty, count));
        }
        src.push_str("void main(){}\n");

        let artifact = compile(&src, &fragment("rand.frag"), &mut log).unwrap();
        let table = artifact.uniforms.descriptors();
        assert!(artifact.uniforms.is_contiguous(), "{}", src);
        assert_eq!(table.len(), expected.len());
        let mut cursor = 0;
        for (u, (name, ty, count)) in table.iter().zip(&expected) {
            assert_eq!(&u.name, name);
            assert_eq!(u.ty, *ty);
            assert_eq!(u.count, *count);
            assert_eq!(u.reg_index, cursor);
            assert_eq!(u.reg_count, *count);
            cursor += u.reg_count;
        }
    }
}

#[test]
fn test_compute_stage() {
    let src = "#version 310 es
layout(local_size_x = 8, local_size_y = 8) in;
uniform vec4 u_scale;
void main() {
    vec4 v = u_scale * float(gl_GlobalInvocationID.x);
}
";
    let mut options = CompileOptions::new(Stage::Compute, "grid.comp");
    options.target = TargetProfile::new(310, true);
    let mut log = DiagnosticLog::new();
    let artifact = compile(src, &options, &mut log).unwrap();
    assert!(artifact
        .source
        .contains("layout(local_size_x = 8, local_size_y = 8, local_size_z = 1) in;"));

    options.target = TargetProfile::new(300, true);
    assert!(matches!(
        compile(src, &options, &mut log),
        Err(ShaderError::Emission(_))
    ));
}
