use naga::front::wgsl::parse_str;
use naga::valid::{Capabilities, ValidationFlags, Validator};

const TOKEN: &str = "{{WORKGROUP_SIZE}}";

const SHADERS: &[(&str, &str)] = &[
    ("row", include_str!("../shaders/dft/row.wgsl")),
    ("col", include_str!("../shaders/dft/col.wgsl")),
    ("row_forward", include_str!("../shaders/dft/row_forward.wgsl")),
    ("col_forward", include_str!("../shaders/dft/col_forward.wgsl")),
];

#[test]
fn every_template_carries_one_workgroup_token() {
    for (name, source) in SHADERS {
        assert_eq!(source.matches(TOKEN).count(), 1, "{name}");
    }
}

#[test]
fn all_dft_shaders_parse_and_validate() {
    for (name, source) in SHADERS {
        for size in ["1, 1, 1", "16, 16, 1", "8, 32, 1"] {
            let resolved = source.replacen(TOKEN, size, 1);
            let module = parse_str(&resolved).unwrap_or_else(|err| panic!("{name} failed: {err}"));
            Validator::new(ValidationFlags::all(), Capabilities::empty())
                .validate(&module)
                .unwrap_or_else(|err| panic!("{name} ({size}) failed validation: {err:?}"));
            assert!(
                module.entry_points.iter().any(|ep| ep.name == "main"),
                "{name} has no main entry point"
            );
        }
    }
}

#[test]
fn forward_only_shaders_declare_three_bindings() {
    for (name, source) in SHADERS {
        let module = parse_str(&source.replacen(TOKEN, "8, 8, 1", 1)).unwrap();
        let bindings = module
            .global_variables
            .iter()
            .filter(|(_, var)| var.binding.is_some())
            .count();
        let expected = if name.ends_with("_forward") { 3 } else { 4 };
        assert_eq!(bindings, expected, "{name}");
    }
}
