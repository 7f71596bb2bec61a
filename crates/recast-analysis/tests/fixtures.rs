use std::fs;
use std::path::PathBuf;

use recast_analysis::{DiagnosticKind, MemoryProgram, Program, StructAnalyzer};
use recast_types::{MemoryTypeDatabase, TypeDatabase, TypeInfo, Variable};

fn load_program(name: &str) -> Result<MemoryProgram, String> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(format!("{name}.json"));

    let json = fs::read_to_string(&path)
        .map_err(|e| format!("failed to read fixture {}: {}", path.display(), e))?;
    MemoryProgram::from_json(&json).map_err(|e| format!("invalid fixture {}: {}", name, e))
}

#[test]
fn test_list_init_fixture() {
    let program = load_program("list_init").unwrap();
    assert_eq!(program.function_addresses(), vec![0x401000, 0x401100]);
    assert!(program.is_import(0x500000));
    assert_eq!(program.calls_to(0x401000), vec![0x401100]);

    let mut analyzer = StructAnalyzer::new(&program, MemoryTypeDatabase::new());
    analyzer.analyze_everything();
    let summary = analyzer.apply().unwrap();

    assert_eq!(summary.structs_committed.len(), 1);
    assert_eq!(summary.variables_typed, 2);
    assert!(summary.call_edges.is_empty());
    assert_eq!(
        summary
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::UnresolvableCall)
            .count(),
        1
    );

    let db = analyzer.into_database();
    let id = summary.structs_committed[0];
    let list = TypeInfo::struct_ptr(id);
    assert_eq!(db.declared_type(&Variable::local(0x401000, 0)), Some(list.clone()));
    assert_eq!(db.declared_type(&Variable::local(0x401100, 0)), Some(list));

    let layout = db.get_struct(id).unwrap();
    assert!(layout.name.starts_with("struct_"));
    let members: Vec<(usize, usize)> = layout.members().map(|m| (m.offset, m.size)).collect();
    assert_eq!(members, vec![(0, 8), (8, 4), (16, 0)]);
    // The read of list->f16 keeps its byte inside the struct.
    assert_eq!(db.size_of(&TypeInfo::structure(id)), Some(17));
}

#[test]
fn test_fixture_survives_json_roundtrip() {
    let program = load_program("list_init").unwrap();
    let json = program.to_json().unwrap();
    let reloaded = MemoryProgram::from_json(&json).unwrap();

    assert_eq!(reloaded.function_count(), program.function_count());
    assert_eq!(reloaded.function(0x401100), program.function(0x401100));
    assert_eq!(reloaded.call_graph().edge_count(), program.call_graph().edge_count());
}
