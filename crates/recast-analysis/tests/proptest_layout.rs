//! Property-based tests for struct member merging.
//!
//! These tests verify that layouts built from member evidence stay well formed:
//! - Disjoint members keep one member per offset with the last-written type
//! - The struct size never shrinks
//! - Members never overlap, whatever order the evidence arrives in

use proptest::prelude::*;

use recast_analysis::{MemoryProgram, StructAnalyzer};
use recast_types::{MemoryTypeDatabase, TypeDatabase, TypeInfo};

// =============================================================================
// Generators
// =============================================================================

/// Scalar member types of at most 8 bytes.
fn arb_scalar() -> impl Strategy<Value = TypeInfo> {
    prop_oneof![
        Just(TypeInfo::char()),
        Just(TypeInfo::short()),
        Just(TypeInfo::int()),
        Just(TypeInfo::long()),
        Just(TypeInfo::double()),
        Just(TypeInfo::ptr(TypeInfo::void())),
    ]
}

/// Writes at 8-aligned slots, so no two writes overlap.
fn arb_disjoint_writes() -> impl Strategy<Value = Vec<(usize, TypeInfo)>> {
    prop::collection::vec((0usize..16, arb_scalar()), 1..32)
        .prop_map(|writes| writes.into_iter().map(|(slot, ty)| (slot * 8, ty)).collect())
}

/// Writes at arbitrary byte offsets.
fn arb_any_writes() -> impl Strategy<Value = Vec<(usize, TypeInfo)>> {
    prop::collection::vec((0usize..64, arb_scalar()), 1..32)
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_disjoint_writes_keep_last_type(writes in arb_disjoint_writes()) {
        let program = MemoryProgram::new();
        let mut analyzer = StructAnalyzer::new(&program, MemoryTypeDatabase::new());
        let id = analyzer.create_struct();

        let mut last_size = 0;
        for (offset, ty) in &writes {
            analyzer.add_member_type(id, *offset, ty);
            let size = analyzer.database().get_struct(id).unwrap().size;
            prop_assert!(size >= last_size);
            last_size = size;
        }

        let layout = analyzer.database().get_struct(id).unwrap();
        let offsets: std::collections::BTreeSet<usize> =
            writes.iter().map(|(offset, _)| *offset).collect();
        prop_assert_eq!(layout.member_count(), offsets.len());
        for offset in offsets {
            let expected = writes
                .iter()
                .rev()
                .find(|(o, _)| *o == offset)
                .map(|(_, ty)| ty.clone())
                .unwrap();
            prop_assert_eq!(&layout.members[&offset].member_type, &expected);
        }
        prop_assert!(analyzer.diagnostics().is_empty());
    }

    #[test]
    fn prop_members_never_overlap(writes in arb_any_writes()) {
        let program = MemoryProgram::new();
        let mut analyzer = StructAnalyzer::new(&program, MemoryTypeDatabase::new());
        let id = analyzer.create_struct();

        let mut last_size = 0;
        for (offset, ty) in &writes {
            analyzer.add_member_type(id, *offset, ty);
            let size = analyzer.database().get_struct(id).unwrap().size;
            prop_assert!(size >= last_size);
            last_size = size;
        }

        let layout = analyzer.database().get_struct(id).unwrap();
        let mut end = 0;
        for member in layout.members() {
            prop_assert!(member.offset >= end);
            end = member.offset + member.size.max(1);
            prop_assert!(member.offset + member.size <= layout.size || member.size == 0);
        }
        let size = analyzer.database().size_of(&TypeInfo::structure(id)).unwrap();
        prop_assert_eq!(size, layout.size);
    }
}
