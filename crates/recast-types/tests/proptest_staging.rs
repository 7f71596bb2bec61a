//! Property-based tests for the staging overlay.
//!
//! - Discarding an overlay leaves the wrapped database untouched
//! - Committing an overlay makes the wrapped database match the staged view
//! - Struct sizes only grow as members are added

use proptest::prelude::*;

use recast_types::{MemoryTypeDatabase, StagedDatabase, StructId, TypeDatabase, TypeInfo, Variable};

/// One staged edit: (struct index, member offset, member type, declare a variable).
type Edit = (usize, usize, TypeInfo, bool);

fn arb_scalar() -> impl Strategy<Value = TypeInfo> {
    prop_oneof![
        Just(TypeInfo::char()),
        Just(TypeInfo::short()),
        Just(TypeInfo::int()),
        Just(TypeInfo::long()),
        Just(TypeInfo::ptr(TypeInfo::void())),
    ]
}

fn arb_edits() -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec((0usize..4, 0usize..48, arb_scalar(), prop::bool::ANY), 1..40)
}

fn seeded() -> MemoryTypeDatabase {
    let mut db = MemoryTypeDatabase::new();
    db.define_struct("seed", 16, &[(0, TypeInfo::long()), (8, TypeInfo::int())])
        .unwrap();
    db
}

/// Applies `edits` to fresh provisional structs. Refused edits are skipped.
fn stage(staged: &mut StagedDatabase<MemoryTypeDatabase>, edits: &[Edit]) -> Vec<StructId> {
    let ids: Vec<StructId> = (0..4).map(|_| staged.create_struct(None)).collect();
    for (i, (which, offset, ty, declare)) in edits.iter().enumerate() {
        let id = ids[*which];
        let before = staged.get_struct(id).map(|s| s.size).unwrap_or(0);
        if let Ok(mut s) = staged.provisional_structure(id) {
            if s.add_member(*offset).is_ok() {
                let _ = s.set_member_type(*offset, ty.clone());
            }
        }
        let after = staged.get_struct(id).map(|s| s.size).unwrap_or(0);
        assert!(after >= before);
        if *declare {
            staged
                .set_declared_type(&Variable::local(0x1000, i), TypeInfo::struct_ptr(id))
                .unwrap();
        }
    }
    ids
}

proptest! {
    #[test]
    fn prop_discard_restores_inner(edits in arb_edits()) {
        let original = seeded().to_json().unwrap();
        let mut staged = StagedDatabase::new(seeded());
        let ids = stage(&mut staged, &edits);

        staged.discard();
        prop_assert!(staged.is_clean());
        for id in ids {
            prop_assert!(!staged.has_struct(id));
        }
        prop_assert_eq!(staged.into_inner().to_json().unwrap(), original);
    }

    #[test]
    fn prop_commit_matches_staged_view(edits in arb_edits()) {
        let mut staged = StagedDatabase::new(seeded());
        let ids = stage(&mut staged, &edits);

        let layouts: Vec<_> = ids.iter().map(|id| staged.get_struct(*id).cloned()).collect();
        let declared: Vec<_> = (0..edits.len())
            .map(|i| staged.declared_type(&Variable::local(0x1000, i)))
            .collect();

        let report = staged.commit().unwrap();
        prop_assert_eq!(report.structs, ids.clone());
        prop_assert!(report.refused.is_empty());
        prop_assert!(staged.is_clean());

        let inner = staged.inner();
        for (id, layout) in ids.iter().zip(layouts) {
            prop_assert_eq!(inner.get_struct(*id).cloned(), layout);
        }
        for (i, ty) in declared.into_iter().enumerate() {
            prop_assert_eq!(inner.declared_type(&Variable::local(0x1000, i)), ty);
        }
    }
}
