//! Staging overlay over a type database.
//!
//! Every mutation made during an inference run lands in a [`StagedDatabase`] first.
//! Reads fall through to the wrapped database for anything the run has not touched.
//! [`StagedDatabase::commit`] flushes the overlay into the wrapped database and
//! [`StagedDatabase::discard`] drops it, leaving the wrapped database exactly as it was.

use std::collections::{BTreeMap, BTreeSet};

use crate::database::{validate_declaration, ArchInfo, TypeDatabase};
use crate::error::{TypeError, TypeResult};
use crate::structure::{StructType, Structure};
use crate::types::{StructId, TypeInfo};
use crate::variable::Variable;

/// A copy-on-write overlay over a [`TypeDatabase`].
#[derive(Debug)]
pub struct StagedDatabase<D: TypeDatabase> {
    inner: D,
    /// Structs created by this overlay, plus copies of inner structs it changed.
    structs: BTreeMap<StructId, StructType>,
    /// Structs that did not exist in the inner database.
    created: BTreeSet<StructId>,
    /// Inner structs deleted through the overlay.
    deleted: BTreeSet<StructId>,
    declared: BTreeMap<Variable, TypeInfo>,
    call_targets: BTreeMap<(StructId, usize), u64>,
    next_id: u64,
}

/// Outcome of flushing an overlay.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Structs written to the inner database.
    pub structs: Vec<StructId>,
    /// Declarations the inner database accepted.
    pub declared: Vec<Variable>,
    /// Declarations the inner database refused.
    pub refused: Vec<(Variable, TypeError)>,
}

impl<D: TypeDatabase> StagedDatabase<D> {
    /// Wraps `inner` with an empty overlay.
    pub fn new(inner: D) -> Self {
        let next_id = inner.next_struct_id().0;
        Self {
            inner,
            structs: BTreeMap::new(),
            created: BTreeSet::new(),
            deleted: BTreeSet::new(),
            declared: BTreeMap::new(),
            call_targets: BTreeMap::new(),
            next_id,
        }
    }

    /// The wrapped database, without the overlay.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Unwraps the database. Pending changes are dropped.
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Whether the struct was created by this overlay.
    pub fn is_provisional(&self, id: StructId) -> bool {
        self.created.contains(&id)
    }

    /// Whether the overlay holds no pending change.
    pub fn is_clean(&self) -> bool {
        self.structs.is_empty()
            && self.deleted.is_empty()
            && self.declared.is_empty()
            && self.call_targets.is_empty()
    }

    /// Opens a view over a struct created by this overlay.
    ///
    /// Structs that existed before the overlay was opened are refused.
    pub fn provisional_structure(&mut self, id: StructId) -> TypeResult<Structure<'_, Self>> {
        if !self.is_provisional(id) {
            return Err(TypeError::ImmutableStruct(id));
        }
        Structure::open(self, id)
    }

    /// Drops every pending change.
    pub fn discard(&mut self) {
        self.structs.clear();
        self.created.clear();
        self.deleted.clear();
        self.declared.clear();
        self.call_targets.clear();
        self.next_id = self.inner.next_struct_id().0;
    }

    /// Flushes the overlay into the inner database and empties it.
    ///
    /// Structs go first so declarations can reference them. A declaration the inner
    /// database refuses is reported and does not stop the flush.
    pub fn commit(&mut self) -> TypeResult<CommitReport> {
        let mut report = CommitReport::default();

        for id in std::mem::take(&mut self.deleted) {
            if self.inner.has_struct(id) {
                self.inner.delete_struct(id)?;
            }
        }
        for (id, layout) in std::mem::take(&mut self.structs) {
            self.inner.insert_struct(layout)?;
            report.structs.push(id);
        }
        for (var, ty) in std::mem::take(&mut self.declared) {
            match self.inner.set_declared_type(&var, ty) {
                Ok(()) => report.declared.push(var),
                Err(err) => report.refused.push((var, err)),
            }
        }
        for ((id, offset), target) in std::mem::take(&mut self.call_targets) {
            self.inner.set_member_call_target(id, offset, target)?;
        }

        self.created.clear();
        self.next_id = self.inner.next_struct_id().0;
        Ok(report)
    }
}

impl<D: TypeDatabase> TypeDatabase for StagedDatabase<D> {
    fn arch(&self) -> ArchInfo {
        self.inner.arch()
    }

    fn declared_type(&self, var: &Variable) -> Option<TypeInfo> {
        self.declared
            .get(var)
            .cloned()
            .or_else(|| self.inner.declared_type(var))
    }

    fn set_declared_type(&mut self, var: &Variable, ty: TypeInfo) -> TypeResult<()> {
        validate_declaration(&*self, var, &ty)?;
        self.declared.insert(*var, ty);
        Ok(())
    }

    fn next_struct_id(&self) -> StructId {
        StructId(self.next_id.max(self.inner.next_struct_id().0))
    }

    fn create_struct(&mut self, name: Option<&str>) -> StructId {
        let id = self.next_struct_id();
        self.next_id = id.0 + 1;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("struct_{}", id.0));
        self.structs.insert(id, StructType::new(id, name));
        self.created.insert(id);
        id
    }

    fn insert_struct(&mut self, layout: StructType) -> TypeResult<()> {
        let id = layout.id;
        if !self.inner.has_struct(id) {
            self.created.insert(id);
        }
        self.deleted.remove(&id);
        self.next_id = self.next_id.max(id.0 + 1);
        self.structs.insert(id, layout);
        Ok(())
    }

    fn delete_struct(&mut self, id: StructId) -> TypeResult<()> {
        if !self.has_struct(id) {
            return Err(TypeError::UnknownStruct(id));
        }
        self.structs.remove(&id);
        self.call_targets.retain(|(sid, _), _| *sid != id);
        if !self.created.remove(&id) {
            self.deleted.insert(id);
        }
        Ok(())
    }

    fn get_struct(&self, id: StructId) -> Option<&StructType> {
        if self.deleted.contains(&id) {
            return None;
        }
        self.structs.get(&id).or_else(|| self.inner.get_struct(id))
    }

    fn get_struct_mut(&mut self, id: StructId) -> Option<&mut StructType> {
        if self.deleted.contains(&id) {
            return None;
        }
        if !self.structs.contains_key(&id) {
            let copy = self.inner.get_struct(id)?.clone();
            self.structs.insert(id, copy);
        }
        self.structs.get_mut(&id)
    }

    fn struct_ids(&self) -> Vec<StructId> {
        let mut ids: BTreeSet<StructId> = self
            .inner
            .struct_ids()
            .into_iter()
            .filter(|id| !self.deleted.contains(id))
            .collect();
        ids.extend(self.structs.keys().copied());
        ids.into_iter().collect()
    }

    fn member_call_target(&self, id: StructId, offset: usize) -> Option<u64> {
        if self.deleted.contains(&id) {
            return None;
        }
        self.call_targets
            .get(&(id, offset))
            .copied()
            .or_else(|| self.inner.member_call_target(id, offset))
    }

    fn set_member_call_target(
        &mut self,
        id: StructId,
        offset: usize,
        target: u64,
    ) -> TypeResult<()> {
        if !self.has_struct(id) {
            return Err(TypeError::UnknownStruct(id));
        }
        self.call_targets.insert((id, offset), target);
        Ok(())
    }
}
