//! Type database for declared variable types and struct layouts.
//!
//! [`TypeDatabase`] is the capability the inference engine is handed for one run. It
//! stores declared types per variable, struct layouts, and the member call-target table
//! used to resolve calls through function-pointer members. [`MemoryTypeDatabase`] is the
//! in-memory implementation, serializable to JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{TypeError, TypeResult};
use crate::structure::{StructType, Structure};
use crate::types::{StructId, TypeInfo};
use crate::variable::Variable;

/// Current layout version of [`MemberTargetTable`].
pub const MEMBER_TARGET_TABLE_VERSION: u32 = 1;

/// Architecture information for type sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchInfo {
    /// Pointer size in bytes.
    pub pointer_size: usize,
}

impl Default for ArchInfo {
    fn default() -> Self {
        Self::lp64()
    }
}

impl ArchInfo {
    /// 64-bit pointers.
    pub fn lp64() -> Self {
        Self { pointer_size: 8 }
    }

    /// 32-bit pointers.
    pub fn ilp32() -> Self {
        Self { pointer_size: 4 }
    }
}

/// Storage for declared types and struct layouts.
pub trait TypeDatabase {
    /// Architecture used for pointer sizes.
    fn arch(&self) -> ArchInfo;

    /// The externally declared type of a variable.
    fn declared_type(&self, var: &Variable) -> Option<TypeInfo>;

    /// Declares the type of a variable.
    fn set_declared_type(&mut self, var: &Variable, ty: TypeInfo) -> TypeResult<()>;

    /// The id the next created struct will receive.
    fn next_struct_id(&self) -> StructId;

    /// Creates an empty struct. `name` defaults to `struct_<id>`.
    fn create_struct(&mut self, name: Option<&str>) -> StructId;

    /// Stores a fully built layout under its own id, replacing any existing one.
    fn insert_struct(&mut self, layout: StructType) -> TypeResult<()>;

    fn delete_struct(&mut self, id: StructId) -> TypeResult<()>;

    fn get_struct(&self, id: StructId) -> Option<&StructType>;

    fn get_struct_mut(&mut self, id: StructId) -> Option<&mut StructType>;

    /// All struct ids in ascending order.
    fn struct_ids(&self) -> Vec<StructId>;

    /// Call target recorded for the function-pointer member at `offset`.
    fn member_call_target(&self, id: StructId, offset: usize) -> Option<u64>;

    fn set_member_call_target(&mut self, id: StructId, offset: usize, target: u64)
        -> TypeResult<()>;

    // ==================== Provided ====================

    /// Opens a [`Structure`] view over the struct `id`.
    fn structure(&mut self, id: StructId) -> TypeResult<Structure<'_, Self>> {
        Structure::open(self, id)
    }

    fn has_struct(&self, id: StructId) -> bool {
        self.get_struct(id).is_some()
    }

    fn struct_name(&self, id: StructId) -> Option<&str> {
        self.get_struct(id).map(|s| s.name.as_str())
    }

    /// Looks a struct up by tag name.
    fn struct_by_name(&self, name: &str) -> Option<StructId> {
        self.struct_ids()
            .into_iter()
            .find(|id| self.struct_name(*id) == Some(name))
    }

    /// Size of a type in bytes, resolving struct sizes from their layouts.
    fn size_of(&self, ty: &TypeInfo) -> Option<usize> {
        match ty {
            TypeInfo::Struct(id) => self.get_struct(*id).map(|s| s.size),
            TypeInfo::Array(a) => {
                let elem = self.size_of(&a.element)?;
                Some(elem * a.length?)
            }
            other => other.fixed_size(self.arch().pointer_size),
        }
    }

    /// Formats a type with struct names from this database.
    fn render(&self, ty: &TypeInfo) -> String {
        ty.render_with(&|id: StructId| {
            self.struct_name(id)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string())
        })
    }

    /// Formats a struct as a C definition.
    fn format_struct(&self, id: StructId) -> Option<String> {
        let s = self.get_struct(id)?;
        let mut result = format!("struct {} {{\n", s.name);
        for member in s.members() {
            let ty = if member.member_type.is_unknown() {
                "_BYTE".to_string()
            } else {
                self.render(&member.member_type)
            };
            result.push_str(&format!(
                "    {} {}; // offset {:#x}",
                ty, member.name, member.offset
            ));
            if let Some(comment) = &member.comment {
                result.push_str(&format!(" {}", comment));
            }
            result.push('\n');
        }
        result.push('}');
        result.push_str(&format!(" // size: {} bytes", s.size));
        Some(result)
    }
}

/// Versioned side-table mapping function-pointer members to call targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberTargetTable {
    /// Table layout version.
    pub version: u32,
    #[serde(with = "entries")]
    targets: BTreeMap<(StructId, usize), u64>,
}

impl Default for MemberTargetTable {
    fn default() -> Self {
        Self {
            version: MEMBER_TARGET_TABLE_VERSION,
            targets: BTreeMap::new(),
        }
    }
}

impl MemberTargetTable {
    pub fn get(&self, id: StructId, offset: usize) -> Option<u64> {
        self.targets.get(&(id, offset)).copied()
    }

    pub fn insert(&mut self, id: StructId, offset: usize, target: u64) {
        self.targets.insert((id, offset), target);
    }

    /// Drops every entry belonging to `id`.
    pub fn remove_struct(&mut self, id: StructId) {
        self.targets.retain(|(sid, _), _| *sid != id);
    }

    pub fn iter(&self) -> impl Iterator<Item = (StructId, usize, u64)> + '_ {
        self.targets.iter().map(|((id, off), t)| (*id, *off, *t))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Serializes maps with non-string keys as sequences of pairs.
pub(crate) mod entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// An in-memory type database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryTypeDatabase {
    /// Architecture info for size calculations.
    #[serde(default)]
    arch: ArchInfo,

    /// Struct layouts.
    #[serde(with = "entries", default)]
    structs: BTreeMap<StructId, StructType>,

    /// Declared variable types.
    #[serde(with = "entries", default)]
    declared: BTreeMap<Variable, TypeInfo>,

    /// Function-pointer member targets.
    #[serde(default)]
    call_targets: MemberTargetTable,

    /// Next struct id to hand out.
    #[serde(default)]
    next_id: u64,
}

impl MemoryTypeDatabase {
    /// Create a new empty type database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with specific architecture info.
    pub fn with_arch(arch: ArchInfo) -> Self {
        Self {
            arch,
            ..Default::default()
        }
    }

    /// Defines a struct from `(offset, type)` members and a total size.
    ///
    /// Member sizes are resolved against structs already in the database.
    pub fn define_struct(
        &mut self,
        name: &str,
        size: usize,
        members: &[(usize, TypeInfo)],
    ) -> TypeResult<StructId> {
        let id = self.create_struct(Some(name));
        for (offset, ty) in members {
            let mut s = self.structure(id)?;
            s.add_member(*offset)?;
            s.set_member_type(*offset, ty.clone())?;
        }
        if let Some(layout) = self.structs.get_mut(&id) {
            layout.size = layout.size.max(size);
        }
        Ok(id)
    }

    /// Every declared variable type, in variable order.
    pub fn declared_types(&self) -> impl Iterator<Item = (&Variable, &TypeInfo)> {
        self.declared.iter()
    }

    pub fn call_targets(&self) -> &MemberTargetTable {
        &self.call_targets
    }

    // ==================== Serialization ====================

    /// Save database to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load database from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    // ==================== Statistics ====================

    /// Get database statistics.
    pub fn stats(&self) -> TypeDatabaseStats {
        TypeDatabaseStats {
            struct_count: self.structs.len(),
            member_count: self.structs.values().map(|s| s.member_count()).sum(),
            declared_count: self.declared.len(),
            call_target_count: self.call_targets.len(),
        }
    }
}

/// Checks that a declaration only references existing structs.
pub(crate) fn validate_declaration<D: TypeDatabase + ?Sized>(
    db: &D,
    var: &Variable,
    ty: &TypeInfo,
) -> TypeResult<()> {
    if ty.is_unknown() {
        return Err(TypeError::DeclarationRefused {
            var: *var,
            ty: ty.to_string(),
        });
    }
    if let Some(id) = ty.final_struct_id() {
        if !db.has_struct(id) {
            return Err(TypeError::UnknownStruct(id));
        }
    }
    Ok(())
}

impl TypeDatabase for MemoryTypeDatabase {
    fn arch(&self) -> ArchInfo {
        self.arch
    }

    fn declared_type(&self, var: &Variable) -> Option<TypeInfo> {
        self.declared.get(var).cloned()
    }

    fn set_declared_type(&mut self, var: &Variable, ty: TypeInfo) -> TypeResult<()> {
        validate_declaration(&*self, var, &ty)?;
        self.declared.insert(*var, ty);
        Ok(())
    }

    fn next_struct_id(&self) -> StructId {
        StructId(self.next_id)
    }

    fn create_struct(&mut self, name: Option<&str>) -> StructId {
        let id = StructId(self.next_id);
        self.next_id += 1;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("struct_{}", id.0));
        self.structs.insert(id, StructType::new(id, name));
        id
    }

    fn insert_struct(&mut self, layout: StructType) -> TypeResult<()> {
        self.next_id = self.next_id.max(layout.id.0 + 1);
        self.structs.insert(layout.id, layout);
        Ok(())
    }

    fn delete_struct(&mut self, id: StructId) -> TypeResult<()> {
        self.structs
            .remove(&id)
            .ok_or(TypeError::UnknownStruct(id))?;
        self.call_targets.remove_struct(id);
        Ok(())
    }

    fn get_struct(&self, id: StructId) -> Option<&StructType> {
        self.structs.get(&id)
    }

    fn get_struct_mut(&mut self, id: StructId) -> Option<&mut StructType> {
        self.structs.get_mut(&id)
    }

    fn struct_ids(&self) -> Vec<StructId> {
        self.structs.keys().copied().collect()
    }

    fn member_call_target(&self, id: StructId, offset: usize) -> Option<u64> {
        self.call_targets.get(id, offset)
    }

    fn set_member_call_target(
        &mut self,
        id: StructId,
        offset: usize,
        target: u64,
    ) -> TypeResult<()> {
        if !self.structs.contains_key(&id) {
            return Err(TypeError::UnknownStruct(id));
        }
        self.call_targets.insert(id, offset, target);
        Ok(())
    }
}

/// Type database statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDatabaseStats {
    pub struct_count: usize,
    pub member_count: usize,
    pub declared_count: usize,
    pub call_target_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_struct() {
        let mut db = MemoryTypeDatabase::new();
        let foo = db
            .define_struct("Foo", 16, &[(0, TypeInfo::int()), (8, TypeInfo::long())])
            .unwrap();
        assert_eq!(db.size_of(&TypeInfo::structure(foo)), Some(16));
        assert_eq!(db.struct_by_name("Foo"), Some(foo));

        let s = db.get_struct(foo).unwrap();
        assert_eq!(s.member_count(), 2);
        assert_eq!(s.member_size(8), Some(8));
    }

    #[test]
    fn test_nested_struct_size() {
        let mut db = MemoryTypeDatabase::new();
        let inner = db.define_struct("Inner", 12, &[]).unwrap();
        let outer = db
            .define_struct("Outer", 0, &[(0, TypeInfo::structure(inner))])
            .unwrap();
        assert_eq!(db.size_of(&TypeInfo::structure(outer)), Some(12));
        assert_eq!(
            db.size_of(&TypeInfo::array(TypeInfo::structure(inner), Some(2))),
            Some(24)
        );
    }

    #[test]
    fn test_declared_types_validated() {
        let mut db = MemoryTypeDatabase::new();
        let var = Variable::local(0x1000, 0);
        assert!(db.set_declared_type(&var, TypeInfo::Unknown).is_err());
        assert!(matches!(
            db.set_declared_type(&var, TypeInfo::struct_ptr(StructId(42))),
            Err(TypeError::UnknownStruct(StructId(42)))
        ));
        db.set_declared_type(&var, TypeInfo::ptr(TypeInfo::int()))
            .unwrap();
        assert_eq!(db.declared_type(&var), Some(TypeInfo::ptr(TypeInfo::int())));
    }

    #[test]
    fn test_delete_struct_drops_targets() {
        let mut db = MemoryTypeDatabase::new();
        let ops = db.define_struct("ops", 16, &[]).unwrap();
        db.set_member_call_target(ops, 8, 0x401000).unwrap();
        assert_eq!(db.member_call_target(ops, 8), Some(0x401000));

        db.delete_struct(ops).unwrap();
        assert_eq!(db.member_call_target(ops, 8), None);
        assert!(db.delete_struct(ops).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut db = MemoryTypeDatabase::with_arch(ArchInfo::ilp32());
        let foo = db.define_struct("Foo", 8, &[(0, TypeInfo::int())]).unwrap();
        db.set_declared_type(&Variable::global(0x4000), TypeInfo::struct_ptr(foo))
            .unwrap();
        db.set_member_call_target(foo, 4, 0x1234).unwrap();

        let json = db.to_json().unwrap();
        let loaded = MemoryTypeDatabase::from_json(&json).unwrap();
        assert_eq!(loaded.arch(), ArchInfo::ilp32());
        assert_eq!(loaded.get_struct(foo), db.get_struct(foo));
        assert_eq!(
            loaded.declared_type(&Variable::global(0x4000)),
            Some(TypeInfo::struct_ptr(foo))
        );
        assert_eq!(loaded.member_call_target(foo, 4), Some(0x1234));
        assert_eq!(loaded.next_struct_id(), StructId(1));
    }

    #[test]
    fn test_format_struct() {
        let mut db = MemoryTypeDatabase::new();
        let foo = db
            .define_struct("Foo", 12, &[(0, TypeInfo::int()), (8, TypeInfo::int())])
            .unwrap();
        let text = db.format_struct(foo).unwrap();
        assert!(text.starts_with("struct Foo {"));
        assert!(text.contains("int field_8; // offset 0x8"));
        assert!(text.ends_with("// size: 12 bytes"));
    }
}
