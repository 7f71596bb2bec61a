//! Type representation.
//!
//! This module defines the types that inference assigns to variables and struct
//! members. Struct types are referenced by [`StructId`] because their layouts live in
//! (and are mutated through) a [`TypeDatabase`](crate::TypeDatabase).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a struct layout in a type database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructId(pub u64);

impl fmt::Display for StructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "struct#{}", self.0)
    }
}

/// An inferred or declared type.
///
/// `Unknown` is the sentinel every inference path falls back to when evidence is
/// missing or contradictory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeInfo {
    /// No usable evidence.
    #[default]
    Unknown,

    /// void type
    Void,

    /// Integer type (char, short, int, long, etc.)
    Int(IntType),

    /// Floating-point type (float, double, long double)
    Float(FloatType),

    /// Pointer to another type
    Pointer(Box<TypeInfo>),

    /// Array of elements
    Array(ArrayType),

    /// Struct layout stored in the type database.
    Struct(StructId),
}

impl TypeInfo {
    pub fn is_unknown(&self) -> bool {
        matches!(self, TypeInfo::Unknown)
    }

    pub fn is_known(&self) -> bool {
        !self.is_unknown()
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeInfo::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, TypeInfo::Int(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, TypeInfo::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeInfo::Array(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, TypeInfo::Struct(_))
    }

    /// The pointed-to type of a pointer.
    pub fn pointee(&self) -> Option<&TypeInfo> {
        match self {
            TypeInfo::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// The object a pointer or array gives access to.
    pub fn pointed_object(&self) -> Option<&TypeInfo> {
        match self {
            TypeInfo::Pointer(inner) => Some(inner),
            TypeInfo::Array(a) => Some(&a.element),
            _ => None,
        }
    }

    /// The struct id of a bare struct type.
    pub fn struct_id(&self) -> Option<StructId> {
        match self {
            TypeInfo::Struct(id) => Some(*id),
            _ => None,
        }
    }

    /// The struct reached by stripping every pointer and array level.
    pub fn final_struct_id(&self) -> Option<StructId> {
        let mut ty = self;
        while let Some(inner) = ty.pointed_object() {
            ty = inner;
        }
        ty.struct_id()
    }

    /// Whether this type is a struct or a (multi-level) pointer/array of one.
    pub fn is_struct_bearing(&self) -> bool {
        self.final_struct_id().is_some()
    }

    /// The size of this type in bytes, for types that do not need a database lookup.
    ///
    /// Struct sizes come from [`TypeDatabase::size_of`](crate::TypeDatabase::size_of).
    pub fn fixed_size(&self, pointer_size: usize) -> Option<usize> {
        match self {
            TypeInfo::Unknown | TypeInfo::Void | TypeInfo::Struct(_) => None,
            TypeInfo::Int(i) => Some(i.size),
            TypeInfo::Float(f) => Some(f.size),
            TypeInfo::Pointer(_) => Some(pointer_size),
            TypeInfo::Array(a) => {
                let elem_size = a.element.fixed_size(pointer_size)?;
                Some(elem_size * a.length?)
            }
        }
    }

    /// Format as a C type, naming structs through `struct_name`.
    pub fn render_with<F>(&self, struct_name: &F) -> String
    where
        F: Fn(StructId) -> String,
    {
        match self {
            TypeInfo::Unknown => "unknown".to_string(),
            TypeInfo::Void => "void".to_string(),
            TypeInfo::Int(i) => i.c_name().to_string(),
            TypeInfo::Float(f) => match f.size {
                4 => "float".to_string(),
                8 => "double".to_string(),
                16 => "long double".to_string(),
                n => format!("float{}", n * 8),
            },
            TypeInfo::Pointer(inner) => format!("{}*", inner.render_with(struct_name)),
            TypeInfo::Array(a) => match a.length {
                Some(len) => format!("{}[{}]", a.element.render_with(struct_name), len),
                None => format!("{}[]", a.element.render_with(struct_name)),
            },
            TypeInfo::Struct(id) => format!("struct {}", struct_name(*id)),
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_with(&|id: StructId| id.0.to_string()))
    }
}

/// Integer type details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntType {
    /// Size in bytes.
    pub size: usize,
    /// Whether the type is signed.
    pub signed: bool,
}

impl IntType {
    pub fn new(size: usize, signed: bool) -> Self {
        Self { size, signed }
    }

    fn c_name(&self) -> &'static str {
        match (self.signed, self.size) {
            (true, 1) => "char",
            (false, 1) => "unsigned char",
            (true, 2) => "short",
            (false, 2) => "unsigned short",
            (true, 4) => "int",
            (false, 4) => "unsigned int",
            (true, 8) => "long long",
            (false, 8) => "unsigned long long",
            (true, _) => "__int128",
            (false, _) => "unsigned __int128",
        }
    }
}

/// Floating-point type details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FloatType {
    /// Size in bytes.
    pub size: usize,
}

/// Array type details.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayType {
    /// Element type.
    pub element: Box<TypeInfo>,
    /// Array length (None for flexible array member or incomplete).
    pub length: Option<usize>,
}

// Common type constructors for convenience
impl TypeInfo {
    pub fn void() -> Self {
        TypeInfo::Void
    }
    pub fn char() -> Self {
        TypeInfo::Int(IntType::new(1, true))
    }
    pub fn short() -> Self {
        TypeInfo::Int(IntType::new(2, true))
    }
    pub fn int() -> Self {
        TypeInfo::Int(IntType::new(4, true))
    }
    pub fn long() -> Self {
        TypeInfo::Int(IntType::new(8, true))
    }
    pub fn float() -> Self {
        TypeInfo::Float(FloatType { size: 4 })
    }
    pub fn double() -> Self {
        TypeInfo::Float(FloatType { size: 8 })
    }

    /// Unsigned integer of `size` bytes; the width of a numeric literal.
    pub fn uint(size: usize) -> Self {
        TypeInfo::Int(IntType::new(size, false))
    }

    pub fn ptr(inner: TypeInfo) -> Self {
        TypeInfo::Pointer(Box::new(inner))
    }

    pub fn array(element: TypeInfo, length: Option<usize>) -> Self {
        TypeInfo::Array(ArrayType {
            element: Box::new(element),
            length,
        })
    }

    pub fn structure(id: StructId) -> Self {
        TypeInfo::Struct(id)
    }

    pub fn struct_ptr(id: StructId) -> Self {
        TypeInfo::ptr(TypeInfo::Struct(id))
    }
}
