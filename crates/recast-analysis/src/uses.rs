//! Use-chain model.
//!
//! Every access to a variable is described by a [`UseChain`]: the steps applied to the
//! variable before the accessed value is reached. `v->f` at offset 8 is
//! `[Add(8), Deref]`, `*(v)` is `[Deref]`, `v + 8` passed to a call is `[Add(8)]`, and
//! the bare variable is the empty chain.
//!
//! Uses come in three flavors: reads ([`VarRead`]), writes ([`VarWrite`], an assign when
//! the chain is empty) and call casts ([`CallCast`], the used value passed as a call
//! argument). Write value types and cast argument types are filled in lazily by the
//! analyzer.

use recast_types::{StructId, TypeDatabase, TypeInfo, Variable};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::expr::Expr;

/// One step of a use chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarUse {
    /// Pointer arithmetic by a byte offset.
    Add(i64),
    /// Dereference.
    Deref,
    /// Address-of.
    AddressOf,
}

/// How a chain uses the variable, as far as struct inference cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainShape {
    /// The variable itself.
    Value,
    /// The object at the offset is accessed as a whole: `*(v + n)`, `v->f`.
    Member(usize),
    /// A pointer into the object at the offset: `v + n`, `&v->f`.
    Interior(usize),
    /// The member at the offset is itself dereferenced further: `v->f->g`.
    Through(usize),
    /// Not compatible with the variable being a pointer.
    NotPointer,
}

/// Ordered steps from a variable to the value being used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UseChain(Vec<VarUse>);

impl UseChain {
    pub fn new(steps: Vec<VarUse>) -> Self {
        Self(steps)
    }

    /// The bare variable.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// `*(v + offset)`.
    pub fn deref_at(offset: i64) -> Self {
        if offset == 0 {
            Self(vec![VarUse::Deref])
        } else {
            Self(vec![VarUse::Add(offset), VarUse::Deref])
        }
    }

    /// `v + offset`.
    pub fn offset(offset: i64) -> Self {
        if offset == 0 {
            Self::empty()
        } else {
            Self(vec![VarUse::Add(offset)])
        }
    }

    /// Appends a step.
    pub fn then(mut self, step: VarUse) -> Self {
        self.0.push(step);
        self
    }

    pub fn steps(&self) -> &[VarUse] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn shape(&self) -> ChainShape {
        use VarUse::*;

        let (offset, rest) = match self.0.as_slice() {
            [] => return ChainShape::Value,
            [Add(n), rest @ ..] => match usize::try_from(*n) {
                Ok(offset) => (offset, rest),
                Err(_) => return ChainShape::NotPointer,
            },
            rest => (0, rest),
        };

        match rest {
            [] if offset > 0 => ChainShape::Interior(offset),
            [] => ChainShape::Value,
            [Deref] => ChainShape::Member(offset),
            [Deref, AddressOf] => ChainShape::Interior(offset),
            [Deref, ..] => ChainShape::Through(offset),
            _ => ChainShape::NotPointer,
        }
    }

    /// Whether the variable can be a pointer given this use.
    pub fn is_possible_ptr(&self) -> bool {
        self.shape() != ChainShape::NotPointer
    }

    /// Offset into the pointed-to object this use touches.
    pub fn ptr_offset(&self) -> Option<usize> {
        match self.shape() {
            ChainShape::Value => Some(0),
            ChainShape::Member(offset)
            | ChainShape::Interior(offset)
            | ChainShape::Through(offset) => Some(offset),
            ChainShape::NotPointer => None,
        }
    }

    /// Walks the chain from a value of type `start`.
    ///
    /// Returns the type reached, plus the struct member the last dereference landed
    /// on. `None` when a step does not fit the type.
    pub fn walk<D: TypeDatabase + ?Sized>(&self, db: &D, start: &TypeInfo) -> Option<ChainTarget> {
        let mut ty = start.clone();
        let mut member = None;
        let mut offset: i64 = 0;

        for step in &self.0 {
            match step {
                VarUse::Add(n) => {
                    if !ty.is_pointer() {
                        return None;
                    }
                    offset = offset.checked_add(*n)?;
                }
                VarUse::Deref => {
                    let pointee = ty.pointed_object()?.clone();
                    let at = usize::try_from(offset).ok()?;
                    offset = 0;
                    match pointee.struct_id() {
                        Some(id) => {
                            let (sid, start, member_type) = member_starting_at(db, id, at)?;
                            ty = member_type;
                            member = Some((sid, start));
                        }
                        None => {
                            // Indexing into an array of the pointee.
                            let size = db.size_of(&pointee)?;
                            if size == 0 || at % size != 0 {
                                return None;
                            }
                            ty = pointee;
                            member = None;
                        }
                    }
                }
                VarUse::AddressOf => {
                    if offset != 0 {
                        return None;
                    }
                    ty = TypeInfo::ptr(ty);
                }
            }
        }

        if offset != 0 {
            let at = usize::try_from(offset).ok()?;
            let id = ty.pointee()?.struct_id()?;
            let (sid, start, member_type) = member_starting_at(db, id, at)?;
            ty = TypeInfo::ptr(member_type);
            member = Some((sid, start));
        }

        Some(ChainTarget { ty, member })
    }
}

impl From<Vec<VarUse>> for UseChain {
    fn from(steps: Vec<VarUse>) -> Self {
        Self(steps)
    }
}

impl fmt::Display for UseChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match step {
                VarUse::Add(n) => write!(f, "+{:#x}", n)?,
                VarUse::Deref => write!(f, "*")?,
                VarUse::AddressOf => write!(f, "&")?,
            }
        }
        write!(f, "]")
    }
}

/// Where a walked chain ends.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTarget {
    /// Type of the value reached.
    pub ty: TypeInfo,
    /// Struct member the walk ended on.
    pub member: Option<(StructId, usize)>,
}

/// The member starting exactly at `offset`, descending into nested structs.
fn member_starting_at<D: TypeDatabase + ?Sized>(
    db: &D,
    id: StructId,
    offset: usize,
) -> Option<(StructId, usize, TypeInfo)> {
    let mut id = id;
    let mut offset = offset;
    loop {
        let member = db.get_struct(id)?.member_at(offset)?;
        if member.offset == offset {
            return Some((id, offset, member.member_type.clone()));
        }
        let nested = member.member_type.struct_id()?;
        offset -= member.offset;
        id = nested;
    }
}

/// A read of a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRead {
    pub var: Variable,
    #[serde(default)]
    pub chain: UseChain,
}

impl VarRead {
    pub fn new(var: Variable, chain: UseChain) -> Self {
        Self { var, chain }
    }
}

/// A write through a variable, or an assign to it when the chain is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarWrite {
    pub var: Variable,
    #[serde(default)]
    pub chain: UseChain,
    pub value: Expr,
    /// Type of `value`, resolved by the analyzer.
    #[serde(skip)]
    pub value_type: TypeInfo,
}

impl VarWrite {
    pub fn new(var: Variable, chain: UseChain, value: Expr) -> Self {
        Self {
            var,
            chain,
            value,
            value_type: TypeInfo::Unknown,
        }
    }

    /// `var = value`.
    pub fn assign(var: Variable, value: Expr) -> Self {
        Self::new(var, UseChain::empty(), value)
    }

    pub fn is_assign(&self) -> bool {
        self.chain.is_empty()
    }

    /// Writes need a dereference; the bare variable is an assign, not a pointer use.
    pub fn is_possible_ptr(&self) -> bool {
        matches!(
            self.chain.shape(),
            ChainShape::Member(_) | ChainShape::Through(_)
        )
    }
}

/// Names the compiler uses for bit-manipulation intrinsics.
pub const HELPER_INTRINSICS: &[&str] = &["LOWORD", "HIWORD", "LOBYTE"];

/// Whether `name` is a bit-manipulation intrinsic rather than a real function.
pub fn is_helper_intrinsic(name: &str) -> bool {
    let name = name.strip_prefix('_').unwrap_or(name);
    HELPER_INTRINSICS.contains(&name)
}

/// How a call reaches its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallTarget {
    /// Direct call to a known address.
    Explicit(u64),
    /// Compiler intrinsic; never a call edge.
    Helper(String),
    /// Indirect call. The source, when known, is the variable and chain the called
    /// pointer was loaded through.
    Implicit(Option<ImplicitSource>),
}

/// Origin of an indirect call's function pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplicitSource {
    pub var: Variable,
    pub chain: UseChain,
}

/// A call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncCall {
    /// Address of the call instruction.
    pub address: u64,
    pub target: CallTarget,
}

impl FuncCall {
    pub fn explicit(address: u64, target: u64) -> Self {
        Self {
            address,
            target: CallTarget::Explicit(target),
        }
    }

    pub fn helper(address: u64, name: impl Into<String>) -> Self {
        Self {
            address,
            target: CallTarget::Helper(name.into()),
        }
    }

    /// Indirect call through `var` walked along `chain`.
    pub fn implicit(address: u64, var: Variable, chain: UseChain) -> Self {
        Self {
            address,
            target: CallTarget::Implicit(Some(ImplicitSource { var, chain })),
        }
    }

    /// Indirect call whose pointer origin is not known.
    pub fn opaque(address: u64) -> Self {
        Self {
            address,
            target: CallTarget::Implicit(None),
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self.target, CallTarget::Explicit(_))
    }

    pub fn is_helper(&self) -> bool {
        matches!(self.target, CallTarget::Helper(_))
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self.target, CallTarget::Implicit(_))
    }

    pub fn explicit_target(&self) -> Option<u64> {
        match self.target {
            CallTarget::Explicit(target) => Some(target),
            _ => None,
        }
    }
}

/// A variable use passed as argument `arg_index` of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCast {
    pub var: Variable,
    #[serde(default)]
    pub chain: UseChain,
    pub arg_index: usize,
    pub call: FuncCall,
    /// Type of the callee parameter, resolved by the analyzer.
    #[serde(skip)]
    pub arg_type: TypeInfo,
}

impl CallCast {
    pub fn new(var: Variable, chain: UseChain, arg_index: usize, call: FuncCall) -> Self {
        Self {
            var,
            chain,
            arg_index,
            call,
            arg_type: TypeInfo::Unknown,
        }
    }

    /// The variable itself is the argument.
    pub fn is_var_arg(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn is_possible_ptr(&self) -> bool {
        self.chain.is_possible_ptr()
    }
}

/// A `return` of a variable use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSite {
    pub var: Variable,
    #[serde(default)]
    pub chain: UseChain,
}

/// Every use of one variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarUses {
    pub reads: Vec<VarRead>,
    pub writes: Vec<VarWrite>,
    pub casts: Vec<CallCast>,
}

impl VarUses {
    pub fn len(&self) -> usize {
        self.reads.len() + self.writes.len() + self.casts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn assigns(&self) -> impl Iterator<Item = &VarWrite> {
        self.writes.iter().filter(|w| w.is_assign())
    }

    pub fn extend(&mut self, other: VarUses) {
        self.reads.extend(other.reads);
        self.writes.extend(other.writes);
        self.casts.extend(other.casts);
    }
}
