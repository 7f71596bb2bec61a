//! Struct layouts and the structure store.
//!
//! [`StructType`] holds one layout: members keyed by byte offset. Its mutating
//! operations keep the layout free of overlapping members. [`Structure`] is a view over
//! one struct inside a [`TypeDatabase`] that sizes member types through the database.
//!
//! ## Trailing sentinel
//!
//! A struct that is known to extend past its last real member is grown with
//! [`StructType::maximize_size`], which places a one-byte sentinel member on the last
//! byte. Setting a member type that runs into that sentinel is allowed; the sentinel is
//! absorbed instead of reported as an overlap.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::database::TypeDatabase;
use crate::error::{TypeError, TypeResult};
use crate::types::{StructId, TypeInfo};

/// A struct layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    /// Identity in the owning database.
    pub id: StructId,
    /// Struct tag name.
    pub name: String,
    /// Members keyed by start offset.
    pub members: BTreeMap<usize, Member>,
    /// Total size in bytes.
    pub size: usize,
}

/// A member of a struct layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Byte offset from struct start.
    pub offset: usize,
    /// Member name.
    pub name: String,
    /// Member type; `Unknown` for placeholders.
    pub member_type: TypeInfo,
    /// Size in bytes; zero for placeholders.
    pub size: usize,
    /// Free-form annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Member {
    fn placeholder(offset: usize) -> Self {
        Self {
            offset,
            name: default_member_name(offset),
            member_type: TypeInfo::Unknown,
            size: 0,
            comment: None,
        }
    }

    /// Whether this member is a bare placeholder with no type.
    pub fn is_placeholder(&self) -> bool {
        self.member_type.is_unknown() && self.size == 0
    }

    fn end(&self) -> usize {
        self.offset + self.size.max(1)
    }
}

/// Generated name for a member at an offset.
pub fn default_member_name(offset: usize) -> String {
    format!("field_{:x}", offset)
}

impl StructType {
    pub fn new(id: StructId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            members: BTreeMap::new(),
            size: 0,
        }
    }

    /// The member covering `offset`, if any.
    pub fn member_at(&self, offset: usize) -> Option<&Member> {
        self.members
            .range(..=offset)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| offset < m.end())
    }

    /// Whether some member covers `offset`.
    pub fn member_exists(&self, offset: usize) -> bool {
        self.member_at(offset).is_some()
    }

    /// Adds a zero-width placeholder at `offset` unless a member already covers it.
    ///
    /// The struct grows to cover at least the placeholder's first byte; no sentinel is
    /// added. Returns whether a member was created.
    pub fn add_member(&mut self, offset: usize) -> bool {
        if self.member_exists(offset) {
            return false;
        }
        self.members.insert(offset, Member::placeholder(offset));
        self.size = self.size.max(offset + 1);
        true
    }

    /// Start offset of the member covering `offset`.
    pub fn member_start(&self, offset: usize) -> Option<usize> {
        self.member_at(offset).map(|m| m.offset)
    }

    /// Start offset of the first member that starts after `offset`.
    pub fn next_member_offset(&self, offset: usize) -> Option<usize> {
        self.members
            .range(offset.saturating_add(1)..)
            .next()
            .map(|(start, _)| *start)
    }

    /// Size of the member covering `offset`.
    pub fn member_size(&self, offset: usize) -> Option<usize> {
        self.member_at(offset).map(|m| m.size)
    }

    /// Whether the member starting at `offset` is the one-byte sentinel on the last byte.
    pub fn is_trailing_sentinel(&self, offset: usize) -> bool {
        self.members
            .get(&offset)
            .map(|m| m.size == 1 && offset + 1 == self.size)
            .unwrap_or(false)
    }

    /// Overwrites the type and size of the member starting at `offset`.
    ///
    /// Refuses to write into the middle of a member or to run into the next member,
    /// except for the trailing sentinel, which is absorbed.
    pub fn set_member_type(
        &mut self,
        offset: usize,
        member_type: TypeInfo,
        size: usize,
    ) -> TypeResult<()> {
        match self.member_start(offset) {
            Some(start) if start == offset => {}
            Some(start) => {
                return Err(TypeError::MidMember {
                    id: self.id,
                    offset,
                    start,
                })
            }
            None => {
                return Err(TypeError::MissingMember {
                    id: self.id,
                    offset,
                })
            }
        }

        if let Some(next) = self.next_member_offset(offset) {
            if offset + size > next {
                if !self.is_trailing_sentinel(next) {
                    return Err(TypeError::MemberOverlap {
                        id: self.id,
                        offset,
                        size,
                        next,
                    });
                }
                self.members.remove(&next);
            }
        }

        if let Some(member) = self.members.get_mut(&offset) {
            member.member_type = member_type;
            member.size = size;
        }
        self.size = self.size.max(offset + size);
        Ok(())
    }

    /// Grows the struct to at least `size` bytes. Never shrinks.
    ///
    /// When the new last byte is not covered by a member, a one-byte sentinel marks it.
    pub fn maximize_size(&mut self, size: usize) -> bool {
        if size <= self.size {
            return false;
        }
        let last = size - 1;
        if !self.member_exists(last) {
            self.members.insert(
                last,
                Member {
                    offset: last,
                    name: default_member_name(last),
                    member_type: TypeInfo::uint(1),
                    size: 1,
                    comment: None,
                },
            );
        }
        self.size = size;
        true
    }

    /// Sets the annotation of the member starting at `offset`.
    pub fn set_member_comment(&mut self, offset: usize, comment: impl Into<String>) -> TypeResult<()> {
        let member = self
            .members
            .get_mut(&offset)
            .ok_or(TypeError::MissingMember {
                id: self.id,
                offset,
            })?;
        member.comment = Some(comment.into());
        Ok(())
    }

    /// Members in offset order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// A view over one struct of a type database.
///
/// Member sizes are resolved through the database, so nested struct members take the
/// current size of the nested layout.
pub struct Structure<'db, D: TypeDatabase + ?Sized> {
    db: &'db mut D,
    id: StructId,
}

impl<'db, D: TypeDatabase + ?Sized> Structure<'db, D> {
    /// Opens the struct `id`.
    pub fn open(db: &'db mut D, id: StructId) -> TypeResult<Self> {
        if db.get_struct(id).is_none() {
            return Err(TypeError::UnknownStruct(id));
        }
        Ok(Self { db, id })
    }

    pub fn id(&self) -> StructId {
        self.id
    }

    fn layout(&self) -> TypeResult<&StructType> {
        self.db
            .get_struct(self.id)
            .ok_or(TypeError::UnknownStruct(self.id))
    }

    fn layout_mut(&mut self) -> TypeResult<&mut StructType> {
        self.db
            .get_struct_mut(self.id)
            .ok_or(TypeError::UnknownStruct(self.id))
    }

    pub fn name(&self) -> TypeResult<&str> {
        Ok(self.layout()?.name.as_str())
    }

    pub fn size(&self) -> TypeResult<usize> {
        Ok(self.layout()?.size)
    }

    pub fn member_exists(&self, offset: usize) -> bool {
        self.layout()
            .map(|s| s.member_exists(offset))
            .unwrap_or(false)
    }

    pub fn add_member(&mut self, offset: usize) -> TypeResult<bool> {
        Ok(self.layout_mut()?.add_member(offset))
    }

    pub fn get_member_start(&self, offset: usize) -> Option<usize> {
        self.layout().ok()?.member_start(offset)
    }

    pub fn get_next_member_offset(&self, offset: usize) -> Option<usize> {
        self.layout().ok()?.next_member_offset(offset)
    }

    pub fn get_member_size(&self, offset: usize) -> Option<usize> {
        self.layout().ok()?.member_size(offset)
    }

    /// Whether the member starting at `offset` is the trailing sentinel.
    pub fn is_trailing_sentinel(&self, offset: usize) -> bool {
        self.layout()
            .map(|s| s.is_trailing_sentinel(offset))
            .unwrap_or(false)
    }

    /// Sets the member type at `offset`, sizing it through the database.
    pub fn set_member_type(&mut self, offset: usize, member_type: TypeInfo) -> TypeResult<()> {
        let size = self
            .db
            .size_of(&member_type)
            .ok_or_else(|| TypeError::Unsized(self.db.render(&member_type)))?;
        self.layout_mut()?.set_member_type(offset, member_type, size)
    }

    pub fn maximize_size(&mut self, size: usize) -> TypeResult<bool> {
        Ok(self.layout_mut()?.maximize_size(size))
    }
}
