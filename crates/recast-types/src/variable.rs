//! Variable identities.
//!
//! A [`Variable`] names a storage location whose type is being inferred. It never
//! owns a type; it is only a key into inference tables and the type database.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A local or global variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    /// A local slot (argument, register or stack variable) of a function.
    Local {
        /// Entry address of the owning function.
        function: u64,
        /// Index of the slot in the function's local table.
        slot: usize,
    },
    /// A global object at an address.
    Global(u64),
}

impl Variable {
    /// Creates a local variable identity.
    pub fn local(function: u64, slot: usize) -> Self {
        Variable::Local { function, slot }
    }

    /// Creates a global variable identity.
    pub fn global(address: u64) -> Self {
        Variable::Global(address)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Variable::Local { .. })
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Variable::Global(_))
    }

    /// Returns the owning function of a local.
    pub fn function(&self) -> Option<u64> {
        match self {
            Variable::Local { function, .. } => Some(*function),
            Variable::Global(_) => None,
        }
    }

    /// Returns the slot index of a local.
    pub fn slot(&self) -> Option<usize> {
        match self {
            Variable::Local { slot, .. } => Some(*slot),
            Variable::Global(_) => None,
        }
    }

    /// Returns the address of a global.
    pub fn address(&self) -> Option<u64> {
        match self {
            Variable::Local { .. } => None,
            Variable::Global(address) => Some(*address),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Local { function, slot } => write!(f, "sub_{:x}:v{}", function, slot),
            Variable::Global(address) => write!(f, "g_{:x}", address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let l = Variable::local(0x1000, 3);
        assert!(l.is_local());
        assert_eq!(l.function(), Some(0x1000));
        assert_eq!(l.slot(), Some(3));
        assert_eq!(l.address(), None);

        let g = Variable::global(0x4000);
        assert!(g.is_global());
        assert_eq!(g.function(), None);
        assert_eq!(g.address(), Some(0x4000));
    }

    #[test]
    fn test_display() {
        assert_eq!(Variable::local(0x1000, 2).to_string(), "sub_1000:v2");
        assert_eq!(Variable::global(0xdead).to_string(), "g_dead");
    }

    #[test]
    fn test_ordering_is_stable() {
        let mut vars = vec![
            Variable::global(1),
            Variable::local(2, 1),
            Variable::local(1, 5),
            Variable::local(1, 0),
        ];
        vars.sort();
        assert_eq!(
            vars,
            vec![
                Variable::local(1, 0),
                Variable::local(1, 5),
                Variable::local(2, 1),
                Variable::global(1),
            ]
        );
    }
}
