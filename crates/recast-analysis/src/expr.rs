//! Value expressions.
//!
//! The host reduces every written value to an [`Expr`]. Only the shapes the analyzer
//! can type are modeled; everything else is carried as [`Expr::Other`] with a short
//! rendering for diagnostics.

use recast_types::TypeInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An expression whose type may be inferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A local slot of the enclosing function.
    Local(usize),
    /// An object or function at an address.
    Global(u64),
    /// `&expr`.
    AddressOf(Box<Expr>),
    /// Integer literal of `size` bytes.
    Num { value: u64, size: usize },
    /// A call; `callee` is usually a [`Expr::Global`].
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `(to)expr`.
    Cast { expr: Box<Expr>, to: TypeInfo },
    /// A compiler intrinsic such as `LOWORD`.
    Helper(String),
    /// Anything else.
    Other(String),
}

impl Expr {
    pub fn local(slot: usize) -> Self {
        Expr::Local(slot)
    }

    pub fn global(address: u64) -> Self {
        Expr::Global(address)
    }

    pub fn num(value: u64, size: usize) -> Self {
        Expr::Num { value, size }
    }

    pub fn address_of(inner: Expr) -> Self {
        Expr::AddressOf(Box::new(inner))
    }

    /// Direct call to the function at `address`.
    pub fn call(address: u64, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(Expr::Global(address)),
            args,
        }
    }

    pub fn cast(inner: Expr, to: TypeInfo) -> Self {
        Expr::Cast {
            expr: Box::new(inner),
            to,
        }
    }

    /// The expression with every outer cast removed.
    pub fn strip_casts(&self) -> &Expr {
        let mut expr = self;
        while let Expr::Cast { expr: inner, .. } = expr {
            expr = inner;
        }
        expr
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Local(slot) => write!(f, "v{}", slot),
            Expr::Global(address) => write!(f, "g_{:x}", address),
            Expr::AddressOf(inner) => write!(f, "&{}", inner),
            Expr::Num { value, .. } => write!(f, "{:#x}", value),
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Cast { expr, to } => write!(f, "({}){}", to, expr),
            Expr::Helper(name) => write!(f, "{}", name),
            Expr::Other(text) => write!(f, "{}", text),
        }
    }
}
