//! Program gateway.
//!
//! The analyzer never looks at machine code. It sees a program through the [`Program`]
//! trait: per-function use information ([`FunctionBody`]), call edges, and the function
//! resolver queries. [`MemoryProgram`] is an in-memory implementation that hosts and
//! tests fill in directly or load from JSON.
//!
//! Argument `n` of a function is its local slot `n`; arguments always come first in a
//! function's local table.

use recast_types::Variable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::callgraph::{CallGraph, CallSite, CallType};
use crate::error::AnalysisResult;
use crate::expr::Expr;
use crate::uses::{
    is_helper_intrinsic, CallCast, FuncCall, ReturnSite, UseChain, VarRead, VarUses, VarWrite,
};

/// Read access to the program being analyzed.
pub trait Program {
    /// Use information for the function starting at `address`.
    fn function(&self, address: u64) -> Option<&FunctionBody>;

    /// Every function with a body, in address order.
    fn function_addresses(&self) -> Vec<u64>;

    /// Functions directly called from `function`.
    fn calls_from(&self, function: u64) -> Vec<u64>;

    /// Functions that call or reference `address`.
    fn calls_to(&self, address: u64) -> Vec<u64>;

    fn is_function_start(&self, address: u64) -> bool;

    fn function_name(&self, address: u64) -> Option<&str>;

    /// Imported functions are opaque: their parameters are never inferred.
    fn is_import(&self, address: u64) -> bool;
}

/// Parses a code address written as `0x401000`, `sub_401000` or `401000h`.
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .or_else(|| text.strip_prefix("sub_"))
        .or_else(|| text.strip_suffix('h'))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Serializes addresses as `0x`-prefixed hex strings.
mod hex_addr {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(address: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", address))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_address(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid address {:?}", s)))
    }
}

/// A local variable slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: String,
    /// Whether the slot is a function argument.
    #[serde(default)]
    pub is_arg: bool,
    /// Whether the slot lives on the stack (as opposed to a register).
    #[serde(default)]
    pub is_stack: bool,
}

impl LocalVar {
    pub fn arg(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_arg: true,
            is_stack: false,
        }
    }

    pub fn register(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_arg: false,
            is_stack: false,
        }
    }

    pub fn stack(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_arg: false,
            is_stack: true,
        }
    }

    /// A stack slot that is not an argument.
    pub fn is_stack_local(&self) -> bool {
        self.is_stack && !self.is_arg
    }
}

/// Use information for one function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionBody {
    #[serde(with = "hex_addr")]
    pub address: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub locals: Vec<LocalVar>,
    #[serde(default)]
    pub reads: Vec<VarRead>,
    #[serde(default)]
    pub writes: Vec<VarWrite>,
    #[serde(default)]
    pub casts: Vec<CallCast>,
    #[serde(default)]
    pub calls: Vec<FuncCall>,
    #[serde(default)]
    pub returns: Vec<ReturnSite>,
}

impl FunctionBody {
    pub fn new(address: u64, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            ..Default::default()
        }
    }

    /// Identity of local slot `slot`.
    pub fn var(&self, slot: usize) -> Variable {
        Variable::local(self.address, slot)
    }

    /// Adds a local slot and returns its index.
    pub fn add_local(&mut self, local: LocalVar) -> usize {
        self.locals.push(local);
        self.locals.len() - 1
    }

    pub fn with_args(mut self, count: usize) -> Self {
        for i in 0..count {
            self.add_local(LocalVar::arg(format!("a{}", i + 1)));
        }
        self
    }

    pub fn with_local(mut self, local: LocalVar) -> Self {
        self.add_local(local);
        self
    }

    pub fn read(mut self, var: Variable, chain: UseChain) -> Self {
        self.reads.push(VarRead::new(var, chain));
        self
    }

    pub fn write(mut self, var: Variable, chain: UseChain, value: Expr) -> Self {
        self.writes.push(VarWrite::new(var, chain, value));
        self
    }

    pub fn assign(self, var: Variable, value: Expr) -> Self {
        self.write(var, UseChain::empty(), value)
    }

    /// Records `call` and the use of `var` as its argument `arg_index`.
    pub fn cast(mut self, var: Variable, chain: UseChain, arg_index: usize, call: FuncCall) -> Self {
        self = self.call(call.clone());
        self.casts.push(CallCast::new(var, chain, arg_index, call));
        self
    }

    /// Records a call site once.
    pub fn call(mut self, call: FuncCall) -> Self {
        if !self.calls.contains(&call) {
            self.calls.push(call);
        }
        self
    }

    pub fn ret(mut self, var: Variable, chain: UseChain) -> Self {
        self.returns.push(ReturnSite { var, chain });
        self
    }

    pub fn local(&self, slot: usize) -> Option<&LocalVar> {
        self.locals.get(slot)
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn reads_of<'a>(&'a self, var: &'a Variable) -> impl Iterator<Item = &'a VarRead> {
        self.reads.iter().filter(move |r| &r.var == var)
    }

    pub fn writes_of<'a>(&'a self, var: &'a Variable) -> impl Iterator<Item = &'a VarWrite> {
        self.writes.iter().filter(move |w| &w.var == var)
    }

    pub fn casts_of<'a>(&'a self, var: &'a Variable) -> impl Iterator<Item = &'a CallCast> {
        self.casts.iter().filter(move |c| &c.var == var)
    }

    /// Every use of `var` in this function, cloned for annotation by the analyzer.
    pub fn uses_of(&self, var: &Variable) -> VarUses {
        VarUses {
            reads: self.reads_of(var).cloned().collect(),
            writes: self.writes_of(var).cloned().collect(),
            casts: self.casts_of(var).cloned().collect(),
        }
    }

    /// Globals this function touches, through uses or written values.
    pub fn referenced_globals(&self) -> BTreeSet<u64> {
        let mut globals = BTreeSet::new();
        let vars = self
            .reads
            .iter()
            .map(|r| &r.var)
            .chain(self.writes.iter().map(|w| &w.var))
            .chain(self.casts.iter().map(|c| &c.var))
            .chain(self.returns.iter().map(|r| &r.var));
        globals.extend(vars.filter_map(|v| v.address()));
        for write in &self.writes {
            collect_globals(&write.value, &mut globals);
        }
        globals
    }
}

fn collect_globals(expr: &Expr, out: &mut BTreeSet<u64>) {
    match expr {
        Expr::Global(address) => {
            out.insert(*address);
        }
        Expr::AddressOf(inner) | Expr::Cast { expr: inner, .. } => collect_globals(inner, out),
        Expr::Call { callee, args } => {
            // The callee of a direct call is a code reference, not a global use.
            if !matches!(callee.as_ref(), Expr::Global(_)) {
                collect_globals(callee, out);
            }
            for arg in args {
                collect_globals(arg, out);
            }
        }
        Expr::Local(_) | Expr::Num { .. } | Expr::Helper(_) | Expr::Other(_) => {}
    }
}

/// An imported function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    #[serde(with = "hex_addr")]
    pub address: u64,
    pub name: String,
}

#[derive(Serialize, Deserialize)]
struct ProgramSnapshot {
    #[serde(default)]
    functions: Vec<FunctionBody>,
    #[serde(default)]
    imports: Vec<Import>,
}

/// An in-memory program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ProgramSnapshot", into = "ProgramSnapshot")]
pub struct MemoryProgram {
    functions: BTreeMap<u64, FunctionBody>,
    imports: BTreeMap<u64, String>,
    call_graph: CallGraph,
    global_refs: BTreeMap<u64, BTreeSet<u64>>,
}

impl From<ProgramSnapshot> for MemoryProgram {
    fn from(snapshot: ProgramSnapshot) -> Self {
        let mut program = MemoryProgram::new();
        for import in snapshot.imports {
            program.add_import(import.address, import.name);
        }
        for body in snapshot.functions {
            program.add_function(body);
        }
        program
    }
}

impl From<MemoryProgram> for ProgramSnapshot {
    fn from(program: MemoryProgram) -> Self {
        Self {
            functions: program.functions.into_values().collect(),
            imports: program
                .imports
                .into_iter()
                .map(|(address, name)| Import { address, name })
                .collect(),
        }
    }
}

impl MemoryProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a function body.
    pub fn add_function(&mut self, body: FunctionBody) {
        let address = body.address;
        if self.functions.contains_key(&address) {
            self.functions.insert(address, body);
            self.reindex();
            return;
        }
        self.index(&body);
        self.functions.insert(address, body);
    }

    pub fn with_function(mut self, body: FunctionBody) -> Self {
        self.add_function(body);
        self
    }

    pub fn add_import(&mut self, address: u64, name: impl Into<String>) {
        let name = name.into();
        self.call_graph.add_node(address, Some(name.clone()), true);
        self.imports.insert(address, name);
    }

    pub fn with_import(mut self, address: u64, name: impl Into<String>) -> Self {
        self.add_import(address, name);
        self
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    fn index(&mut self, body: &FunctionBody) {
        let name = (!body.name.is_empty()).then(|| body.name.clone());
        self.call_graph.add_node(body.address, name, false);
        for call in &body.calls {
            if let Some(target) = call.explicit_target() {
                self.call_graph.add_call(
                    body.address,
                    target,
                    CallSite {
                        call_address: call.address,
                        call_type: CallType::Direct,
                    },
                );
            }
        }
        for global in body.referenced_globals() {
            self.global_refs
                .entry(global)
                .or_default()
                .insert(body.address);
        }
    }

    fn reindex(&mut self) {
        self.call_graph = CallGraph::new();
        self.global_refs.clear();
        for (address, name) in &self.imports {
            self.call_graph.add_node(*address, Some(name.clone()), true);
        }
        let bodies: Vec<FunctionBody> = self.functions.values().cloned().collect();
        for body in &bodies {
            self.index(body);
        }
    }

    /// Save program to JSON.
    pub fn to_json(&self) -> AnalysisResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load program from JSON.
    pub fn from_json(json: &str) -> AnalysisResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Program for MemoryProgram {
    fn function(&self, address: u64) -> Option<&FunctionBody> {
        self.functions.get(&address)
    }

    fn function_addresses(&self) -> Vec<u64> {
        self.functions.keys().copied().collect()
    }

    fn calls_from(&self, function: u64) -> Vec<u64> {
        self.call_graph
            .callee_addresses(function)
            .into_iter()
            .filter(|callee| {
                !self
                    .function_name(*callee)
                    .map(is_helper_intrinsic)
                    .unwrap_or(false)
            })
            .collect()
    }

    fn calls_to(&self, address: u64) -> Vec<u64> {
        let mut callers: BTreeSet<u64> = self
            .call_graph
            .caller_addresses(address)
            .into_iter()
            .collect();
        if let Some(refs) = self.global_refs.get(&address) {
            callers.extend(refs.iter().copied());
        }
        callers.into_iter().collect()
    }

    fn is_function_start(&self, address: u64) -> bool {
        self.functions.contains_key(&address) || self.imports.contains_key(&address)
    }

    fn function_name(&self, address: u64) -> Option<&str> {
        if let Some(name) = self.imports.get(&address) {
            return Some(name.as_str());
        }
        self.functions
            .get(&address)
            .map(|f| f.name.as_str())
            .filter(|name| !name.is_empty())
    }

    fn is_import(&self, address: u64) -> bool {
        self.imports.contains_key(&address)
    }
}
