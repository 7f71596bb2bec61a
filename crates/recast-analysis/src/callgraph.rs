//! Call graph.
//!
//! Tracks caller/callee relationships between functions. [`MemoryProgram`] indexes its
//! direct calls with one, and the analyzer reports the indirect call edges it resolves
//! as [`CallEdge`]s that can be merged into one.
//!
//! [`MemoryProgram`]: crate::program::MemoryProgram

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A node in the call graph representing a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallGraphNode {
    /// The entry address of the function.
    pub address: u64,
    /// The function name (if known).
    pub name: Option<String>,
    /// Whether this is an external/imported function.
    pub is_external: bool,
}

/// Type of call relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Direct call with known target address.
    Direct,
    /// Indirect call resolved through a function-pointer member.
    Implicit,
}

/// A call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallSite {
    /// Address of the call instruction.
    pub call_address: u64,
    /// Type of call.
    pub call_type: CallType,
}

/// A resolved call edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallEdge {
    /// Function containing the call.
    pub caller: u64,
    /// Address of the call instruction.
    pub call_address: u64,
    /// Entry address of the called function.
    pub target: u64,
}

/// A call graph representing function call relationships.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// All nodes (functions) in the graph, keyed by entry address.
    nodes: BTreeMap<u64, CallGraphNode>,
    /// Edges from caller to callees.
    outgoing: BTreeMap<u64, BTreeSet<(u64, CallSite)>>,
    /// Edges from callee to callers.
    incoming: BTreeMap<u64, BTreeSet<(u64, CallSite)>>,
}

impl CallGraph {
    /// Create a new empty call graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function node to the graph.
    pub fn add_node(&mut self, address: u64, name: Option<String>, is_external: bool) {
        self.nodes.entry(address).or_insert(CallGraphNode {
            address,
            name,
            is_external,
        });
    }

    /// Add a call edge from caller to callee.
    pub fn add_call(&mut self, caller: u64, callee: u64, call_site: CallSite) {
        self.outgoing
            .entry(caller)
            .or_default()
            .insert((callee, call_site));
        self.incoming
            .entry(callee)
            .or_default()
            .insert((caller, call_site));
    }

    /// Add a resolved indirect call edge.
    pub fn add_edge(&mut self, edge: CallEdge) {
        self.add_call(
            edge.caller,
            edge.target,
            CallSite {
                call_address: edge.call_address,
                call_type: CallType::Implicit,
            },
        );
    }

    /// Get a node by address.
    pub fn get_node(&self, address: u64) -> Option<&CallGraphNode> {
        self.nodes.get(&address)
    }

    /// Get the number of functions in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get all functions called by the given function.
    pub fn callees(&self, caller: u64) -> impl Iterator<Item = (u64, &CallSite)> {
        self.outgoing
            .get(&caller)
            .into_iter()
            .flat_map(|v| v.iter().map(|(addr, site)| (*addr, site)))
    }

    /// Get all functions that call the given function.
    pub fn callers(&self, callee: u64) -> impl Iterator<Item = (u64, &CallSite)> {
        self.incoming
            .get(&callee)
            .into_iter()
            .flat_map(|v| v.iter().map(|(addr, site)| (*addr, site)))
    }

    /// Distinct callees, in address order.
    pub fn callee_addresses(&self, caller: u64) -> Vec<u64> {
        let set: BTreeSet<u64> = self.callees(caller).map(|(addr, _)| addr).collect();
        set.into_iter().collect()
    }

    /// Distinct callers, in address order.
    pub fn caller_addresses(&self, callee: u64) -> Vec<u64> {
        let set: BTreeSet<u64> = self.callers(callee).map(|(addr, _)| addr).collect();
        set.into_iter().collect()
    }

    /// Get the number of call edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(|v| v.len()).sum()
    }
}
