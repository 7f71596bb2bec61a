//! Analyzer configuration.
//!
//! Optional behaviors are modeled as passes that can be switched on or off
//! individually. Pointer sizes are not configured here; they come from the
//! [`ArchInfo`](recast_types::ArchInfo) of the type database being analyzed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::AnalysisResult;

/// Default limit on nested inference calls.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Optional analysis behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisPass {
    /// Push provisional struct types into untyped callee parameters.
    CrossCallPropagation,
    /// Resolve indirect calls through function-pointer members.
    ImplicitCalls,
    /// Parse call targets out of member comments and names when the side-table has none.
    AnnotationFallback,
    /// Infer types for non-argument stack variables.
    StackVariables,
}

impl AnalysisPass {
    /// Returns all passes.
    pub fn all() -> &'static [AnalysisPass] {
        use AnalysisPass::*;
        &[
            CrossCallPropagation,
            ImplicitCalls,
            AnnotationFallback,
            StackVariables,
        ]
    }

    /// Whether the pass runs unless explicitly disabled.
    pub fn enabled_by_default(&self) -> bool {
        !matches!(self, AnalysisPass::StackVariables)
    }

    /// Returns the name of the pass.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CrossCallPropagation => "cross-call-propagation",
            Self::ImplicitCalls => "implicit-calls",
            Self::AnnotationFallback => "annotation-fallback",
            Self::StackVariables => "stack-variables",
        }
    }

    /// Parses a pass name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.name() == s.to_lowercase())
    }
}

/// Configuration for one analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Name prefix for synthesized structs; the struct id is appended.
    pub struct_name_prefix: String,
    /// Explicitly enabled passes (override defaults).
    pub enabled_passes: BTreeSet<AnalysisPass>,
    /// Explicitly disabled passes (override defaults).
    pub disabled_passes: BTreeSet<AnalysisPass>,
    /// Limit on nested inference calls before a variable degrades to unknown.
    pub max_depth: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            struct_name_prefix: "struct_".to_string(),
            enabled_passes: BTreeSet::new(),
            disabled_passes: BTreeSet::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl AnalyzerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> AnalysisResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_struct_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.struct_name_prefix = prefix.into();
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Explicitly enables a pass.
    pub fn enable_pass(mut self, pass: AnalysisPass) -> Self {
        self.enabled_passes.insert(pass);
        self.disabled_passes.remove(&pass);
        self
    }

    /// Explicitly disables a pass.
    pub fn disable_pass(mut self, pass: AnalysisPass) -> Self {
        self.disabled_passes.insert(pass);
        self.enabled_passes.remove(&pass);
        self
    }

    /// Checks if a pass is enabled.
    pub fn is_pass_enabled(&self, pass: AnalysisPass) -> bool {
        if self.enabled_passes.contains(&pass) {
            return true;
        }
        if self.disabled_passes.contains(&pass) {
            return false;
        }
        pass.enabled_by_default()
    }

    /// Name for a synthesized struct.
    pub fn struct_name(&self, id: u64) -> String {
        format!("{}{}", self.struct_name_prefix, id)
    }
}
