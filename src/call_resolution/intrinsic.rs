//! Compiler intrinsics that show up as calls but are not program calls.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    DebugInfo,
    MemSet,
    Lifetime,
    MemCpy,
    MemMove,
}

static INTRINSIC_REGEX: Lazy<HashMap<Intrinsic, Regex>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(Intrinsic::DebugInfo, Regex::new(r"^llvm\.dbg\.").unwrap());
    m.insert(Intrinsic::MemSet, Regex::new(r"^llvm\.memset\.").unwrap());
    m.insert(
        Intrinsic::Lifetime,
        Regex::new(r"^llvm\.lifetime\.(start|end)").unwrap(),
    );
    m.insert(Intrinsic::MemCpy, Regex::new(r"^llvm\.memcpy\.").unwrap());
    m.insert(Intrinsic::MemMove, Regex::new(r"^llvm\.memmove\.").unwrap());
    m
});

impl Intrinsic {
    pub fn new(name: &str) -> Option<Self> {
        if !name.starts_with("llvm.") {
            return None;
        }
        [
            Intrinsic::DebugInfo,
            Intrinsic::MemSet,
            Intrinsic::Lifetime,
            Intrinsic::MemCpy,
            Intrinsic::MemMove,
        ]
        .iter()
        .copied()
        .find(|intrinsic| INTRINSIC_REGEX[intrinsic].is_match(name))
    }

    /// memcpy/memmove copy a whole aggregate from their second argument into their first.
    pub fn is_aggregate_copy(self) -> bool {
        matches!(self, Intrinsic::MemCpy | Intrinsic::MemMove)
    }
}
