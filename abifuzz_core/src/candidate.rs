use crate::abi::{AbiValue, AccountRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One synthesized call, ready for dispatch: target method, concrete argument
/// values, and the acting account that submits it. Candidates are immutable
/// once dispatched; mutation always produces a fresh copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub method: String,
    pub args: Vec<AbiValue>,
    pub sender: AccountRef,
}

impl Candidate {
    pub fn new(method: impl Into<String>, args: Vec<AbiValue>, sender: AccountRef) -> Self {
        Self {
            method: method.into(),
            args,
            sender,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ") from {}", self.sender)
    }
}
