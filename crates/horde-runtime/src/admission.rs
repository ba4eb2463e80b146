//! Admission classifier
//!
//! Pure function assigning every invocation to one lane, or to the delete
//! path. Four booleans decide whether the call belongs on the create lane:
//!
//! - `A`: the invoked quest is a creation quest
//! - `B`: the target is mid-creation
//! - `C`: the caller runs inside a creation
//! - `D`: the caller is the target
//!
//! Create lane iff `(B∧D) ∨ (A∧D) ∨ (A∧B) ∨ (A∧C)`. Anything else, including
//! top-level calls, takes the regular lane.

use crate::lanes::Lane;

/// Where an invocation goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Lifecycle delete path, not a lane
    Delete,
    /// Queue on a lane
    Lane(Lane),
}

/// Everything the classifier looks at
#[derive(Debug, Clone, Copy)]
pub struct AdmissionInput {
    /// The quest is `delete`
    pub is_delete: bool,
    /// The invocation has a calling actor
    pub has_caller: bool,
    /// A
    pub is_creation_quest: bool,
    /// B
    pub target_creating: bool,
    /// C
    pub caller_in_create: bool,
    /// D
    pub is_self_call: bool,
    /// Lane used when no creation rule applies
    pub regular: Lane,
}

/// Classify one invocation
pub fn classify(input: &AdmissionInput) -> Admission {
    if input.is_delete {
        return Admission::Delete;
    }

    if !input.has_caller {
        return Admission::Lane(input.regular);
    }

    let a = input.is_creation_quest;
    let b = input.target_creating;
    let c = input.caller_in_create;
    let d = input.is_self_call;

    if (b && d) || (a && d) || (a && b) || (a && c) {
        Admission::Lane(Lane::Create)
    } else {
        Admission::Lane(input.regular)
    }
}
