//! Destructor exit-policy table: which compartments' static destructors
//! need to run with the union PKRU value (every pkey readable/writable) to
//! tear down cleanly, and whether the active [`ExitPolicy`] allows that.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::error::{GateRuntimeError, Result};
use crate::exit_policy::ExitPolicy;

#[derive(Debug, Clone, Copy)]
pub struct DestructorEntry {
    pub pkey: u8,
    pub needs_union_pkru: bool,
}

static TABLE: Lazy<Mutex<HashMap<u8, DestructorEntry>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers a compartment's destructor metadata; called once per
/// compartment from the generated `ia2_compartment_init.inc` constructor.
pub fn register(entry: DestructorEntry) {
    TABLE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(entry.pkey, entry);
}

pub fn lookup(pkey: u8) -> Option<DestructorEntry> {
    TABLE.lock().unwrap_or_else(|e| e.into_inner()).get(&pkey).copied()
}

/// Checks `entry` against `policy`, failing closed: `callgate` can never
/// satisfy a destructor that demands union PKRU, and the mismatch is
/// treated as fatal rather than silently downgraded.
pub fn check_exit_policy(entry: DestructorEntry, policy: ExitPolicy) -> Result<()> {
    if entry.needs_union_pkru && policy == ExitPolicy::Callgate {
        return Err(GateRuntimeError::ExitPolicyViolation { pkey: entry.pkey });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callgate_policy_rejects_a_union_requiring_destructor() {
        let entry = DestructorEntry {
            pkey: 3,
            needs_union_pkru: true,
        };
        let err = check_exit_policy(entry, ExitPolicy::Callgate);
        assert!(matches!(err, Err(GateRuntimeError::ExitPolicyViolation { pkey: 3 })));
    }

    #[test]
    fn union_policy_accepts_it() {
        let entry = DestructorEntry {
            pkey: 3,
            needs_union_pkru: true,
        };
        assert!(check_exit_policy(entry, ExitPolicy::Union).is_ok());
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let entry = DestructorEntry {
            pkey: 9,
            needs_union_pkru: false,
        };
        register(entry);
        let found = lookup(9).unwrap();
        assert_eq!(found.pkey, 9);
        assert!(!found.needs_union_pkru);
    }
}
