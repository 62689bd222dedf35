//! `IA2_EXIT_POLICY` parsing. Read once, cached for the life of the
//! process, matching the C side's `pthread_once` guard.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    Union,
    Callgate,
    Auto,
}

impl ExitPolicy {
    pub fn name(self) -> &'static str {
        match self {
            ExitPolicy::Union => "union",
            ExitPolicy::Callgate => "callgate",
            ExitPolicy::Auto => "auto",
        }
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            None => ExitPolicy::Callgate,
            Some("union") => ExitPolicy::Union,
            Some("callgate") => ExitPolicy::Callgate,
            Some("auto") => ExitPolicy::Auto,
            Some(other) => {
                tracing::warn!(value = other, "unknown IA2_EXIT_POLICY value; defaulting to callgate");
                ExitPolicy::Callgate
            }
        }
    }
}

static POLICY: OnceLock<ExitPolicy> = OnceLock::new();

/// Returns the process's exit policy, reading and caching `IA2_EXIT_POLICY`
/// on first call.
pub fn exit_policy_get() -> ExitPolicy {
    *POLICY.get_or_init(|| ExitPolicy::parse(std::env::var("IA2_EXIT_POLICY").ok().as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_defaults_to_callgate() {
        assert_eq!(ExitPolicy::parse(None), ExitPolicy::Callgate);
    }

    #[test]
    fn recognizes_all_three_names() {
        assert_eq!(ExitPolicy::parse(Some("union")), ExitPolicy::Union);
        assert_eq!(ExitPolicy::parse(Some("callgate")), ExitPolicy::Callgate);
        assert_eq!(ExitPolicy::parse(Some("auto")), ExitPolicy::Auto);
    }

    #[test]
    fn unknown_value_falls_back_to_callgate() {
        assert_eq!(ExitPolicy::parse(Some("bogus")), ExitPolicy::Callgate);
    }
}
