use std::fmt;

use serde::{Deserialize, Serialize};

use crate::supervisor::Termination;

/// Solve-mode exit code announcing a satisfiable instance.
pub const EXIT_SATISFIABLE: i32 = 10;
/// Solve-mode exit code announcing an unsatisfiable instance.
pub const EXIT_UNSATISFIABLE: i32 = 20;

/// What the solver-under-test claims about an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Satisfiable,
    Unsatisfiable,
    ProtocolViolation,
}

impl Verdict {
    /// `10 → Satisfiable`, `20 → Unsatisfiable`, anything else (signals
    /// included) is a protocol violation.
    pub fn classify(termination: Termination) -> Self {
        match termination {
            Termination::Exited(EXIT_SATISFIABLE) => Verdict::Satisfiable,
            Termination::Exited(EXIT_UNSATISFIABLE) => Verdict::Unsatisfiable,
            _ => Verdict::ProtocolViolation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Satisfiable => "satisfiable",
            Verdict::Unsatisfiable => "unsatisfiable",
            Verdict::ProtocolViolation => "protocol_violation",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn contract_codes_map_to_verdicts() {
        assert_eq!(Verdict::classify(Termination::Exited(10)), Verdict::Satisfiable);
        assert_eq!(Verdict::classify(Termination::Exited(20)), Verdict::Unsatisfiable);
    }

    #[test]
    fn other_terminations_are_protocol_violations() {
        for status in [
            Termination::Exited(0),
            Termination::Exited(1),
            Termination::Exited(7),
            Termination::Exited(30),
            Termination::Signaled(Some(11)),
            Termination::Signaled(None),
        ] {
            assert_eq!(Verdict::classify(status), Verdict::ProtocolViolation, "{status}");
        }
    }

    proptest! {
        #[test]
        fn only_ten_and_twenty_are_verdicts(code in any::<i32>()) {
            let verdict = Verdict::classify(Termination::Exited(code));
            let expected = match code {
                10 => Verdict::Satisfiable,
                20 => Verdict::Unsatisfiable,
                _ => Verdict::ProtocolViolation,
            };
            prop_assert_eq!(verdict, expected);
        }
    }
}
