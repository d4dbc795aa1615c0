use crate::state::{SimStatus, StudyState};
use std::fmt;

const RULE: &str = "------------------------------------------------------------";

/// Human readable snapshot of a study state
#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    state: StudyState,
}

impl StatusReport {
    pub fn new(state: StudyState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StudyState {
        &self.state
    }

    pub fn count(&self, status: SimStatus) -> usize {
        self.state.count(status)
    }
}

fn heading(status: SimStatus) -> &'static str {
    match status {
        SimStatus::NotStarted => "not started",
        SimStatus::Running => "running",
        SimStatus::Finished => "finished",
        SimStatus::Interrupted => "interrupted",
        SimStatus::Error => "with error",
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(f, "Simulation status of {}", self.state.root_folder.display())?;
        writeln!(f, "{RULE}")?;

        for (status, count) in self.state.counts() {
            writeln!(f, "Number of simulations {}: {count}", heading(status))?;
        }
        writeln!(f, "Total: {}", self.state.total())?;

        for status in SimStatus::ALL {
            writeln!(f, "{RULE}")?;
            writeln!(f, "Simulations {}:", heading(status))?;
            writeln!(f, "{RULE}")?;

            for case in self.state.cases(status) {
                writeln!(f, "{case}")?;
            }
        }

        write!(f, "{RULE}")
    }
}
