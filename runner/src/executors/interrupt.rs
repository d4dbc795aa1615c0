use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use tracing::warn;

/// Escalating operator interrupt shared between the signal handler and the workers.
/// One interrupt stops dispatching new cases, a second one terminates running cases.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    level: Arc<AtomicU8>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// raise the interrupt level by one and return the new level
    pub fn escalate(&self) -> u8 {
        self.level
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |level| {
                Some(level.saturating_add(1))
            })
            .map_or(u8::MAX, |previous| previous.saturating_add(1))
    }

    pub fn level(&self) -> u8 {
        self.level.load(Ordering::SeqCst)
    }

    pub fn stop_dispatch(&self) -> bool {
        self.level() >= 1
    }

    pub fn terminate(&self) -> bool {
        self.level() >= 2
    }

    /// route Ctrl-C of this process into this interrupt, may only be called once per process
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let interrupt = self.clone();

        ctrlc::set_handler(move || match interrupt.escalate() {
            1 => warn!("Interrupt received, no new cases are started. Interrupt again to terminate running cases"),
            _ => warn!("Interrupt received again, terminating running cases"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Interrupt;

    #[test]
    fn escalation_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();

        assert!(!interrupt.stop_dispatch());
        assert_eq!(handle.escalate(), 1);
        assert!(interrupt.stop_dispatch());
        assert!(!interrupt.terminate());
        assert_eq!(handle.escalate(), 2);
        assert!(interrupt.terminate());
    }
}
