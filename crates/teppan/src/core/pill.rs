use std::thread;

/// # Pill
///
/// Turns a panic inside a pipeline stage into process termination.
///
/// A stage that unwinds leaves its accumulators, and the clients waiting on
/// them, stranded forever; the other stages would keep running against a
/// pipeline that can no longer make progress. Each stage thread owns a
/// `Pill`: when it is dropped while the thread is panicking, it logs which
/// stage died and aborts, matching how every other invariant violation in
/// the service is handled.
pub(crate) struct Pill {
    stage: &'static str,
    armed: bool,
}

impl Pill {
    pub fn new(stage: &'static str) -> Self {
        Self { stage, armed: true }
    }

    /// A pill that only reports, for exercising the guard in tests.
    #[cfg(test)]
    fn disarmed(stage: &'static str) -> Self {
        Self { stage, armed: false }
    }

    fn swallowed(&self) -> bool {
        thread::panicking()
    }
}

impl Drop for Pill {
    fn drop(&mut self) {
        if self.swallowed() {
            tracing::error!(stage = self.stage, "pipeline stage panicked");
            if self.armed {
                std::process::abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pill_is_silent_on_normal_exit() {
        let handle = thread::spawn(|| {
            let pill = Pill::new("intake");
            assert!(!pill.swallowed());
        });
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_pill_observes_unwinding() {
        let handle = thread::spawn(|| {
            let _pill = Pill::disarmed("collect");
            panic!("stage failure");
        });
        assert!(handle.join().is_err());
    }
}
