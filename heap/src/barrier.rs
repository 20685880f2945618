use parking_lot::{Condvar, Mutex};

/// A reusable barrier whose waiters sleep until the last one arrives.
#[derive(Debug, Default)]
pub struct SenseBarrier {
    /// (arrived, sense)
    state: Mutex<(usize, bool)>,
    cvar: Condvar,
}

impl SenseBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `until` threads have called this for the current phase.
    pub fn wait(&self, until: usize) {
        let mut state = self.state.lock();
        let my_sense = state.1;
        state.0 += 1;

        if state.0 == until {
            state.0 = 0;
            state.1 = !my_sense;
            self.cvar.notify_all();
        } else {
            while state.1 == my_sense {
                self.cvar.wait(&mut state);
            }
        }
    }
}
