/// Bounded spin-then-yield budget for short waits before an OS thread blocks.
#[derive(Copy, Clone, Debug)]
pub struct WaitBudget {
    spins: u32,
    yields: u32,
    spin_cap: u32,
    yield_cap: u32,
}

impl WaitBudget {
    /// Budget for waits that are expected to end within microseconds.
    #[inline]
    pub fn hot() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 128,
            yield_cap: 8,
        }
    }

    /// Reset the counters.
    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
    }

    /// True once both the spin and the yield allowance are used up.
    #[inline]
    pub fn exhausted(&self) -> bool {
        self.spins >= self.spin_cap && self.yields >= self.yield_cap
    }

    /// Spend one step: spin first, then yield the OS thread. Returns false,
    /// without waiting, once the budget is exhausted.
    #[inline]
    pub fn step(&mut self) -> bool {
        if self.spins < self.spin_cap {
            core::hint::spin_loop();
            self.spins += 1;
            true
        } else if self.yields < self.yield_cap {
            std::thread::yield_now();
            self.yields += 1;
            true
        } else {
            false
        }
    }

    /// Poll `ready` until it returns true or the budget runs out.
    #[inline]
    pub fn spin_until(&mut self, mut ready: impl FnMut() -> bool) -> bool {
        loop {
            if ready() {
                return true;
            }
            if !self.step() {
                return ready();
            }
        }
    }
}

impl Default for WaitBudget {
    fn default() -> Self {
        Self {
            spins: 0,
            yields: 0,
            spin_cap: 64,
            yield_cap: 4,
        }
    }
}
