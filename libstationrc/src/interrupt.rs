use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shareable interrupt flag.
///
/// The flag is raised from outside (typically a Ctrl-C handler) and polled by
/// the tuning loops between hardware round trips.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();
        assert!(!interrupt.is_raised());
        handle.raise();
        assert!(interrupt.is_raised());
    }
}
