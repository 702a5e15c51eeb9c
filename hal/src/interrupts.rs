//! Interrupt masking abstraction

/// Interrupt control for the calling CPU
///
/// Critical sections that share state with interrupt handlers mask
/// interrupts on the local CPU before taking a spinlock, so a handler on
/// the same CPU can never spin on a lock its own CPU holds. Masking nests
/// through [`InterruptHal::save_and_disable`] / [`InterruptHal::restore`].
pub trait InterruptHal: Send + Sync {
    /// Enables interrupts on the calling CPU
    fn enable_interrupts(&self);

    /// Disables interrupts on the calling CPU
    fn disable_interrupts(&self);

    /// Returns whether interrupts are enabled on the calling CPU
    fn interrupts_enabled(&self) -> bool;

    /// Disables interrupts and returns whether they were enabled before
    fn save_and_disable(&self) -> bool {
        let was_enabled = self.interrupts_enabled();
        self.disable_interrupts();
        was_enabled
    }

    /// Restores the state returned by [`InterruptHal::save_and_disable`]
    fn restore(&self, was_enabled: bool) {
        if was_enabled {
            self.enable_interrupts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockInterrupts {
        enabled: AtomicBool,
    }

    impl InterruptHal for MockInterrupts {
        fn enable_interrupts(&self) {
            self.enabled.store(true, Ordering::SeqCst);
        }

        fn disable_interrupts(&self) {
            self.enabled.store(false, Ordering::SeqCst);
        }

        fn interrupts_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_save_restore_nests() {
        let irq = MockInterrupts {
            enabled: AtomicBool::new(true),
        };

        let outer = irq.save_and_disable();
        assert!(!irq.interrupts_enabled());

        let inner = irq.save_and_disable();
        assert!(!inner);

        irq.restore(inner);
        assert!(!irq.interrupts_enabled());

        irq.restore(outer);
        assert!(irq.interrupts_enabled());
    }

    #[test]
    fn test_restore_keeps_disabled_state() {
        let irq = MockInterrupts {
            enabled: AtomicBool::new(false),
        };
        let saved = irq.save_and_disable();
        irq.restore(saved);
        assert!(!irq.interrupts_enabled());
    }
}
