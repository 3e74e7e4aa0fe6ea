//! `critical-section` 1.x provider for the ESP-IDF std runtime.
//!
//! The parameter store's `CriticalSectionRawMutex` links against these
//! symbols.  Tasks are std threads, so a process-wide mutex with per-thread
//! nesting depth is enough; ISRs never take the store lock.

#[cfg(target_os = "espidf")]
use core::cell::{Cell, RefCell};
#[cfg(target_os = "espidf")]
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(target_os = "espidf")]
static CRITICAL_SECTION_MUTEX: Mutex<()> = Mutex::new(());

#[cfg(target_os = "espidf")]
thread_local! {
    static DEPTH: Cell<u8> = const { Cell::new(0) };
    static GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
    DEPTH.with(|depth| {
        let d = depth.get();
        if d == 0 {
            // A panic inside a store closure poisons the mutex; the table
            // itself is still consistent, so keep going.
            let lock = CRITICAL_SECTION_MUTEX
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            GUARD.with(|guard| *guard.borrow_mut() = Some(lock));
        }
        let next = d.saturating_add(1);
        depth.set(next);
        next
    })
}

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_release(_token: u8) {
    DEPTH.with(|depth| {
        let d = depth.get();
        if d == 0 {
            return;
        }
        depth.set(d - 1);
        if d == 1 {
            GUARD.with(|guard| *guard.borrow_mut() = None);
        }
    });
}
