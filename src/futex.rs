//! Futex-style wait/notify on a 32-bit atomic word.
//!
//! Thin wrapper over `rustix::thread::futex` with the semantics the ring
//! needs: [`wait`] blocks only while the word holds an expected value, and
//! absorbs spurious wake-ups and signal interruptions internally.

use std::sync::atomic::{AtomicU32, Ordering};

use rustix::thread::futex;

/// Blocks the calling thread while `word` holds `expected`.
///
/// Returns once an acquire load of `word` observes any other value, so a
/// woken waiter also observes everything published before the matching
/// notify. The kernel re-checks the word before sleeping, which closes the
/// race between our load and a concurrent update-plus-notify.
pub(crate) fn wait(word: &AtomicU32, expected: u32) {
    while word.load(Ordering::Acquire) == expected {
        // EAGAIN (word changed before the kernel slept) and EINTR (signal)
        // both count as wake-ups; the loop re-checks the word either way.
        let _ = futex::wait(word, futex::Flags::PRIVATE, expected, None);
    }
}

/// Wakes every thread blocked in [`wait`] on `word`.
pub(crate) fn wake_all(word: &AtomicU32) {
    let _ = futex::wake(word, futex::Flags::PRIVATE, i32::MAX as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_returns_immediately_on_mismatch() {
        let word = AtomicU32::new(7);
        wait(&word, 0);
    }

    #[test]
    fn wake_unblocks_a_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            std::thread::spawn(move || {
                wait(&word, 0);
                word.load(Ordering::Acquire)
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        word.store(1, Ordering::Release);
        wake_all(&word);
        assert_eq!(waiter.join().unwrap(), 1);
    }
}
