//! Realtime-safe logging for the audio thread.
//!
//! `eq_log!` formats into a fixed-size slot of a single-producer ring, with no
//! allocation and no locking. Non-realtime code drains the ring and forwards the
//! messages to the `log` facade (and, optionally, a file in the temp dir).
//! Without the `debug` feature the macro compiles to nothing.

use std::fmt;

#[cfg(feature = "debug")]
pub mod logger {
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    const RING_SLOTS: usize = 256;
    const MESSAGE_BYTES: usize = 512;
    const LOG_FILE_NAME: &str = "parametric_eq.log";

    #[derive(Copy, Clone)]
    struct Slot {
        len: u16,
        bytes: [u8; MESSAGE_BYTES],
    }

    impl Default for Slot {
        fn default() -> Self {
            Self {
                len: 0,
                bytes: [0; MESSAGE_BYTES],
            }
        }
    }

    impl Slot {
        fn text(&self) -> &str {
            std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("<invalid utf-8>")
        }
    }

    impl fmt::Write for Slot {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let used = self.len as usize;
            let room = MESSAGE_BYTES - used;
            if room == 0 {
                return Ok(());
            }
            // Truncate on a char boundary.
            let mut n = s.len().min(room);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.bytes[used..used + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len = (used + n) as u16;
            Ok(())
        }
    }

    struct Ring {
        head: AtomicUsize,
        tail: AtomicUsize,
        slots: Box<[UnsafeCell<Slot>]>,
    }

    // SAFETY: one producer (audio thread) writes `head` slots, one consumer reads
    // `tail` slots; indices are published with release/acquire ordering.
    unsafe impl Sync for Ring {}

    impl Ring {
        fn new() -> Self {
            let slots = (0..RING_SLOTS)
                .map(|_| UnsafeCell::new(Slot::default()))
                .collect::<Vec<_>>()
                .into_boxed_slice();
            Self {
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
                slots,
            }
        }

        // Drops the message when full.
        fn push(&self, slot: Slot) {
            let head = self.head.load(Ordering::Relaxed);
            let next = (head + 1) % self.slots.len();
            if next == self.tail.load(Ordering::Acquire) {
                return;
            }
            unsafe {
                *self.slots[head].get() = slot;
            }
            self.head.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<Slot> {
            let tail = self.tail.load(Ordering::Relaxed);
            if tail == self.head.load(Ordering::Acquire) {
                return None;
            }
            let slot = unsafe { *self.slots[tail].get() };
            self.tail.store((tail + 1) % self.slots.len(), Ordering::Release);
            Some(slot)
        }
    }

    static RING: OnceLock<Ring> = OnceLock::new();
    static ENABLED: AtomicBool = AtomicBool::new(false);

    /// Allocate the ring. Call from a non-realtime context before processing.
    pub fn init_logger() {
        let _ = RING.get_or_init(Ring::new);
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn log_args(args: fmt::Arguments) {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Some(ring) = RING.get() else {
            return;
        };
        let mut slot = Slot::default();
        let _ = fmt::write(&mut slot, args);
        ring.push(slot);
    }

    /// Forward pending messages to the `log` facade. Returns how many were drained.
    pub fn drain_to_log() -> usize {
        drain(|text| log::debug!(target: "parametric_eq::rt", "{}", text))
    }

    /// Append pending messages to `<tmp>/parametric_eq.log`.
    pub fn drain_to_file() {
        let path: PathBuf = std::env::temp_dir().join(LOG_FILE_NAME);
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) else {
            return;
        };
        drain(|text| {
            let _ = writeln!(file, "{}", text);
        });
    }

    fn drain(mut sink: impl FnMut(&str)) -> usize {
        let Some(ring) = RING.get() else {
            return 0;
        };
        let mut count = 0;
        while let Some(slot) = ring.pop() {
            if slot.len > 0 {
                sink(slot.text());
                count += 1;
            }
        }
        count
    }

}

#[cfg(feature = "debug")]
pub(crate) fn eq_log_inner(args: fmt::Arguments) {
    logger::log_args(args);
}

#[cfg(not(feature = "debug"))]
pub(crate) fn eq_log_inner(_args: fmt::Arguments) {}

/// Drain realtime messages into the `log` facade; no-op without `debug`.
pub(crate) fn flush() {
    #[cfg(feature = "debug")]
    {
        logger::drain_to_log();
    }
}

#[macro_export]
macro_rules! eq_log {
    ($($arg:tt)*) => {
        $crate::debug::eq_log_inner(format_args!($($arg)*))
    };
}
