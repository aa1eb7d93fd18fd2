//! Single-producer/single-consumer rendezvous between the two cores.
//!
//! One value travels forward (emulation core to audio core) and one value
//! travels back (the acknowledgement, carrying the consumed buffers home).
//! Each direction has one slot and one flag:
//!
//! ```text
//!             frame slot + frame_ready
//!  Publisher ------------------------------> Consumer
//!            <------------------------------
//!             return slot + audio_done
//! ```
//!
//! # Memory ordering
//!
//! - The side that fills a slot writes the payload first, then stores its
//!   flag with `Release`. That store is the write barrier: every byte of the
//!   payload (including sample data reached through it) is visible to anyone
//!   who observes the flag set.
//! - The side that drains a slot loads the flag with `Acquire` before touching
//!   the payload, then clears the flag with `Release` after taking it, which
//!   hands the empty slot back to the filler.
//!
//! A slot is therefore only ever touched by the side the flag currently grants
//! it to, and each flag has exactly one setter and one clearer. `Publisher` and
//! `Consumer` are not `Clone`, which keeps it that way.
//!
//! Both waits spin forever. A peer that stops responding halts this side too;
//! recovering from that is left to an external watchdog.

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct SpscRendezvous<T> {
    frame: UnsafeCell<Option<T>>,
    returned: UnsafeCell<Option<T>>,
    frame_ready: AtomicBool,
    audio_done: AtomicBool,
}

// SAFETY: the slots are only accessed under the flag protocol described in
// the module docs, and the two endpoints are unique.
unsafe impl<T: Send> Sync for SpscRendezvous<T> {}
unsafe impl<T: Send> Send for SpscRendezvous<T> {}

impl<T> SpscRendezvous<T> {
    /// Fresh rendezvous with both flags clear and both slots empty, split into
    /// its two endpoints.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Publisher<T>, Consumer<T>) {
        let shared = Arc::new(Self {
            frame: UnsafeCell::new(None),
            returned: UnsafeCell::new(None),
            frame_ready: AtomicBool::new(false),
            audio_done: AtomicBool::new(false),
        });
        (
            Publisher {
                shared: Arc::clone(&shared),
            },
            Consumer { shared },
        )
    }
}

/// Emulation-core endpoint
pub struct Publisher<T> {
    shared: Arc<SpscRendezvous<T>>,
}

impl<T> Publisher<T> {
    /// Hand `value` to the consumer and raise `frame_ready`.
    ///
    /// Spins while a previously published value has not been taken yet.
    pub fn publish(&mut self, value: T) {
        while self.shared.frame_ready.load(Ordering::Acquire) {
            hint::spin_loop();
        }
        // SAFETY: frame_ready is clear, so the consumer is done with the slot.
        unsafe { *self.shared.frame.get() = Some(value) };
        self.shared.frame_ready.store(true, Ordering::Release);
    }

    /// Take the acknowledged value if `audio_done` is set.
    pub fn try_reclaim(&mut self) -> Option<T> {
        if !self.shared.audio_done.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: audio_done is set, so the consumer has finished writing.
        let value = unsafe { (*self.shared.returned.get()).take() };
        self.shared.audio_done.store(false, Ordering::Release);
        value
    }

    /// Spin until the consumer acknowledges, then take the returned value.
    pub fn wait_acknowledged(&mut self) -> T {
        loop {
            if let Some(value) = self.try_reclaim() {
                return value;
            }
            hint::spin_loop();
        }
    }

    pub fn frame_pending(&self) -> bool {
        self.shared.frame_ready.load(Ordering::Acquire)
    }
}

/// Audio-core endpoint
pub struct Consumer<T> {
    shared: Arc<SpscRendezvous<T>>,
}

impl<T> Consumer<T> {
    /// Take the published value if `frame_ready` is set.
    pub fn try_consume(&mut self) -> Option<T> {
        if !self.shared.frame_ready.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: frame_ready is set, so the publisher has finished writing.
        let value = unsafe { (*self.shared.frame.get()).take() };
        self.shared.frame_ready.store(false, Ordering::Release);
        value
    }

    /// Spin until a value is published.
    pub fn wait_frame(&mut self) -> T {
        loop {
            if let Some(value) = self.try_consume() {
                return value;
            }
            hint::spin_loop();
        }
    }

    /// Return `value` to the publisher and raise `audio_done`.
    ///
    /// Spins while the previous acknowledgement has not been reclaimed.
    pub fn acknowledge(&mut self, value: T) {
        while self.shared.audio_done.load(Ordering::Acquire) {
            hint::spin_loop();
        }
        // SAFETY: audio_done is clear, so the publisher is done with the slot.
        unsafe { *self.shared.returned.get() = Some(value) };
        self.shared.audio_done.store(true, Ordering::Release);
    }

    pub fn ack_pending(&self) -> bool {
        self.shared.audio_done.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_publish_consume_acknowledge() {
        let (mut tx, mut rx) = SpscRendezvous::new();
        assert!(rx.try_consume().is_none());
        assert!(tx.try_reclaim().is_none());

        tx.publish(vec![1u8, 2, 3]);
        assert!(tx.frame_pending());
        let got = rx.try_consume().unwrap();
        assert_eq!(got, vec![1, 2, 3]);
        assert!(!tx.frame_pending());

        rx.acknowledge(got);
        assert!(rx.ack_pending());
        assert_eq!(tx.try_reclaim(), Some(vec![1, 2, 3]));
        assert!(tx.try_reclaim().is_none());
    }

    #[test]
    fn test_cross_thread_order_and_contents() {
        const FRAMES: u32 = 2000;
        let (mut tx, mut rx) = SpscRendezvous::<Vec<u32>>::new();

        let consumer = thread::spawn(move || {
            let mut seen = 0;
            for expected in 0..FRAMES {
                let buf = rx.wait_frame();
                // Every element was written before the flag was raised.
                assert!(buf.iter().all(|&x| x == expected));
                seen += 1;
                rx.acknowledge(buf);
            }
            seen
        });

        let mut spare = Some(vec![0u32; 64]);
        for frame in 0..FRAMES {
            let mut buf = match spare.take() {
                Some(buf) => buf,
                None => tx.wait_acknowledged(),
            };
            buf.fill(frame);
            tx.publish(buf);
        }
        let _ = tx.wait_acknowledged();
        assert_eq!(consumer.join().unwrap(), FRAMES);
    }
}
