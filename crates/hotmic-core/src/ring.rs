//! Lock-free single-producer/single-consumer float ring buffer.
//!
//! Wraps [`rtrb`] with the narrower API the audio engine actually needs:
//! bulk `write`/`read`, an explicit `skip` for back-pressure trimming, and
//! `available_read`/`available_write` for capacity bookkeeping. Capacity is
//! rounded up to the next power of two so readers can reason about headroom
//! in terms of simple fractions (`3/4`, `1/2`) without a modulo.

use rtrb::RingBuffer;

/// Producer half of a [`FloatRing`]. Owned by a single writer thread.
pub struct FloatRingProducer {
    inner: rtrb::Producer<f32>,
    capacity: usize,
}

/// Consumer half of a [`FloatRing`]. Owned by a single reader thread.
pub struct FloatRingConsumer {
    inner: rtrb::Consumer<f32>,
    capacity: usize,
}

fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Creates a producer/consumer pair backed by a ring of at least `capacity`
/// slots (rounded up to the next power of two).
pub fn float_ring(capacity: usize) -> (FloatRingProducer, FloatRingConsumer) {
    let capacity = next_power_of_two(capacity);
    let (producer, consumer) = RingBuffer::<f32>::new(capacity);
    (
        FloatRingProducer { inner: producer, capacity },
        FloatRingConsumer { inner: consumer, capacity },
    )
}

impl FloatRingProducer {
    /// Writes as many samples from `samples` as fit, returning the count
    /// actually written. The caller is responsible for counting any
    /// remainder as dropped.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let mut written = 0;
        for &s in samples {
            if self.inner.push(s).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// Number of slots currently free for writing.
    pub fn available_write(&self) -> usize {
        self.inner.slots()
    }

    /// Total ring capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl FloatRingConsumer {
    /// Reads as many samples into `out` as are available, returning the
    /// count actually read. Remaining slots in `out` are left untouched.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let mut read = 0;
        for slot in out.iter_mut() {
            match self.inner.pop() {
                Ok(s) => {
                    *slot = s;
                    read += 1;
                }
                Err(_) => break,
            }
        }
        read
    }

    /// Discards up to `count` samples without copying them anywhere.
    /// Returns the number of samples actually discarded.
    pub fn skip(&mut self, count: usize) -> usize {
        let mut skipped = 0;
        while skipped < count && self.inner.pop().is_ok() {
            skipped += 1;
        }
        skipped
    }

    /// Number of samples currently available to read.
    pub fn available_read(&self) -> usize {
        self.inner.slots()
    }

    /// Total ring capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drains the ring completely, discarding its contents.
    pub fn clear(&mut self) {
        while self.inner.pop().is_ok() {}
    }
}
