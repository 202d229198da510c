//! Re-chunks the capture byte stream into fixed-size PCM frames.
//!
//! Capture shims deliver blocks of whatever size the platform hands out; the
//! broadcast path needs exact `bytes_per_chunk` frames. The framer carries at
//! most one partially-filled frame between pushes, so its internal buffer
//! stays under twice the frame size.

pub struct Framer {
    chunk_size: usize,
    carry: Vec<u8>,
}

impl Framer {
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            chunk_size,
            carry: Vec::with_capacity(chunk_size * 2),
        }
    }

    /// Feed captured bytes, returning every complete frame now available, in
    /// order and without loss.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.carry.extend_from_slice(bytes);

        let complete = self.carry.len() / self.chunk_size;
        let mut frames = Vec::with_capacity(complete);
        for _ in 0..complete {
            let rest = self.carry.split_off(self.chunk_size);
            frames.push(std::mem::replace(&mut self.carry, rest));
        }
        frames
    }

    /// Emit the trailing partial frame at end of stream, if any.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.carry.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.carry))
        }
    }

    /// Bytes currently carried between pushes.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(framer: &mut Framer, input: &[u8], step: usize) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for block in input.chunks(step) {
            frames.extend(framer.push(block));
        }
        frames
    }

    #[test]
    fn exact_multiples_pass_through() {
        let mut framer = Framer::new(4);
        let frames = framer.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.flush(), None);
    }

    #[test]
    fn split_input_reassembles_losslessly() {
        let input: Vec<u8> = (0..=255).collect();
        for step in [1, 3, 4, 7, 64, 256] {
            let mut framer = Framer::new(16);
            let frames = feed(&mut framer, &input, step);
            let total: usize = frames.iter().map(Vec::len).sum();
            assert_eq!(total, 256, "step {step}");
            assert!(frames.iter().all(|f| f.len() == 16));
            let rejoined: Vec<u8> = frames.into_iter().flatten().collect();
            assert_eq!(rejoined, input);
        }
    }

    #[test]
    fn emitted_byte_count_is_floor_of_input() {
        for len in [0usize, 1, 15, 16, 17, 100, 1023] {
            let input = vec![0xaa; len];
            let mut framer = Framer::new(16);
            let frames = framer.push(&input);
            let emitted: usize = frames.iter().map(Vec::len).sum();
            assert_eq!(emitted, (len / 16) * 16, "len {len}");
        }
    }

    #[test]
    fn trailing_partial_is_flushed_as_is() {
        let mut framer = Framer::new(8);
        let frames = framer.push(&[9; 11]);
        assert_eq!(frames.len(), 1);
        assert_eq!(framer.flush(), Some(vec![9; 3]));
        assert_eq!(framer.flush(), None);
    }

    #[test]
    fn carry_stays_bounded() {
        let mut framer = Framer::new(10);
        for _ in 0..100 {
            framer.push(&[0; 7]);
            assert!(framer.pending() < 10, "pending {}", framer.pending());
        }
    }
}
