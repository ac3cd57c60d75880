use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use nix::unistd;

use crate::{VchanConnection, VchanError};

/// In-process test double for [`VchanConnection`], built from a pair of
/// pipes. `LoopbackVchan::pair` returns the two ends of one logical
/// connection; writes on one side become readable, ring-accounted, on the
/// other.
pub struct LoopbackVchan {
    read_fd: OwnedFd,
    write_fd: OwnedFd,
    /// Bytes written on this side, not yet drained by the peer's `recv`.
    outstanding_out: Arc<AtomicUsize>,
    /// Bytes the peer has written, not yet drained by our `recv`.
    outstanding_in: Arc<AtomicUsize>,
    ring_size: usize,
    open: Arc<AtomicBool>,
}

impl LoopbackVchan {
    /// Build a connected pair sharing `ring_size` bytes of ring space per
    /// direction. `ring_size` must be a power of two, mirroring the real
    /// vchan constraint.
    pub fn pair(ring_size: usize) -> Result<(Self, Self), VchanError> {
        if ring_size == 0 || !ring_size.is_power_of_two() {
            return Err(VchanError::RingSizeNotPowerOfTwo(ring_size));
        }

        let (a_read, b_write) = unistd::pipe()?;
        let (b_read, a_write) = unistd::pipe()?;

        let a_to_b = Arc::new(AtomicUsize::new(0));
        let b_to_a = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicBool::new(true));

        let a = LoopbackVchan {
            read_fd: b_read,
            write_fd: a_write,
            outstanding_out: Arc::clone(&a_to_b),
            outstanding_in: Arc::clone(&b_to_a),
            ring_size,
            open: Arc::clone(&open),
        };
        let b = LoopbackVchan {
            read_fd: a_read,
            write_fd: b_write,
            outstanding_out: b_to_a,
            outstanding_in: a_to_b,
            ring_size,
            open,
        };
        Ok((a, b))
    }
}

impl VchanConnection for LoopbackVchan {
    fn send(&mut self, buf: &[u8]) -> Result<usize, VchanError> {
        if buf.len() > self.buffer_space() {
            return Err(VchanError::SendFailed);
        }
        let n = unistd::write(&self.write_fd, buf)?;
        self.outstanding_out.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, VchanError> {
        let n = unistd::read(self.read_fd.as_raw_fd(), buf)?;
        if n == 0 {
            self.open.store(false, Ordering::SeqCst);
        } else {
            // Saturating: a peer that closed after writing may leave the
            // counter slightly stale, which only ever makes us report less
            // ring space than truly free — safe by construction.
            self.outstanding_in.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |v| Some(v.saturating_sub(n)),
            ).ok();
        }
        Ok(n)
    }

    fn data_ready(&self) -> usize {
        self.outstanding_in.load(Ordering::SeqCst)
    }

    fn buffer_space(&self) -> usize {
        self.ring_size
            .saturating_sub(self.outstanding_out.load(Ordering::SeqCst))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn event_fd(&self) -> RawFd {
        self.read_fd.as_raw_fd()
    }

    fn wait(&mut self) -> Result<(), VchanError> {
        Ok(())
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_bytes_between_ends() {
        let (mut a, mut b) = LoopbackVchan::pair(4096).unwrap();
        assert_eq!(a.send(b"hello").unwrap(), 5);
        assert_eq!(b.data_ready(), 5);

        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(b.data_ready(), 0);
    }

    #[test]
    fn buffer_space_is_ring_bounded() {
        let (mut a, _b) = LoopbackVchan::pair(8).unwrap();
        assert_eq!(a.buffer_space(), 8);
        assert_eq!(a.send(&[0u8; 8]).unwrap(), 8);
        assert_eq!(a.buffer_space(), 0);
        assert!(a.send(&[0u8; 1]).is_err());
    }

    #[test]
    fn recv_zero_marks_closed() {
        let (mut a, mut b) = LoopbackVchan::pair(4096).unwrap();
        drop(a.write_fd_for_test());
        let mut buf = [0u8; 16];
        assert_eq!(b.recv(&mut buf).unwrap(), 0);
        assert!(!b.is_open());
        drop(a);
    }

    impl LoopbackVchan {
        /// Test-only accessor so `recv_zero_marks_closed` can force an EOF
        /// by dropping the write end directly.
        fn write_fd_for_test(&mut self) -> OwnedFd {
            std::mem::replace(&mut self.write_fd, unistd::pipe().unwrap().1)
        }
    }

    #[test]
    fn rejects_non_power_of_two_ring() {
        assert!(LoopbackVchan::pair(100).is_err());
    }
}
