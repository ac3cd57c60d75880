use std::os::fd::RawFd;
use std::os::raw::c_void;
use std::ptr::NonNull;

use vchan_sys::{
    libvchan_buffer_space, libvchan_client_init, libvchan_close, libvchan_data_ready,
    libvchan_fd_for_select, libvchan_is_open, libvchan_recv, libvchan_send,
    libvchan_server_init, libvchan_t, libvchan_wait,
};

use crate::{VchanConnection, VchanError};

/// Real vchan connection, backed by `libvchan_t`.
///
/// `ctrl` is `None` once [`close`](VchanConnection::close) has run, so a
/// caller-issued `close()` followed by the `Drop` impl's own call only ever
/// invokes `libvchan_close` once per connection.
pub struct SysVchan {
    ctrl: Option<NonNull<libvchan_t>>,
}

// `libvchan_t *` is only ever touched from the thread that owns this value;
// the mediator's scheduler never shares a `SysVchan` across threads.
unsafe impl Send for SysVchan {}

impl SysVchan {
    /// Connect as the vchan client to `domain:port` (execute-and-wait /
    /// execute-and-detach modes).
    pub fn client_init(domain: i32, port: i32) -> Result<Self, VchanError> {
        // SAFETY: `libvchan_client_init` is documented to return either a
        // valid `libvchan_t*` or NULL.
        let ctrl = unsafe { libvchan_client_init(domain, port) };
        NonNull::new(ctrl)
            .map(|ctrl| Self { ctrl: Some(ctrl) })
            .ok_or(VchanError::ConnectFailed)
    }

    /// Create the vchan server and await a peer on `domain:port`
    /// (service-connect mode). `ring_size` must be a power of two.
    pub fn server_init(domain: i32, port: i32, ring_size: usize) -> Result<Self, VchanError> {
        if ring_size == 0 || !ring_size.is_power_of_two() {
            return Err(VchanError::RingSizeNotPowerOfTwo(ring_size));
        }
        // SAFETY: same contract as `client_init`.
        let ctrl = unsafe { libvchan_server_init(domain, port, ring_size, ring_size) };
        let mut conn = NonNull::new(ctrl)
            .map(|ctrl| Self { ctrl: Some(ctrl) })
            .ok_or(VchanError::ConnectFailed)?;
        // Block until the peer actually connects, as the original agent does
        // immediately after `libvchan_server_init`.
        conn.wait()?;
        Ok(conn)
    }

    /// The live handle, or `ConnectFailed` if this connection has already
    /// been [`close`](VchanConnection::close)d.
    fn ctrl(&self) -> Result<NonNull<libvchan_t>, VchanError> {
        self.ctrl.ok_or(VchanError::ConnectFailed)
    }
}

impl VchanConnection for SysVchan {
    fn send(&mut self, buf: &[u8]) -> Result<usize, VchanError> {
        let ctrl = self.ctrl()?;
        // SAFETY: `ctrl` is a valid, live handle; `buf` outlives the call.
        let rc = unsafe { libvchan_send(ctrl.as_ptr(), buf.as_ptr().cast::<c_void>(), buf.len()) };
        if rc < 0 {
            return Err(VchanError::SendFailed);
        }
        Ok(rc as usize)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, VchanError> {
        let ctrl = self.ctrl()?;
        // SAFETY: `ctrl` is a valid, live handle; `buf` outlives the call.
        let rc = unsafe {
            libvchan_recv(ctrl.as_ptr(), buf.as_mut_ptr().cast::<c_void>(), buf.len())
        };
        if rc < 0 {
            return Err(VchanError::RecvFailed);
        }
        Ok(rc as usize)
    }

    fn data_ready(&self) -> usize {
        let Some(ctrl) = self.ctrl else { return 0 };
        // SAFETY: `ctrl` is a valid, live handle.
        let n = unsafe { libvchan_data_ready(ctrl.as_ptr()) };
        n.max(0) as usize
    }

    fn buffer_space(&self) -> usize {
        let Some(ctrl) = self.ctrl else { return 0 };
        // SAFETY: `ctrl` is a valid, live handle.
        let n = unsafe { libvchan_buffer_space(ctrl.as_ptr()) };
        n.max(0) as usize
    }

    fn is_open(&self) -> bool {
        let Some(ctrl) = self.ctrl else { return false };
        // SAFETY: `ctrl` is a valid, live handle.
        unsafe { libvchan_is_open(ctrl.as_ptr()) != 0 }
    }

    fn event_fd(&self) -> RawFd {
        let Some(ctrl) = self.ctrl else { return -1 };
        // SAFETY: `ctrl` is a valid, live handle.
        unsafe { libvchan_fd_for_select(ctrl.as_ptr()) }
    }

    fn wait(&mut self) -> Result<(), VchanError> {
        let ctrl = self.ctrl()?;
        // SAFETY: `ctrl` is a valid, live handle.
        let rc = unsafe { libvchan_wait(ctrl.as_ptr()) };
        if rc < 0 {
            return Err(VchanError::WaitFailed);
        }
        Ok(())
    }

    /// Idempotent: closes the underlying handle at most once, even though
    /// every dispatcher mode calls this explicitly and `Drop` also calls it.
    fn close(&mut self) {
        if let Some(ctrl) = self.ctrl.take() {
            // SAFETY: `ctrl` was a valid, live handle and is now removed from
            // `self`, so no other call path can reach it again.
            unsafe { libvchan_close(ctrl.as_ptr()) };
        }
    }
}

impl Drop for SysVchan {
    fn drop(&mut self) {
        self.close();
    }
}
