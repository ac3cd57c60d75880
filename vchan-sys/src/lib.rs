//! Low-level FFI bindings to `libvchan`.
//!
//! This crate provides raw, unsafe bindings to the Xen/Qubes vchan library.
//! For a safe, idiomatic Rust API, use the [`vchan`](../vchan/index.html) crate.

use std::os::raw::{c_int, c_void};

/// Opaque handle to a vchan connection (`libvchan_t *`).
#[repr(C)]
pub struct libvchan {
    _private: [u8; 0],
}

pub type libvchan_t = libvchan;

unsafe extern "C" {
    pub fn libvchan_server_init(
        domain: c_int,
        port: c_int,
        read_min: usize,
        write_min: usize,
    ) -> *mut libvchan_t;

    pub fn libvchan_client_init(domain: c_int, port: c_int) -> *mut libvchan_t;

    pub fn libvchan_wait(ctrl: *mut libvchan_t) -> c_int;

    pub fn libvchan_close(ctrl: *mut libvchan_t);

    pub fn libvchan_fd_for_select(ctrl: *mut libvchan_t) -> c_int;

    pub fn libvchan_is_open(ctrl: *mut libvchan_t) -> c_int;

    pub fn libvchan_data_ready(ctrl: *mut libvchan_t) -> c_int;

    pub fn libvchan_buffer_space(ctrl: *mut libvchan_t) -> c_int;

    pub fn libvchan_send(ctrl: *mut libvchan_t, data: *const c_void, size: usize) -> c_int;

    pub fn libvchan_recv(ctrl: *mut libvchan_t, data: *mut c_void, size: usize) -> c_int;
}
