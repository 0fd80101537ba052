//! Raw socket options not exposed by `std::net`.
//!
//! On non-unix targets every option reports `Unsupported` and callers treat
//! that as a non-fatal hint failure.

use std::io;
use std::net::{TcpListener, TcpStream};

use crate::endpoint::Direction;

#[cfg(unix)]
mod imp {
    use std::io;
    use std::os::fd::{AsRawFd, RawFd};

    use super::*;

    fn set_int_option(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
        // SAFETY: `value` lives for the duration of the call and its size is passed
        // alongside the pointer; `fd` is an open socket owned by the caller.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                (&value as *const libc::c_int).cast::<libc::c_void>(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn set_reuse_addr(stream: &TcpStream) -> io::Result<()> {
        set_int_option(stream.as_raw_fd(), libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
    }

    pub fn set_buffer_size(stream: &TcpStream, direction: Direction, bytes: usize) -> io::Result<()> {
        let value = libc::c_int::try_from(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "buffer size out of range"))?;
        let name = match direction {
            Direction::Rx => libc::SO_RCVBUF,
            Direction::Tx => libc::SO_SNDBUF,
        };
        set_int_option(stream.as_raw_fd(), libc::SOL_SOCKET, name, value)
    }

    pub fn peer_closed(stream: &TcpStream) -> bool {
        let mut byte = 0u8;
        // SAFETY: `byte` is a valid one-byte buffer; MSG_PEEK leaves the kernel
        // queue untouched and MSG_DONTWAIT keeps the call from blocking.
        let rc = unsafe {
            libc::recv(
                stream.as_raw_fd(),
                (&mut byte as *mut u8).cast::<libc::c_void>(),
                1,
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            )
        };
        match rc {
            0 => true,
            n if n > 0 => false,
            _ => {
                let err = io::Error::last_os_error();
                !matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                )
            }
        }
    }

    pub fn set_listen_backlog(listener: &TcpListener, backlog: u32) -> io::Result<()> {
        let backlog = libc::c_int::try_from(backlog).unwrap_or(libc::c_int::MAX);
        // SAFETY: calling listen(2) again on a listening socket only updates the
        // accept queue length.
        let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn is_fatal_accept_error(err: &io::Error) -> bool {
        matches!(
            err.raw_os_error(),
            Some(libc::EBADF) | Some(libc::EINVAL) | Some(libc::ENOTSOCK) | Some(libc::EOPNOTSUPP) | Some(libc::EFAULT)
        )
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;

    use super::*;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "socket option not supported on this platform")
    }

    pub fn set_reuse_addr(_stream: &TcpStream) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn set_buffer_size(_stream: &TcpStream, _direction: Direction, _bytes: usize) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn peer_closed(_stream: &TcpStream) -> bool {
        false
    }

    pub fn set_listen_backlog(_listener: &TcpListener, _backlog: u32) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn is_fatal_accept_error(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::InvalidInput
    }
}

/// Enable `SO_REUSEADDR` on a connected socket.
pub fn set_reuse_addr(stream: &TcpStream) -> io::Result<()> {
    imp::set_reuse_addr(stream)
}

/// Apply `SO_RCVBUF` or `SO_SNDBUF`.
pub fn set_buffer_size(stream: &TcpStream, direction: Direction, bytes: usize) -> io::Result<()> {
    imp::set_buffer_size(stream, direction, bytes)
}

/// Non-blocking end-of-stream probe.
///
/// Peeks one byte without consuming it. Does not touch any user-space read
/// buffer, so it never contends with a reader blocked on the same socket.
pub fn peer_closed(stream: &TcpStream) -> bool {
    imp::peer_closed(stream)
}

/// Re-issue `listen(2)` with an explicit accept queue length.
pub fn set_listen_backlog(listener: &TcpListener, backlog: u32) -> io::Result<()> {
    imp::set_listen_backlog(listener, backlog)
}

/// Accept errors that mean the listening descriptor itself is unusable.
pub fn is_fatal_accept_error(err: &io::Error) -> bool {
    imp::is_fatal_accept_error(err)
}
