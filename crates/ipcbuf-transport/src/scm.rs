//! `sendmsg(2)`/`recvmsg(2)` with one `SCM_RIGHTS` descriptor.

use std::io::{self, IoSlice};
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use tracing::warn;

/// Control buffer with room for one descriptor on every supported platform.
/// `u64` elements keep it aligned for `cmsghdr`.
type ControlBuf = [u64; 4];

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

/// One non-blocking scatter-gather send, optionally carrying `handle`.
///
/// The kernel duplicates `handle` into the peer when at least one byte is
/// accepted; the caller still owns (and must close) its copy.
pub(crate) fn send_with_handle(
    sock: BorrowedFd<'_>,
    bufs: &[IoSlice<'_>],
    handle: Option<BorrowedFd<'_>>,
) -> io::Result<usize> {
    let mut control: ControlBuf = [0; 4];

    // SAFETY: an all-zero `msghdr` is a valid empty message header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    // `IoSlice` is ABI-compatible with `iovec` on Unix; sendmsg only reads through it.
    msg.msg_iov = bufs.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = bufs.len() as _;

    if let Some(handle) = handle {
        let fd_len = mem::size_of::<libc::c_int>() as libc::c_uint;
        // SAFETY: `control` is zeroed, aligned for `cmsghdr` and larger than
        // CMSG_SPACE(fd_len), so CMSG_FIRSTHDR yields a non-null header inside it
        // and CMSG_DATA has room for exactly one descriptor.
        unsafe {
            msg.msg_control = control.as_mut_ptr().cast();
            msg.msg_controllen = libc::CMSG_SPACE(fd_len) as _;
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(fd_len) as _;
            std::ptr::write_unaligned(
                libc::CMSG_DATA(cmsg).cast::<libc::c_int>(),
                handle.as_raw_fd(),
            );
        }
    }

    // SAFETY: `msg` points at live iovecs and, if set, an initialized control
    // buffer; both outlive the call.
    let sent = unsafe { libc::sendmsg(sock.as_raw_fd(), &msg, SEND_FLAGS) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

/// One receive into `buf`, collecting at most one passed descriptor.
///
/// Extra descriptors in the same control message are closed.
pub(crate) fn recv_with_handle(
    sock: BorrowedFd<'_>,
    buf: &mut [u8],
) -> io::Result<(usize, Option<OwnedFd>)> {
    let mut control: ControlBuf = [0; 4];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    // SAFETY: an all-zero `msghdr` is a valid empty message header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = mem::size_of::<ControlBuf>() as _;

    // SAFETY: `iov` covers `buf` exactly and `control` is sized as advertised;
    // both outlive the call.
    let received = unsafe { libc::recvmsg(sock.as_raw_fd(), &mut msg, RECV_FLAGS) };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }
    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        warn!("control data truncated on receive; descriptors may have been lost");
    }

    let mut handle = None;
    // SAFETY: the kernel filled `msg_control` up to `msg_controllen`; the CMSG
    // walkers never step outside that region, and every SCM_RIGHTS entry is a
    // freshly installed descriptor that this process now owns.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
                let payload = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                for i in 0..payload / mem::size_of::<libc::c_int>() {
                    let fd = OwnedFd::from_raw_fd(std::ptr::read_unaligned(data.add(i)));
                    if handle.is_none() {
                        handle = Some(fd);
                    } else {
                        warn!("closing unexpected extra descriptor");
                        drop(fd);
                    }
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok((received as usize, handle))
}
