//! The control channel: one `AF_UNIX`/`SOCK_DGRAM` socket pair per
//! worker, used for exactly one thing — handing an accepted client
//! descriptor from the acceptor to its chosen worker as an `SCM_RIGHTS`
//! ancillary message.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{self, AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType};

use crate::error::{CacheError, CacheResult};

/// The one-byte payload carried alongside every `SCM_RIGHTS` datagram.
/// Its value is unused; the ancillary data is the entire contract.
const PAYLOAD: [u8; 1] = [0u8];

/// Create one control-channel socket pair. The acceptor keeps `parent`;
/// the forked worker keeps `child` (after closing its copy of `parent`).
pub fn channel_pair() -> CacheResult<(OwnedFd, OwnedFd)> {
    socket::socketpair(AddressFamily::Unix, SockType::Datagram, None, SockFlag::empty())
        .map_err(|e| CacheError::DescriptorTransfer { reason: format!("socketpair: {e}") })
}

/// Send `fd` to the peer on the other end of `channel` as an `SCM_RIGHTS`
/// ancillary message, then close `fd` in this process — the kernel
/// retains the underlying file description on the receiving side.
pub fn send_fd(channel: RawFd, fd: RawFd) -> CacheResult<()> {
    let iov = [std::io::IoSlice::new(&PAYLOAD)];
    let fds = [fd];
    let cmsg = [ControlMessage::ScmRights(&fds)];

    let result = socket::sendmsg::<()>(channel, &iov, &cmsg, MsgFlags::empty(), None);

    // The descriptor transfer is done (successfully or not) from this
    // process's point of view either way; drop our copy.
    let _ = nix::unistd::close(fd);

    result.map(|_| ()).map_err(|e| CacheError::DescriptorTransfer { reason: format!("sendmsg: {e}") })
}

/// Block waiting for one descriptor on `channel`. Validates that the
/// ancillary payload is exactly one `SCM_RIGHTS` descriptor, per the
/// wire contract in the design notes; anything else is treated as fatal
/// by the caller.
pub fn recv_fd(channel: RawFd) -> CacheResult<OwnedFd> {
    let mut payload = [0u8; 1];
    let mut iov = [std::io::IoSliceMut::new(&mut payload)];
    let mut cmsg_space = nix::cmsg_space!(RawFd);

    let msg = socket::recvmsg::<()>(channel, &mut iov, Some(&mut cmsg_space), MsgFlags::empty())
        .map_err(|e| CacheError::DescriptorTransfer { reason: format!("recvmsg: {e}") })?;

    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            if let Some(&fd) = fds.first() {
                // SAFETY: the kernel just handed us ownership of this descriptor.
                return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }

    Err(CacheError::DescriptorTransfer { reason: "message carried no SCM_RIGHTS descriptor".to_string() })
}
