use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::time::Duration;

use async_trait::async_trait;
use bluer::Address;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::{debug, info};

use super::FrameSink;

// Bluetooth socket constants (from Linux kernel headers)
const AF_BLUETOOTH: libc::c_int = 31;
const BTPROTO_RFCOMM: libc::c_int = 3;

/// sockaddr_rc — RFCOMM socket address (from <bluetooth/rfcomm.h>)
#[repr(C)]
struct SockaddrRc {
    rc_family: u16,
    rc_bdaddr: [u8; 6], // Bluetooth address in little-endian
    rc_channel: u8,
}

/// Write-only RFCOMM stream to the earbuds.
pub struct RfcommSink {
    stream: UnixStream,
}

impl RfcommSink {
    /// Open an RFCOMM stream on `channel`.
    ///
    /// The connect is blocking so the DLC handshake completes before the
    /// first write; `timeout` bounds both the connect and later writes.
    pub async fn connect(address: Address, channel: u8, timeout: Duration) -> io::Result<Self> {
        debug!("Connecting to {} on RFCOMM channel {}", address, channel);

        let fd = tokio::task::spawn_blocking(move || blocking_connect(address, channel, timeout))
            .await
            .map_err(io::Error::other)??;

        let std_stream = std::os::unix::net::UnixStream::from(fd);
        std_stream.set_nonblocking(true)?;
        let stream = UnixStream::from_std(std_stream)?;

        info!("Connected to {} on RFCOMM channel {}", address, channel);
        Ok(Self { stream })
    }
}

fn blocking_connect(address: Address, channel: u8, timeout: Duration) -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2); ownership of the fd moves into OwnedFd right away.
    let fd = unsafe {
        let raw = libc::socket(AF_BLUETOOTH, libc::SOCK_STREAM, BTPROTO_RFCOMM);
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        OwnedFd::from_raw_fd(raw)
    };

    set_timeout(&fd, libc::SO_SNDTIMEO, timeout)?;
    set_timeout(&fd, libc::SO_RCVTIMEO, timeout)?;

    let mut rc_bdaddr = address.0;
    rc_bdaddr.reverse(); // BlueZ expects little-endian
    let addr = SockaddrRc {
        rc_family: AF_BLUETOOTH as u16,
        rc_bdaddr,
        rc_channel: channel,
    };

    // SAFETY: addr is a valid sockaddr_rc for the lifetime of the call.
    let ret = unsafe {
        libc::connect(
            raw_fd(&fd),
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn set_timeout(fd: &OwnedFd, option: libc::c_int, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    // SAFETY: tv outlives the call and the length matches its type.
    let ret = unsafe {
        libc::setsockopt(
            raw_fd(fd),
            libc::SOL_SOCKET,
            option,
            &tv as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn raw_fd(fd: &OwnedFd) -> libc::c_int {
    use std::os::fd::AsRawFd;
    fd.as_raw_fd()
}

#[async_trait]
impl FrameSink for RfcommSink {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("RFCOMM shutdown: {}", e);
        }
    }
}
