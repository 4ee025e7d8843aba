//! Socket front ends.
//!
//! - [`InputServer`]: datagram socket producers write records to.
//! - [`ControlServer`]: sequenced-packet socket; each accepted client
//!   gets a [`ServiceController`] thread.

use crate::collector::LogCollector;
use crate::error::LogError;
use crate::log_entry::MAX_LOG_LEN;
use crate::service::{Connection, Received, ServiceContext, ServiceController};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{
    self, AddressFamily, Backlog, MsgFlags, SockFlag, SockType, UnixAddr, setsockopt, sockopt,
};
use nix::sys::time::{TimeVal, TimeValLike};
use std::fs;
use std::io;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const SERVER_POLL_MS: u16 = 100;

/// How often blocking socket calls come back to check the stop flag.
pub const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(SERVER_POLL_MS as u64);

const CONTROL_BACKLOG: i32 = 16;

/// Create the parent directory, remove a stale socket file and make the
/// new one writable by everyone.
fn prepare_socket_path(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let _ = fs::remove_file(path);
    Ok(())
}

fn open_to_all(path: &Path) {
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o666)) {
        log::warn!("Failed to chmod {}: {}", path.display(), e);
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

pub struct InputServer {
    sock: UnixDatagram,
    path: PathBuf,
}

impl InputServer {
    pub fn bind(path: &Path) -> io::Result<Self> {
        prepare_socket_path(path)?;
        let sock = UnixDatagram::bind(path)?;
        sock.set_read_timeout(Some(SERVER_POLL_INTERVAL))?;
        open_to_all(path);
        Ok(InputServer {
            sock,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feed every received datagram to `collector` until `stop` is set.
    pub fn run(&self, collector: &LogCollector, stop: &AtomicBool) {
        log::info!("Listening for records on {}", self.path.display());
        let mut buf = vec![0u8; MAX_LOG_LEN + 1];
        while !stop.load(Ordering::Acquire) {
            match self.sock.recv(&mut buf) {
                Ok(len) => {
                    collector.on_datagram(&buf[..len]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    log::error!("Input socket recv error: {}", e);
                    thread::sleep(SERVER_POLL_INTERVAL);
                }
            }
        }
        log::debug!("Input server stopped");
    }
}

impl Drop for InputServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// One accepted control-socket client.
pub struct SeqPacketConnection {
    fd: OwnedFd,
}

impl SeqPacketConnection {
    pub fn new(fd: OwnedFd) -> Result<Self, LogError> {
        let timeout = TimeVal::milliseconds(SERVER_POLL_INTERVAL.as_millis() as i64);
        setsockopt(&fd, sockopt::ReceiveTimeout, &timeout).map_err(|e| {
            log::error!("Failed to set session receive timeout: {}", e);
            LogError::Failed
        })?;
        Ok(SeqPacketConnection { fd })
    }
}

impl Connection for SeqPacketConnection {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Received, LogError> {
        match socket::recv(self.fd.as_raw_fd(), buf, MsgFlags::empty()) {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => Ok(Received::Data(n)),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(Received::Timeout),
            Err(e) => {
                log::debug!("Session recv failed: {}", e);
                Ok(Received::Closed)
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LogError> {
        socket::send(self.fd.as_raw_fd(), data, MsgFlags::MSG_NOSIGNAL)
            .map(|_| ())
            .map_err(|e| {
                log::debug!("Session send failed: {}", e);
                LogError::Failed
            })
    }
}

pub struct ControlServer {
    fd: OwnedFd,
    path: PathBuf,
}

impl ControlServer {
    pub fn bind(path: &Path) -> io::Result<Self> {
        prepare_socket_path(path)?;
        let fd = socket::socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?;
        let addr = UnixAddr::new(path)?;
        socket::bind(fd.as_raw_fd(), &addr)?;
        socket::listen(&fd, Backlog::new(CONTROL_BACKLOG)?)?;
        open_to_all(path);
        Ok(ControlServer {
            fd,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept sessions until `stop` is set, then wait for them to end.
    ///
    /// A failing `poll` ends the loop; a failing `accept` only drops
    /// that connection attempt.
    pub fn run(&self, ctx: Arc<ServiceContext>, stop: Arc<AtomicBool>) {
        log::info!("Listening for control requests on {}", self.path.display());
        let mut sessions: Vec<thread::JoinHandle<()>> = Vec::new();
        let timeout = PollTimeout::from(SERVER_POLL_MS);

        while !stop.load(Ordering::Acquire) {
            let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, timeout) {
                Ok(0) => {
                    sessions.retain(|h| !h.is_finished());
                    continue;
                }
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    log::error!("Control socket poll failed, stopping: {}", e);
                    break;
                }
            }

            let conn = match socket::accept(self.fd.as_raw_fd()) {
                // SAFETY: accept returned a fresh descriptor we now own.
                Ok(raw) => unsafe { OwnedFd::from_raw_fd(raw) },
                Err(e) => {
                    log::warn!("Control socket accept failed: {}", e);
                    continue;
                }
            };
            let conn = match SeqPacketConnection::new(conn) {
                Ok(c) => c,
                Err(_) => continue,
            };

            let ctx = Arc::clone(&ctx);
            let session_stop = Arc::clone(&stop);
            match thread::Builder::new()
                .name("hilog-session".into())
                .spawn(move || ServiceController::new(conn, ctx, session_stop).communication_loop())
            {
                Ok(h) => sessions.push(h),
                Err(e) => log::error!("Failed to spawn session thread: {}", e),
            }
        }

        for h in sessions {
            let _ = h.join();
        }
        log::debug!("Control server stopped");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Connect to a control socket.  Used by clients and tests.
pub fn connect_control(path: &Path) -> Result<SeqPacketConnection, LogError> {
    let fd = socket::socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|_| LogError::Failed)?;
    let addr = UnixAddr::new(path).map_err(|_| LogError::Failed)?;
    socket::connect(fd.as_raw_fd(), &addr).map_err(|e| {
        log::debug!("Failed to connect to {}: {}", path.display(), e);
        LogError::Failed
    })?;
    SeqPacketConnection::new(fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LogBuffer;
    use crate::filter::QueryCondition;
    use crate::flow_control::FlowControl;
    use crate::log_entry::{LogEntry, LogLevel, LogType};
    use crate::persist::PersistRegistry;
    use crate::properties::{MemoryPropertyStore, Properties};
    use crate::protocol::control::{ControlMessage, MAX_MSG_LEN};
    use crate::protocol::record;
    use std::time::Instant;

    fn props() -> Arc<Properties> {
        Arc::new(Properties::new(Arc::new(MemoryPropertyStore::new())))
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_input_server_feeds_collector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock").join("hilogInput");
        let server = InputServer::bind(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);

        let buffer = Arc::new(LogBuffer::new());
        let collector = LogCollector::new(
            Arc::clone(&buffer),
            Arc::new(FlowControl::default()),
            props(),
        );
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || server.run(&collector, &stop))
        };

        let client = UnixDatagram::unbound().unwrap();
        let entry = LogEntry::new(LogType::Core, LogLevel::Info, 0xD001100, "Net", "up");
        client.send_to(&record::encode(&entry), &path).unwrap();
        client.send_to(b"garbage", &path).unwrap();

        assert!(wait_for(|| buffer.size_by_type(LogType::Core) == entry.len()));
        stop.store(true, Ordering::Release);
        handle.join().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_control_server_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hilogControl");
        let server = ControlServer::bind(&path).unwrap();

        let buffer = Arc::new(LogBuffer::new());
        buffer.insert(LogEntry::new(LogType::App, LogLevel::Warn, 0xD000F00, "T", "hello"));
        let ctx = Arc::new(ServiceContext {
            buffer: Arc::clone(&buffer),
            persist: Arc::new(PersistRegistry::new(dir.path(), Arc::clone(&buffer))),
            props: props(),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || server.run(ctx, stop))
        };

        let mut client = connect_control(&path).unwrap();
        let recv = |client: &mut SeqPacketConnection| {
            let mut buf = vec![0u8; MAX_MSG_LEN];
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                match client.recv(&mut buf).unwrap() {
                    Received::Data(n) => return ControlMessage::decode(&buf[..n]).unwrap(),
                    Received::Timeout if Instant::now() < deadline => continue,
                    other => panic!("no reply: {:?}", other),
                }
            }
        };

        let req = ControlMessage::NextRequest(QueryCondition::all());
        client.send(&req.encode().unwrap()).unwrap();
        match recv(&mut client) {
            ControlMessage::NextResponse(r) => assert_eq!(r.entry.unwrap().content, "hello"),
            other => panic!("unexpected {:?}", other),
        }

        let req = ControlMessage::LogClearRequest { types: 0 };
        client.send(&req.encode().unwrap()).unwrap();
        assert_eq!(
            recv(&mut client),
            ControlMessage::LogClearResponse { result: 0 }
        );
        assert_eq!(buffer.total_size(), 0);

        drop(client);
        stop.store(true, Ordering::Release);
        handle.join().unwrap();
    }
}
