//! Dedicated OS thread that multiplexes the voice UDP socket's read side to
//! registered callbacks.
//!
//! Grounded on `SocketReader` in `voice_state.py`: the same three-level
//! running/end/idle-pause state machine, the same "auto-resume on first
//! registration, auto-idle on last removal" behaviour. `select()` there
//! becomes a 30-second read timeout on the cloned socket here, since `mio`
//! would be the only way to get portable readiness polling and the teacher
//! pack never reaches for it for a single socket.

use parking_lot::Mutex;
use std::{
    io::ErrorKind,
    net::UdpSocket,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};
use tracing::debug;

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_BUF_LEN: usize = 2048;

/// Handle returned by [`SocketReader::register`], needed to
/// [`SocketReader::unregister`] the same callback later.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CallbackId(u64);

type Callback = Box<dyn Fn(&[u8]) + Send + Sync>;

struct Shared {
    callbacks: Mutex<Vec<(CallbackId, Callback)>>,
    next_id: AtomicU64,
    running: AtomicBool,
    idle_paused: AtomicBool,
    end: AtomicBool,
}

/// Reads a UDP socket on a dedicated OS thread and fans each datagram out to
/// every registered callback.
pub struct SocketReader {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl SocketReader {
    /// Spawns the reader thread. Starts idle-paused: nothing is read until
    /// the first callback is [`SocketReader::register`]ed.
    pub fn spawn(socket: UdpSocket) -> std::io::Result<Self> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        let shared = Arc::new(Shared {
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            running: AtomicBool::new(false),
            idle_paused: AtomicBool::new(true),
            end: AtomicBool::new(false),
        });

        let thread = {
            let shared = shared.clone();
            std::thread::spawn(move || run(&socket, &shared))
        };

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Registers a callback invoked with every datagram received. Resumes
    /// the reader if it was idle-paused.
    pub fn register(&self, callback: Callback) -> CallbackId {
        let id = CallbackId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.callbacks.lock().push((id, callback));

        if self.shared.idle_paused.swap(false, Ordering::AcqRel) {
            self.shared.running.store(true, Ordering::Release);
        }
        id
    }

    /// Removes a previously registered callback. Idle-pauses the reader if
    /// this was the last one.
    pub fn unregister(&self, id: CallbackId) {
        let mut callbacks = self.shared.callbacks.lock();
        callbacks.retain(|(cid, _)| *cid != id);

        if callbacks.is_empty() && self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.idle_paused.store(true, Ordering::Release);
        }
    }

    /// Explicitly pauses reading without clearing registered callbacks.
    pub fn pause(&self) {
        self.shared.idle_paused.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
    }

    /// Resumes reading. `force` resumes even with no callbacks registered
    /// (matching the teacher's `resume(force=True)` call on socket
    /// recreation, ahead of any callback being registered).
    pub fn resume(&self, force: bool) {
        if self.shared.running.load(Ordering::Acquire) {
            return;
        }
        if !force && self.shared.callbacks.lock().is_empty() {
            self.shared.idle_paused.store(true, Ordering::Release);
            return;
        }
        self.shared.idle_paused.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
    }
}

impl Drop for SocketReader {
    fn drop(&mut self) {
        self.shared.end.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(socket: &UdpSocket, shared: &Shared) {
    let mut buf = [0u8; RECV_BUF_LEN];

    while !shared.end.load(Ordering::Acquire) {
        if !shared.running.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        }

        match socket.recv(&mut buf) {
            Ok(n) => {
                for (_, callback) in shared.callbacks.lock().iter() {
                    callback(&buf[..n]);
                }
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                debug!(error = %e, "error reading from voice socket, this is usually safe to ignore");
                continue;
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    fn socket_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.connect(b.local_addr().unwrap()).unwrap();
        b.connect(a.local_addr().unwrap()).unwrap();
        (a, b)
    }

    #[test]
    fn delivers_datagrams_once_a_callback_is_registered() {
        let (tx_socket, rx_socket) = socket_pair();
        let reader = SocketReader::spawn(rx_socket).unwrap();

        let (tx, rx) = mpsc::channel();
        reader.register(Box::new(move |data: &[u8]| {
            let _ = tx.send(data.to_vec());
        }));

        tx_socket.send(b"hello").unwrap();

        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received, b"hello");
    }

    #[test]
    fn unregistering_the_last_callback_idle_pauses() {
        let (_tx_socket, rx_socket) = socket_pair();
        let reader = SocketReader::spawn(rx_socket).unwrap();

        let id = reader.register(Box::new(|_: &[u8]| {}));
        assert!(reader.shared.running.load(Ordering::Acquire));

        reader.unregister(id);
        assert!(!reader.shared.running.load(Ordering::Acquire));
        assert!(reader.shared.idle_paused.load(Ordering::Acquire));
    }
}
