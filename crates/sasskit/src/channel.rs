//! Subprocess channel: owns the compiler's pipes and the two background
//! reader threads.
//!
//! Writes are serialized by a mutex so frames are never interleaved on the
//! wire. The read loop is single-threaded, preserving the compiler's
//! message order all the way into the router.

use std::io::BufReader;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sasskit_protocol::proto::InboundMessage;
use sasskit_protocol::{decode_outbound, encode_inbound, read_frame, write_frame, FrameError};
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::launch::Launcher;
use crate::lock;
use crate::router::Router;

/// How long a closing channel waits for the child to exit on its own
/// after stdin is dropped, before killing it.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// The write half of the channel, as sessions see it.
pub(crate) trait Outbox: Send + Sync {
    fn send(&self, message: &InboundMessage) -> Result<(), Error>;
}

#[derive(Clone)]
pub(crate) struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
    router: Arc<Router>,
}

impl Channel {
    pub fn spawn(launcher: &Launcher, router: Arc<Router>) -> Result<Self, Error> {
        let mut child = launcher.command().spawn().map_err(|err| {
            Error::Host(format!(
                "failed to launch compiler {}: {err}",
                launcher.program().display()
            ))
        })?;
        let stdin = take_pipe(child.stdin.take(), "stdin")?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;
        debug!(pid = child.id(), "compiler subprocess launched");

        let inner = Arc::new(ChannelInner {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
            router,
        });

        spawn_reader(Arc::clone(&inner), "sasskit-read-loop", move |inner| {
            read_loop(inner, stdout)
        })?;
        spawn_reader(Arc::clone(&inner), "sasskit-stderr-pump", move |inner| {
            stderr_loop(inner, stderr)
        })?;

        Ok(Self { inner })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Idempotent; aborts every live session with [`Error::Closed`] and
    /// reaps the child.
    pub fn close(&self) {
        self.inner.shutdown(Error::Closed);
    }
}

impl Outbox for Channel {
    fn send(&self, message: &InboundMessage) -> Result<(), Error> {
        self.inner.send(message)
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T, Error> {
    pipe.ok_or_else(|| Error::Host(format!("compiler {name} is not piped")))
}

fn spawn_reader<F>(inner: Arc<ChannelInner>, name: &str, body: F) -> Result<(), Error>
where
    F: FnOnce(Arc<ChannelInner>) + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(inner))
        .map(|_| ())
        .map_err(|err| Error::Host(format!("failed to spawn {name} thread: {err}")))
}

impl ChannelInner {
    fn send(&self, message: &InboundMessage) -> Result<(), Error> {
        let payload = encode_inbound(message);
        let mut guard = lock(&self.stdin);
        let Some(stdin) = guard.as_mut() else {
            return Err(Error::Closed);
        };
        trace!(bytes = payload.len(), "writing frame to compiler");
        if let Err(err) = write_frame(stdin, &payload) {
            drop(guard);
            warn!("write to compiler stdin failed: {err}");
            self.shutdown(Error::Closed);
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Tears the channel down exactly once; the first caller's reason is
    /// the one every live session aborts with.
    fn shutdown(&self, reason: Error) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing compiler channel: {reason}");
        lock(&self.stdin).take();
        self.router.fatal(reason);
        if let Some(mut child) = lock(&self.child).take() {
            reap(&mut child);
        }
    }
}

/// Waits for the child to exit after stdin closed; kills it if it
/// lingers past [`REAP_TIMEOUT`].
fn reap(child: &mut Child) {
    let deadline = Instant::now() + REAP_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("compiler subprocess exited: {status}");
                return;
            }
            Ok(None) => {}
            Err(err) => {
                warn!("failed to poll compiler subprocess: {err}");
                return;
            }
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            match child.wait() {
                Ok(status) => debug!("compiler subprocess killed: {status}"),
                Err(err) => warn!("failed to reap compiler subprocess: {err}"),
            }
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn read_loop(inner: Arc<ChannelInner>, stdout: ChildStdout) {
    let mut stdout = BufReader::new(stdout);
    loop {
        let payload = match read_frame(&mut stdout) {
            Ok(payload) => payload,
            Err(FrameError::Eof) => {
                debug!("compiler stdout reached end of stream");
                inner.shutdown(Error::Closed);
                return;
            }
            Err(err) => {
                inner.shutdown(Error::Protocol(format!(
                    "malformed frame from compiler: {err}"
                )));
                return;
            }
        };
        match decode_outbound(&payload) {
            Ok(message) => {
                trace!(
                    compilation_id = message.compilation_id,
                    bytes = payload.len(),
                    "frame received from compiler"
                );
                if let Err(err) = inner.router.route(message) {
                    inner.shutdown(err);
                    return;
                }
            }
            Err(err) => {
                inner.shutdown(Error::Protocol(format!(
                    "failed to decode compiler message: {err}"
                )));
                return;
            }
        }
    }
}

/// Line-by-line copy of the compiler's stderr onto the host's stderr.
fn stderr_loop(inner: Arc<ChannelInner>, stderr: ChildStderr) {
    use std::io::BufRead;

    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        match line {
            Ok(line) => eprintln!("{line}"),
            Err(err) => {
                inner.shutdown(Error::Protocol(format!(
                    "error reading compiler stderr: {err}"
                )));
                return;
            }
        }
    }
}
