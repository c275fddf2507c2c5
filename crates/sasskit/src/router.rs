//! Routes decoded compiler messages to their compilation sessions.
//!
//! A routing table keyed by compilation id holds non-owning session
//! handles; dead entries are dropped as they are encountered. Protocol
//! errors carrying the reserved sentinel id, and fatal transport errors,
//! broadcast to every live session.

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, Weak};

use sasskit_protocol::proto::{OutboundMessage, OutboundPayload, VersionResponse, PROTOCOL_ERROR_ID};

use crate::error::Error;
use crate::lock;
use crate::session::Session;

#[derive(Default)]
pub(crate) struct Router {
    sessions: Mutex<HashMap<u32, Weak<Session>>>,
    version_waiters: Mutex<HashMap<u32, mpsc::Sender<Result<VersionResponse, Error>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: u32, session: &Arc<Session>) {
        lock(&self.sessions).insert(id, Arc::downgrade(session));
    }

    pub fn deregister(&self, id: u32) {
        lock(&self.sessions).remove(&id);
    }

    pub fn register_version_waiter(
        &self,
        id: u32,
        waiter: mpsc::Sender<Result<VersionResponse, Error>>,
    ) {
        lock(&self.version_waiters).insert(id, waiter);
    }

    pub fn forget_version_waiter(&self, id: u32) {
        lock(&self.version_waiters).remove(&id);
    }

    /// Snapshot of the sessions still alive, pruning dead entries.
    pub fn live_sessions(&self) -> Vec<Arc<Session>> {
        let mut map = lock(&self.sessions);
        map.retain(|_, weak| weak.strong_count() > 0);
        map.values().filter_map(Weak::upgrade).collect()
    }

    /// Routes one decoded message. `Err` means the compiler violated the
    /// protocol; the caller must tear the channel down, which broadcasts
    /// the error to every session via [`Router::fatal`].
    pub fn route(&self, message: OutboundMessage) -> Result<(), Error> {
        let compilation_id = message.compilation_id;
        match message.payload {
            OutboundPayload::ProtocolError(error) => {
                if error.id == PROTOCOL_ERROR_ID || compilation_id == PROTOCOL_ERROR_ID {
                    return Err(Error::Protocol(error.message));
                }
                match self.take_session(error.id) {
                    Some(session) => {
                        session.abort(Error::Protocol(error.message));
                        Ok(())
                    }
                    None => Err(Error::Protocol(format!(
                        "protocol error for unknown compilation {}: {}",
                        error.id, error.message
                    ))),
                }
            }
            OutboundPayload::VersionResponse(response) => {
                match lock(&self.version_waiters).remove(&response.id) {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(response));
                        Ok(())
                    }
                    None => Err(Error::Protocol(format!(
                        "unsolicited version response with id {}",
                        response.id
                    ))),
                }
            }
            payload => match lock(&self.sessions)
                .get(&compilation_id)
                .and_then(Weak::upgrade)
            {
                Some(session) => {
                    session.handle(payload);
                    Ok(())
                }
                None => Err(Error::Protocol(format!(
                    "message for unknown compilation id {compilation_id}"
                ))),
            },
        }
    }

    /// Aborts every live session and pending version request.
    pub fn fatal(&self, reason: Error) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = lock(&self.sessions);
            map.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for session in sessions {
            session.abort(reason.clone());
        }
        let waiters: Vec<_> = lock(&self.version_waiters)
            .drain()
            .map(|(_, waiter)| waiter)
            .collect();
        for waiter in waiters {
            let _ = waiter.send(Err(reason.clone()));
        }
    }

    fn take_session(&self, id: u32) -> Option<Arc<Session>> {
        lock(&self.sessions).remove(&id)?.upgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{new_test_session, RecordingOutbox};
    use crate::session::Outcome;
    use sasskit_protocol::proto::{
        CompileOutcome, CompileResponse, CompileSuccess, ProtocolError, ProtocolErrorKind,
    };

    fn compile_response(compilation_id: u32) -> OutboundMessage {
        OutboundMessage {
            compilation_id,
            payload: OutboundPayload::CompileResponse(CompileResponse {
                result: CompileOutcome::Success(CompileSuccess {
                    css: "a {}".into(),
                    source_map: None,
                }),
                loaded_urls: Vec::new(),
            }),
        }
    }

    #[test]
    fn routes_by_compilation_id() {
        let router = Router::new();
        let (one, rx_one, _) = new_test_session(1, Arc::new(RecordingOutbox::default()));
        let (two, rx_two, _) = new_test_session(2, Arc::new(RecordingOutbox::default()));
        router.register(1, &one);
        router.register(2, &two);

        router.route(compile_response(2)).expect("route");
        assert!(matches!(
            rx_two.recv().expect("terminal"),
            Outcome::Success { .. }
        ));
        assert!(rx_one.try_recv().is_err(), "wrong session resolved");
    }

    #[test]
    fn unknown_compilation_id_is_a_protocol_error() {
        let router = Router::new();
        let err = router.route(compile_response(41)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn sentinel_protocol_error_is_fatal() {
        let router = Router::new();
        let (session, rx, _) = new_test_session(1, Arc::new(RecordingOutbox::default()));
        router.register(1, &session);

        let err = router
            .route(OutboundMessage {
                compilation_id: PROTOCOL_ERROR_ID,
                payload: OutboundPayload::ProtocolError(ProtocolError {
                    kind: ProtocolErrorKind::Parse,
                    id: PROTOCOL_ERROR_ID,
                    message: "bad frame".into(),
                }),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        // The channel feeds the routing error back as a broadcast.
        router.fatal(err);
        assert!(matches!(rx.recv().expect("terminal"), Outcome::Aborted(_)));
    }

    #[test]
    fn targeted_protocol_error_aborts_only_its_session() {
        let router = Router::new();
        let (one, rx_one, _) = new_test_session(1, Arc::new(RecordingOutbox::default()));
        let (two, rx_two, _) = new_test_session(2, Arc::new(RecordingOutbox::default()));
        router.register(1, &one);
        router.register(2, &two);

        router
            .route(OutboundMessage {
                compilation_id: 1,
                payload: OutboundPayload::ProtocolError(ProtocolError {
                    kind: ProtocolErrorKind::Params,
                    id: 1,
                    message: "bad response".into(),
                }),
            })
            .expect("targeted error routes");
        assert!(matches!(rx_one.recv().expect("terminal"), Outcome::Aborted(Error::Protocol(_))));
        assert!(rx_two.try_recv().is_err());
    }

    #[test]
    fn fatal_broadcasts_to_all_sessions_and_version_waiters() {
        let router = Router::new();
        let (one, rx_one, _) = new_test_session(1, Arc::new(RecordingOutbox::default()));
        let (two, rx_two, _) = new_test_session(2, Arc::new(RecordingOutbox::default()));
        router.register(1, &one);
        router.register(2, &two);
        let (vtx, vrx) = mpsc::channel();
        router.register_version_waiter(7, vtx);

        router.fatal(Error::Closed);
        assert!(matches!(rx_one.recv().expect("terminal"), Outcome::Aborted(Error::Closed)));
        assert!(matches!(rx_two.recv().expect("terminal"), Outcome::Aborted(Error::Closed)));
        assert!(matches!(vrx.recv().expect("waiter"), Err(Error::Closed)));
        assert!(router.live_sessions().is_empty());
    }

    #[test]
    fn dead_sessions_are_pruned() {
        let router = Router::new();
        {
            let (session, _rx, _) = new_test_session(1, Arc::new(RecordingOutbox::default()));
            router.register(1, &session);
        }
        assert!(router.live_sessions().is_empty());
        let err = router.route(compile_response(1)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
