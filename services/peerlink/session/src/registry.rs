//! Owner-side bookkeeping for live sessions.
//!
//! Sessions never remove themselves from anything. The registry does it for
//! them: through the close callback it hands out, and whenever a write
//! reports [`SessionError::Closed`].

use dashmap::DashMap;
use peerlink_wire::MessageCodec;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::session::{on_close, CloseCallback, Session};

/// Collection of active sessions keyed by session id
pub struct SessionRegistry<C: MessageCodec> {
    sessions: Arc<DashMap<u64, Session<C>>>,
}

impl<C: MessageCodec> Clone for SessionRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<C: MessageCodec> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MessageCodec> SessionRegistry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Close callback that deregisters the closing session.
    ///
    /// Holds the registry weakly so sessions do not keep it alive.
    pub fn close_callback(&self) -> CloseCallback<C> {
        let sessions: Weak<DashMap<u64, Session<C>>> = Arc::downgrade(&self.sessions);
        on_close(move |session: &Session<C>| {
            if let Some(sessions) = sessions.upgrade() {
                if sessions.remove(&session.id()).is_some() {
                    info!(
                        "Removed session {} with {} ({} remaining)",
                        session.id(),
                        session.remote_addr(),
                        sessions.len()
                    );
                }
            }
            Ok(())
        })
    }

    /// Register a session.
    ///
    /// A session that closed before it could be registered is dropped again
    /// right away, since its close callback has already run.
    pub fn insert(&self, session: Session<C>) {
        let id = session.id();
        let remote_addr = session.remote_addr();
        self.sessions.insert(id, session.clone());

        if !session.is_active() {
            self.sessions.remove(&id);
            debug!("Session {} with {} closed before registration", id, remote_addr);
            return;
        }
        info!("Registered session {} with {}", id, remote_addr);
    }

    /// Deregister a session without closing it
    pub fn remove(&self, id: u64) -> Option<Session<C>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Look up a session
    pub fn get(&self, id: u64) -> Option<Session<C>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of all registered sessions
    pub fn ids(&self) -> Vec<u64> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Queue a message on one session, deregistering it if it has closed
    pub fn send_to(&self, id: u64, message: C::Message) -> Result<(), SessionError> {
        let session = self.get(id).ok_or(SessionError::Unknown(id))?;
        let result = session.write_message(message);
        if result.is_err() {
            self.sessions.remove(&id);
        }
        result
    }

    /// Queue a message on every session except `except`.
    ///
    /// Sessions that report [`SessionError::Closed`] are deregistered.
    /// Returns the number of sessions the message was queued on.
    pub fn broadcast(&self, message: &C::Message, except: Option<u64>) -> usize
    where
        C::Message: Clone,
    {
        let mut sent = 0;
        for session in self.snapshot() {
            if Some(session.id()) == except {
                continue;
            }
            match session.write_message(message.clone()) {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!("Dropping session {} from broadcast: {}", session.id(), e);
                    self.sessions.remove(&session.id());
                }
            }
        }
        sent
    }

    /// Close every registered session and wait for their loops to stop
    pub async fn shutdown(&self) {
        let sessions = self.snapshot();
        info!("Closing {} sessions", sessions.len());

        for session in &sessions {
            session.close();
        }
        for session in &sessions {
            session.join().await;
        }
    }

    /// Clone out the current sessions so no map guard is held while calling
    /// into them; their close callbacks write back into the map.
    fn snapshot(&self) -> Vec<Session<C>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
