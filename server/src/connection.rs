use log::{debug, warn};
use mio::Token;
use shared::{
    Envelope, FrameBuffer, ProtocolError,
    codec::{HEADER_SIZE, MAX_FRAME_SIZE},
};
use std::{
    collections::{BTreeSet, HashMap},
    io::{ErrorKind, Write},
    time::{Duration, Instant},
};

/// Bytes that may wait for a slow reader before further messages to it are
/// skipped.
pub const MAX_OUTBOUND: usize = 4 * (HEADER_SIZE + MAX_FRAME_SIZE);

/// One accepted stream and its per-connection state.
#[derive(Debug)]
pub struct Connection<S> {
    pub stream: S,
    pub frames: FrameBuffer,
    outbound: Vec<u8>,
    identity: Option<String>,
    last_seen: Instant,
    broken: bool,
}

impl<S: Write> Connection<S> {
    fn new(stream: S) -> Self {
        Connection {
            stream,
            frames: FrameBuffer::new(),
            outbound: Vec::new(),
            identity: None,
            last_seen: Instant::now(),
            broken: false,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Bytes queued behind a socket that would block.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Queue a whole frame and write as much as the socket accepts. Frames are
    /// never split across a skip: a frame that does not fit in the queue is
    /// dropped for this receiver only.
    fn deliver(&mut self, frame: &[u8]) -> bool {
        if self.broken {
            return false;
        }
        if self.outbound.len() + frame.len() > MAX_OUTBOUND {
            warn!(
                "Skipping a message for {}: {} bytes still queued",
                self.name(),
                self.outbound.len()
            );
            return false;
        }
        self.outbound.extend_from_slice(frame);
        self.flush_outbound();
        !self.broken
    }

    /// Write queued bytes until the queue is empty or the socket would block.
    /// Only a hard write error marks the connection broken.
    fn flush_outbound(&mut self) {
        while !self.outbound.is_empty() && !self.broken {
            match self.stream.write(&self.outbound) {
                Ok(0) => {
                    warn!("{} stopped accepting data", self.name());
                    self.broken = true;
                }
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("Failed to deliver to {}: {err}", self.name());
                    self.broken = true;
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.identity().unwrap_or("unregistered connection")
    }
}

/// Live connections keyed by poll token, with a two-way index between tokens
/// and the nickname bound to them.
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    connections: HashMap<Token, Connection<S>>,
    identities: HashMap<String, Token>,
}

impl<S: Write> ConnectionRegistry<S> {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: HashMap::new(),
            identities: HashMap::new(),
        }
    }

    /// Track a freshly accepted stream. It has no identity until `register`.
    pub fn insert(&mut self, token: Token, stream: S) {
        self.connections.insert(token, Connection::new(stream));
    }

    /// Forget a connection and any identity bound to it, handing the stream back
    /// so the caller can deregister and close it.
    pub fn remove(&mut self, token: Token) -> Option<Connection<S>> {
        let connection = self.connections.remove(&token)?;
        if let Some(identity) = connection.identity()
            && self.identities.get(identity) == Some(&token)
        {
            self.identities.remove(identity);
        }
        Some(connection)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&token)
    }

    /// Bind `identity` to the connection at `token`. The last writer wins: any
    /// connection previously bound to the identity is unbound and its token
    /// returned for the caller to close.
    pub fn register(&mut self, identity: &str, token: Token) -> Option<Token> {
        let previous = self
            .identities
            .insert(identity.to_string(), token)
            .filter(|previous| *previous != token);
        if let Some(previous) = previous
            && let Some(connection) = self.connections.get_mut(&previous)
        {
            connection.identity = None;
        }
        if let Some(connection) = self.connections.get_mut(&token) {
            connection.identity = Some(identity.to_string());
        }
        previous
    }

    pub fn lookup(&self, identity: &str) -> Option<Token> {
        self.identities.get(identity).copied()
    }

    pub fn identity_of(&self, token: Token) -> Option<&str> {
        self.connections.get(&token)?.identity()
    }

    /// Drop the identity mapping. The connection itself stays open.
    pub fn unregister(&mut self, identity: &str) {
        if let Some(token) = self.identities.remove(identity)
            && let Some(connection) = self.connections.get_mut(&token)
        {
            connection.identity = None;
        }
    }

    /// Best-effort delivery to a nickname. Returns whether the frame was written.
    pub fn send_to(&mut self, identity: &str, envelope: &Envelope) -> bool {
        match self.lookup(identity) {
            Some(token) => self.send_to_token(token, envelope),
            None => {
                debug!("Dropping {:?} for unknown identity {identity}", envelope.opcode());
                false
            }
        }
    }

    pub fn send_to_token(&mut self, token: Token, envelope: &Envelope) -> bool {
        let Some(frame) = encode(envelope) else {
            return false;
        };
        self.connections
            .get_mut(&token)
            .is_some_and(|connection| connection.deliver(&frame))
    }

    /// Deliver one envelope to every member except `sender`. Slow or failed
    /// members are skipped; the rest still receive it. Fails only when the
    /// envelope does not fit in a frame, in which case nobody receives it.
    pub fn broadcast(
        &mut self,
        members: &BTreeSet<String>,
        sender: &str,
        envelope: &Envelope,
    ) -> Result<(), ProtocolError> {
        let frame = shared::encode(envelope)?;
        for member in members.iter().filter(|member| *member != sender) {
            let Some(token) = self.lookup(member) else {
                debug!("Skipping {member}: no live connection");
                continue;
            };
            if let Some(connection) = self.connections.get_mut(&token) {
                connection.deliver(&frame);
            }
        }
        Ok(())
    }

    /// Retry queued output once the socket reports it is writable again.
    pub fn flush_outbound(&mut self, token: Token) {
        if let Some(connection) = self.connections.get_mut(&token) {
            connection.flush_outbound();
        }
    }

    /// Record inbound activity on a connection.
    pub fn touch(&mut self, token: Token) {
        if let Some(connection) = self.connections.get_mut(&token) {
            connection.last_seen = Instant::now();
        }
    }

    /// Connections whose last write failed outright.
    pub fn broken(&self) -> Vec<Token> {
        self.connections
            .iter()
            .filter(|(_, connection)| connection.broken)
            .map(|(token, _)| *token)
            .collect()
    }

    /// Connections with no inbound traffic for longer than `timeout`.
    pub fn idle(&self, timeout: Duration, now: Instant) -> Vec<Token> {
        self.connections
            .iter()
            .filter(|(_, connection)| now.saturating_duration_since(connection.last_seen) > timeout)
            .map(|(token, _)| *token)
            .collect()
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<S: Write> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(envelope: &Envelope) -> Option<Vec<u8>> {
    match shared::encode(envelope) {
        Ok(frame) => Some(frame.to_vec()),
        Err(err) => {
            warn!("Not sending {:?}: {err}", envelope.opcode());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct Unplugged;

    impl Write for Unplugged {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Takes `room` more bytes, then reports that it would block.
    struct Choked {
        taken: Vec<u8>,
        room: usize,
    }

    impl Write for Choked {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.room);
            self.taken.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn decoded(bytes: &[u8]) -> Vec<Envelope> {
        let mut frames = FrameBuffer::new();
        frames.extend(bytes);
        let mut out = Vec::new();
        while let Some(envelope) = frames.next_envelope().unwrap() {
            out.push(envelope);
        }
        out
    }

    fn received(registry: &mut ConnectionRegistry<Vec<u8>>, token: Token) -> Vec<Envelope> {
        let connection = registry.get_mut(token).unwrap();
        decoded(&std::mem::take(&mut connection.stream))
    }

    fn members(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_indexes_both_directions() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(Token(2), Vec::new());
        assert_eq!(registry.identity_of(Token(2)), None);

        assert_eq!(registry.register("alice", Token(2)), None);
        assert_eq!(registry.lookup("alice"), Some(Token(2)));
        assert_eq!(registry.identity_of(Token(2)), Some("alice"));
    }

    #[test]
    fn register_overwrites_and_returns_previous() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(Token(2), Vec::new());
        registry.insert(Token(3), Vec::new());
        registry.register("alice", Token(2));

        assert_eq!(registry.register("alice", Token(3)), Some(Token(2)));
        assert_eq!(registry.lookup("alice"), Some(Token(3)));
        assert_eq!(registry.identity_of(Token(2)), None);

        // Closing the displaced connection must not unbind the new one
        registry.remove(Token(2));
        assert_eq!(registry.lookup("alice"), Some(Token(3)));
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(Token(2), Vec::new());
        registry.register("alice", Token(2));

        registry.unregister("alice");
        registry.unregister("alice");
        registry.unregister("nobody");

        assert_eq!(registry.lookup("alice"), None);
        assert_eq!(registry.identity_of(Token(2)), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_drops_identity() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(Token(2), Vec::new());
        registry.register("alice", Token(2));

        assert!(registry.remove(Token(2)).is_some());
        assert_eq!(registry.lookup("alice"), None);
        assert!(registry.is_empty());
        assert!(!registry.send_to("alice", &Envelope::notice("anyone?")));
    }

    #[test]
    fn broadcast_excludes_sender() {
        let mut registry = ConnectionRegistry::new();
        for (token, name) in [(2, "alice"), (3, "bob"), (4, "carol")] {
            registry.insert(Token(token), Vec::new());
            registry.register(name, Token(token));
        }

        let message = Envelope::relayed("general", "alice: hi");
        registry
            .broadcast(&members(&["alice", "bob", "carol"]), "alice", &message)
            .unwrap();

        assert!(received(&mut registry, Token(2)).is_empty());
        assert_eq!(received(&mut registry, Token(3)), vec![message.clone()]);
        assert_eq!(received(&mut registry, Token(4)), vec![message]);
    }

    #[test]
    fn failed_delivery_marks_connection_broken() {
        let mut registry: ConnectionRegistry<Box<dyn Write>> = ConnectionRegistry::new();
        registry.insert(Token(2), Box::new(Unplugged));
        registry.insert(Token(3), Box::new(Vec::new()));
        registry.register("bob", Token(2));
        registry.register("carol", Token(3));

        let message = Envelope::relayed("general", "alice: hi");
        registry
            .broadcast(&members(&["bob", "carol"]), "alice", &message)
            .unwrap();

        assert_eq!(registry.broken(), vec![Token(2)]);
        assert!(!registry.send_to("bob", &message));
        assert!(registry.send_to("carol", &message));
    }

    #[test]
    fn oversized_broadcast_reaches_nobody() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(Token(2), Vec::new());
        registry.register("bob", Token(2));

        let message = Envelope::relayed("general", "x".repeat(MAX_FRAME_SIZE));
        let result = registry.broadcast(&members(&["bob"]), "alice", &message);

        assert!(matches!(result, Err(ProtocolError::TooLarge { .. })));
        assert!(received(&mut registry, Token(2)).is_empty());
    }

    #[test]
    fn slow_receiver_keeps_whole_frames_queued() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(
            Token(2),
            Choked {
                taken: Vec::new(),
                room: 10,
            },
        );
        registry.register("bob", Token(2));

        let message = Envelope::relayed("general", "alice: hi");
        assert!(registry.send_to("bob", &message));
        assert!(registry.send_to("bob", &message));
        assert!(registry.broken().is_empty());

        let connection = registry.get_mut(Token(2)).unwrap();
        assert_eq!(connection.stream.taken.len(), 10);
        assert!(connection.pending() > 0);

        connection.stream.room = usize::MAX;
        registry.flush_outbound(Token(2));

        let connection = registry.get_mut(Token(2)).unwrap();
        assert_eq!(connection.pending(), 0);
        assert_eq!(decoded(&connection.stream.taken), vec![message.clone(), message]);
    }

    #[test]
    fn full_queue_skips_messages_without_breaking() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(
            Token(2),
            Choked {
                taken: Vec::new(),
                room: 0,
            },
        );
        registry.register("bob", Token(2));

        let message = Envelope::relayed("general", "x".repeat(60_000));
        let fits = MAX_OUTBOUND / shared::encode(&message).unwrap().len();
        for _ in 0..fits {
            assert!(registry.send_to("bob", &message));
        }
        assert!(!registry.send_to("bob", &message));
        assert!(registry.broken().is_empty());
        assert_eq!(registry.lookup("bob"), Some(Token(2)));

        registry.get_mut(Token(2)).unwrap().stream.room = usize::MAX;
        registry.flush_outbound(Token(2));
        let taken = &registry.get_mut(Token(2)).unwrap().stream.taken;
        assert_eq!(decoded(taken).len(), fits);
    }

    #[test]
    fn idle_reports_quiet_connections() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(Token(2), Vec::new());
        let later = Instant::now() + Duration::from_secs(120);

        assert_eq!(registry.idle(Duration::from_secs(60), later), vec![Token(2)]);
        assert!(registry.idle(Duration::from_secs(60), Instant::now()).is_empty());
    }
}
