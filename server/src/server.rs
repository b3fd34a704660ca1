use crate::{
    channel::ChannelRegistry,
    config::Config,
    connection::ConnectionRegistry,
    error::Result,
    router::{Disposition, Router},
};
use log::{debug, error, info, warn};
use mio::{
    Events, Interest, Poll, Token, Waker,
    net::{TcpListener, TcpStream},
};
use shared::{
    Envelope, MESSAGE_SIZE,
    codec::{HEADER_SIZE, MAX_FRAME_SIZE},
};
use std::{
    io::{ErrorKind, Read},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CLIENT: usize = 2;

/// Poll tick used to check for idle connections when a timeout is configured.
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Reads taken from one connection before the loop serves the others.
const READ_BUDGET: usize = 64;

/// Most bytes a connection may hold undecoded: one frame of the largest size.
const MAX_BUFFERED: usize = HEADER_SIZE + MAX_FRAME_SIZE;

pub const SHUTDOWN_NOTICE: &str = "Server is shutting down. Goodbye!";

/// Stops a running server from another thread or a signal handler.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            error!("Failed to wake the event loop: {err}");
        }
    }

    fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Single-threaded relay: one poll over the listener and every client socket.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream>,
    channels: ChannelRegistry,
    config: Config,
    next_token: usize,
    /// Connections that ran out of read budget with data still waiting.
    backlog: Vec<Token>,
    shutdown: ShutdownHandle,
}

impl Server {
    pub fn bind(config: Config) -> Result<Self> {
        let address = config.address()?;
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(address)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Server {
            poll,
            listener,
            connections: ConnectionRegistry::new(),
            channels: ChannelRegistry::new(),
            config,
            next_token: FIRST_CLIENT,
            backlog: Vec::new(),
            shutdown: ShutdownHandle {
                requested: Arc::new(AtomicBool::new(false)),
                waker,
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve until a shutdown is requested.
    pub fn run(mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        let tick = self.config.idle_timeout().map(|_| IDLE_TICK);
        info!("Listening on {}.", self.local_addr()?);

        while !self.shutdown.requested() {
            let timeout = if self.backlog.is_empty() {
                tick
            } else {
                Some(Duration::ZERO)
            };
            if let Err(err) = self.poll.poll(&mut events, timeout) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            let backlog = std::mem::take(&mut self.backlog);
            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    WAKER => {}
                    token => {
                        if event.is_writable() {
                            self.connections.flush_outbound(token);
                        }
                        if event.is_readable() || event.is_read_closed() || event.is_error() {
                            self.readable(token);
                        }
                    }
                }
            }
            for token in backlog {
                self.readable(token);
            }

            self.reap();
        }

        self.close_all()
    }

    fn accept(&mut self) {
        loop {
            let (mut stream, address) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("Failed to accept connection: {err}");
                    return;
                }
            };

            let token = Token(self.next_token);
            self.next_token += 1;
            if let Err(err) = self
                .poll
                .registry()
                .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
            {
                warn!("Failed to watch connection from {address}: {err}");
                continue;
            }
            self.connections.insert(token, stream);
            info!(
                "New connection from {address}. {} active connections.",
                self.connections.len()
            );
        }
    }

    /// Read in chunks, dispatching every complete frame as soon as it arrives.
    /// A connection that still has data after `READ_BUDGET` reads is put on
    /// the backlog so the others get served.
    fn readable(&mut self, token: Token) {
        let mut chunk = [0; MESSAGE_SIZE];
        for _ in 0..READ_BUDGET {
            let Some(connection) = self.connections.get_mut(token) else {
                return;
            };
            let n = match connection.stream.read(&mut chunk) {
                Ok(0) => {
                    self.close(token);
                    return;
                }
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("Read from {token:?} failed: {err}");
                    self.close(token);
                    return;
                }
            };
            connection.frames.extend(&chunk[..n]);
            self.connections.touch(token);

            if self.drain_frames(token) == Disposition::Close {
                self.close(token);
                return;
            }
        }
        if !self.backlog.contains(&token) {
            self.backlog.push(token);
        }
    }

    /// Dispatch the complete frames buffered for `token`, in receipt order.
    fn drain_frames(&mut self, token: Token) -> Disposition {
        loop {
            let Some(connection) = self.connections.get_mut(token) else {
                return Disposition::Close;
            };
            let envelope = match connection.frames.next_envelope() {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(err) => {
                    warn!("Closing {token:?} after protocol error: {err}");
                    return Disposition::Close;
                }
            };
            let mut router = Router::new(&mut self.connections, &self.channels, &self.config.name);
            if router.dispatch(token, envelope) == Disposition::Close {
                return Disposition::Close;
            }
        }

        let buffered = self
            .connections
            .get_mut(token)
            .map_or(0, |connection| connection.frames.len());
        if buffered > MAX_BUFFERED {
            warn!("Closing {token:?}: {buffered} bytes buffered without a complete frame");
            return Disposition::Close;
        }
        Disposition::Continue
    }

    /// Close connections whose writes failed and, if enabled, idle ones.
    /// Closing announces departures, which can break further connections.
    fn reap(&mut self) {
        loop {
            let mut doomed = self.connections.broken();
            if let Some(timeout) = self.config.idle_timeout() {
                for token in self.connections.idle(timeout, Instant::now()) {
                    info!("Dropping idle connection {token:?}.");
                    doomed.push(token);
                }
            }
            if doomed.is_empty() {
                return;
            }
            for token in doomed {
                self.close(token);
            }
        }
    }

    /// Implicit QUIT: leave every channel, drop the nickname, close the socket.
    fn close(&mut self, token: Token) {
        let mut router = Router::new(&mut self.connections, &self.channels, &self.config.name);
        if let Some(mut connection) = router.disconnect(token)
            && let Err(err) = self.poll.registry().deregister(&mut connection.stream)
        {
            debug!("Failed to deregister {token:?}: {err}");
        }
    }

    /// Notify every client, then close every socket and the listener.
    fn close_all(mut self) -> Result<()> {
        info!(
            "Shutting down. Notifying {} connections.",
            self.connections.len()
        );
        let notice = Envelope::notice(SHUTDOWN_NOTICE);
        let tokens = self.connections.tokens();
        for token in &tokens {
            self.connections.send_to_token(*token, &notice);
        }
        for token in tokens {
            if let Some(mut connection) = self.connections.remove(token)
                && let Err(err) = self.poll.registry().deregister(&mut connection.stream)
            {
                debug!("Failed to deregister {token:?}: {err}");
            }
        }
        self.poll.registry().deregister(&mut self.listener)?;
        info!("Server shut down.");
        Ok(())
    }
}
