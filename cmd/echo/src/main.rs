//! TCP echo server on a single coproc event loop
//!
//! Every connection runs as its own fire-and-forget procedure; the
//! accept loop is just another procedure suspended on the listening
//! socket. One thread, no locks.
//!
//! Usage:
//!     echo [port]           (default 9997)
//!
//! Test with:
//!     printf 'ping\n' | nc 127.0.0.1 9997

use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;
use std::net::TcpStream;
use std::rc::Rc;

use tracing::{info, warn};

use coproc::{Error, EventLoop, Procedure};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(9997);

    let listener = TcpListener::bind(("127.0.0.1", port))?;
    listener.set_nonblocking(true)?;
    info!(port, "echo server listening");

    let lp = EventLoop::new();
    lp.on_error(|err| warn!(%err, "connection handler failed"));

    let handle = Procedure::new(|cx, stream: Rc<TcpStream>| -> Result<u64, Error> {
        let mut buf = [0u8; 4096];
        let mut echoed = 0u64;
        loop {
            cx.await_readable(&*stream)?;
            match (&*stream).read(&mut buf) {
                Ok(0) => {
                    info!(echoed, "connection closed");
                    return Ok(echoed);
                }
                Ok(n) => {
                    let mut sent = 0;
                    while sent < n {
                        match (&*stream).write(&buf[sent..n]) {
                            Ok(m) => {
                                sent += m;
                                echoed += m as u64;
                            }
                            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                                cx.await_writable(&*stream)?;
                            }
                            Err(e) => return Err(Error::from(e)),
                        }
                    }
                }
                // Spurious wakeup; wait for the next readiness.
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(Error::from(e)),
            }
        }
    });

    let acceptor = Procedure::new(move |cx, ()| -> Result<(), Error> {
        loop {
            cx.await_readable(&listener)?;
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        stream.set_nonblocking(true).map_err(Error::from)?;
                        info!(%peer, "accepted");
                        handle.call_and_forget(&cx.event_loop()?, Rc::new(stream));
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => return Err(Error::from(e)),
                }
            }
        }
    });

    acceptor.call(&lp, ())?;
    Ok(())
}
