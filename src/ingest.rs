//! Network ingestor: the only writer into the chunk ring.
//!
//! The digitizer connects over TCP and streams Pulse Frames back to back with no delimiters.
//! Framing relies entirely on the pre-agreed frame length, which is also the ring's chunk
//! size, so the ingestor simply fills one chunk at a time straight from the socket.

use std::io::Read;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AppResult, CaptureError};
use crate::ring_buffer::{ChunkWriter, RingControl};

/// Name of the ingest thread.
pub const INGEST_THREAD_NAME: &str = "pulse-ingest";

/// How often an idle ingestor checks whether the stream was declared done.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Totals for one ingest session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Complete frames committed to the ring.
    pub frames: u64,
    /// Bytes received, including any discarded partial frame.
    pub bytes: u64,
    /// Bytes of a trailing partial frame discarded when the peer closed.
    pub partial_tail_bytes: u64,
}

/// Signals `done()` on the ring however the ingestor exits.
struct DoneGuard(RingControl);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.done();
    }
}

enum Fill {
    Full,
    Closed(usize),
    Cancelled,
}

/// TCP listener that accepts exactly one digitizer connection.
#[derive(Debug)]
pub struct TcpIngestor {
    listener: TcpListener,
}

impl TcpIngestor {
    /// Bind `interface:port` immediately.
    ///
    /// Port 0 asks the OS for a free port; [`TcpIngestor::local_addr`] reports it.
    pub fn bind(interface: &str, port: u16) -> AppResult<Self> {
        let ip: IpAddr = interface.parse().map_err(|_| {
            CaptureError::Configuration(format!("'{interface}' is not a valid interface address"))
        })?;
        let listener = TcpListener::bind(SocketAddr::new(ip, port))?;
        info!(addr = %listener.local_addr()?, "listening for digitizer");
        Ok(Self { listener })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and stream it into the ring until the peer closes, an error
    /// occurs, or the stream is declared done between frames.
    ///
    /// The ring is marked done on every exit path.
    pub fn run(self, mut writer: ChunkWriter) -> AppResult<IngestStats> {
        let control = writer.control();
        let _guard = DoneGuard(control.clone());
        let mut stats = IngestStats::default();

        let Some((mut stream, peer)) = self.accept(&writer)? else {
            info!("stream ended before a digitizer connected");
            return Ok(stats);
        };
        info!(%peer, chunk_size = writer.chunk_size(), "digitizer connected");
        stream.set_read_timeout(Some(IDLE_POLL))?;

        loop {
            let Some(mut chunk) = writer.chunk_for_writing() else {
                debug!("ring declared done; ingestor stopping");
                break;
            };
            match fill_chunk(&mut stream, &mut chunk, &control)? {
                Fill::Full => {
                    stats.frames += 1;
                    stats.bytes += chunk.len() as u64;
                    chunk.commit();
                }
                Fill::Closed(0) => {
                    info!(%peer, frames = stats.frames, "digitizer closed the connection");
                    break;
                }
                Fill::Closed(partial) => {
                    stats.bytes += partial as u64;
                    stats.partial_tail_bytes = partial as u64;
                    warn!(
                        %peer,
                        partial_bytes = partial,
                        frame_len = chunk.len(),
                        "connection closed mid-frame; partial frame discarded"
                    );
                    break;
                }
                Fill::Cancelled => {
                    debug!("ring declared done while idle; ingestor stopping");
                    break;
                }
            }
        }

        Ok(stats)
    }

    /// Run the ingestor on its own named thread.
    pub fn spawn(self, writer: ChunkWriter) -> AppResult<JoinHandle<AppResult<IngestStats>>> {
        let control = writer.control();
        thread::Builder::new()
            .name(INGEST_THREAD_NAME.to_string())
            .spawn(move || self.run(writer))
            .map_err(|e| {
                control.done();
                CaptureError::Io(e)
            })
    }

    fn accept(&self, writer: &ChunkWriter) -> AppResult<Option<(TcpStream, SocketAddr)>> {
        self.listener.set_nonblocking(true)?;
        loop {
            if writer.is_done() {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    return Ok(Some((stream, peer)));
                }
                Err(e) => {
                    let err = CaptureError::from(e);
                    if err.is_fatal() {
                        return Err(err);
                    }
                    thread::sleep(IDLE_POLL);
                }
            }
        }
    }
}

/// Read until `chunk` is full, handling short reads.
///
/// A read timeout lets the caller notice a done signal. A peer that stalls mid-frame after
/// the stream is declared done loses the partial frame.
fn fill_chunk(stream: &mut TcpStream, chunk: &mut [u8], control: &RingControl) -> AppResult<Fill> {
    let mut offset = 0;
    while offset < chunk.len() {
        match stream.read(&mut chunk[offset..]) {
            Ok(0) => return Ok(Fill::Closed(offset)),
            Ok(n) => offset += n,
            Err(e) => {
                let err = CaptureError::from(e);
                if err.is_fatal() {
                    return Err(err);
                }
                if control.is_done() {
                    return Ok(Fill::Cancelled);
                }
            }
        }
    }
    Ok(Fill::Full)
}
