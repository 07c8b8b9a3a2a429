//! Capture session lifecycle.
//!
//! A session owns everything one capture needs: the chunk ring, the TCP ingestor, the sweep
//! persister and its storage backend. Exactly two threads run while capturing:
//!
//! - **`pulse-ingest`**: accepts the digitizer connection and fills ring chunks.
//! - **the caller's thread**: runs the persister until the stream ends.
//!
//! Either side ending marks the ring done, which stops the other side. Teardown always goes
//! through [`CaptureSession::shutdown`], which runs once no matter how the session ended.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::codec::SampleFormat;
use crate::config::CaptureConfig;
use crate::error::{AppResult, CaptureError};
use crate::frame::FrameLayout;
use crate::ingest::{IngestStats, TcpIngestor, INGEST_THREAD_NAME};
use crate::persister::{PersistStats, PersisterSettings, SweepPersister};
use crate::ring_buffer::{ChunkReader, ChunkRingBuffer, ChunkWriter, RingControl, RingStats};
use crate::storage::{
    now_ts, open_sink, DigitizeMode, GeoFix, ParamSetting, PulseSink, RadarMode, RetainMode,
};

/// Ends a running session from another thread, e.g. a signal handler.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    control: RingControl,
}

impl ShutdownHandle {
    /// Ask the session to stop. The open sweep is still saved.
    pub fn trigger(&self) {
        info!("shutdown requested");
        self.control.done();
    }

    /// Whether the session has been asked to stop or has stopped.
    pub fn is_triggered(&self) -> bool {
        self.control.is_done()
    }
}

/// Totals reported by [`CaptureSession::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Ingest thread totals.
    pub ingest: IngestStats,
    /// Persister totals.
    pub persist: PersistStats,
    /// Ring traffic.
    pub ring: RingStats,
}

struct Pipeline {
    ingestor: TcpIngestor,
    writer: ChunkWriter,
    reader: ChunkReader,
    persister: SweepPersister<Box<dyn PulseSink>>,
}

/// One capture from bind to shutdown.
pub struct CaptureSession {
    config: CaptureConfig,
    layout: FrameLayout,
    local_addr: SocketAddr,
    control: RingControl,
    pipeline: Option<Pipeline>,
    sink: Option<Box<dyn PulseSink>>,
    shutdown_flag: bool,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("local_addr", &self.local_addr)
            .field("frame_len", &self.layout.frame_len())
            .field("ran", &self.pipeline.is_none())
            .field("shutdown", &self.shutdown_flag)
            .finish()
    }
}

impl CaptureSession {
    /// Validate `config`, bind the listener, open storage and record the capture modes.
    pub fn new(config: CaptureConfig) -> AppResult<Self> {
        config.validate()?;

        let layout = FrameLayout::new(config.digitizer.samples_per_pulse)?;
        let ring = ChunkRingBuffer::new(layout.frame_len(), config.ring.num_chunks)?;
        let control = ring.control();
        let ingestor = TcpIngestor::bind(&config.network.interface, config.network.port)?;
        let local_addr = ingestor.local_addr()?;

        let mut sink = open_sink(&config)?;
        record_metadata(&config, sink.as_mut())?;

        let (writer, reader) = ring.split();
        let persister =
            SweepPersister::new(layout, PersisterSettings::from_config(&config), sink);

        info!(
            %local_addr,
            frame_len = layout.frame_len(),
            num_chunks = config.ring.num_chunks,
            backend = %config.storage.backend,
            "capture session ready"
        );

        Ok(Self {
            config,
            layout,
            local_addr,
            control,
            pipeline: Some(Pipeline {
                ingestor,
                writer,
                reader,
                persister,
            }),
            sink: None,
            shutdown_flag: false,
        })
    }

    /// Address the digitizer should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Frame geometry of this session.
    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// The configuration the session was built from.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Handle that stops the session from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            control: self.control.clone(),
        }
    }

    /// Capture until the stream ends, then shut down.
    ///
    /// The first error wins: persister, then ingest thread, then shutdown.
    pub fn run(&mut self) -> AppResult<SessionReport> {
        let Pipeline {
            ingestor,
            writer,
            mut reader,
            mut persister,
        } = self.pipeline.take().ok_or_else(|| {
            CaptureError::Configuration("capture session has already run".to_string())
        })?;

        let ingest_thread = match ingestor.spawn(writer) {
            Ok(handle) => handle,
            Err(e) => {
                self.sink = Some(persister.into_sink());
                if let Err(shutdown_err) = self.shutdown() {
                    warn!(error = %shutdown_err, "shutdown after failed start");
                }
                return Err(e);
            }
        };

        let persisted = persister.run(&mut reader);
        let ingested = ingest_thread
            .join()
            .unwrap_or_else(|_| Err(CaptureError::ThreadPanicked(INGEST_THREAD_NAME.to_string())));

        let report = SessionReport {
            ingest: ingested.as_ref().copied().unwrap_or_default(),
            persist: persister.stats(),
            ring: reader.stats(),
        };
        self.sink = Some(persister.into_sink());
        let shut_down = self.shutdown();

        info!(
            frames = report.ingest.frames,
            pulses = report.persist.pulses,
            sweeps = report.persist.sweeps,
            chunks_skipped = report.ring.chunks_skipped,
            "capture session ended"
        );

        let mut errors = [persisted.err(), ingested.err(), shut_down.err()]
            .into_iter()
            .flatten();
        match errors.next() {
            None => Ok(report),
            Some(first) => {
                for later in errors {
                    warn!(error = %later, "additional error while ending capture");
                }
                Err(first)
            }
        }
    }

    /// Stop the ring and close storage. Runs once; later calls return `Ok`.
    pub fn shutdown(&mut self) -> AppResult<()> {
        if self.shutdown_flag {
            return Ok(());
        }
        self.shutdown_flag = true;
        info!("shutting down capture session");

        self.control.done();
        if let Some(pipeline) = self.pipeline.take() {
            self.sink = Some(pipeline.persister.into_sink());
        }

        let mut errors = Vec::new();
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                errors.push(e);
            }
        }

        info!("capture session shutdown complete");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CaptureError::ShutdownFailed(errors))
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "capture session did not shut down cleanly");
        }
    }
}

/// Record modes, the site fix and the startup parameters before any pulse arrives.
fn record_metadata(config: &CaptureConfig, sink: &mut dyn PulseSink) -> AppResult<()> {
    let digitizer = &config.digitizer;
    sink.set_radar_mode(&RadarMode {
        power: config.radar.power,
        plen: config.radar.plen,
        prf: config.radar.prf,
        rpm: config.radar.rpm,
    })?;
    sink.set_digitize_mode(&DigitizeMode {
        rate: digitizer.sample_rate(),
        format: SampleFormat::new(digitizer.sample_bits, digitizer.packed)?,
        ns: digitizer.samples_per_pulse,
    })?;
    sink.set_retain_mode(config.storage.retain_mode.parse::<RetainMode>()?)?;

    let ts = now_ts();
    sink.record_geo(&GeoFix {
        ts,
        lat: config.site.lat,
        lon: config.site.lon,
        alt: config.site.alt,
        heading: config.site.heading,
    })?;
    for (param, val) in [
        ("decimation", f64::from(digitizer.decimation)),
        ("samples_per_pulse", digitizer.samples_per_pulse as f64),
    ] {
        sink.record_param(&ParamSetting {
            ts,
            param: param.to_string(),
            val,
        })?;
    }
    Ok(())
}
