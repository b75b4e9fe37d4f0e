use tracing::{debug, info};

use crate::buffer::Metadata;
use crate::config::SessionConfig;
use crate::device::{Driver, Handle};
use crate::error::Result;
use crate::io::traits::Stream as _;
use crate::io::Stream;

/// Outcome of one loop iteration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Step {
    /// buffer the sink holds after the iteration
    pub in_hand: usize,
    /// buffer the source queued
    pub fed: usize,
    /// whether the source had to reclaim a buffer from the device before feeding
    pub reclaimed: bool,
}

/// Source and sink streaming through the same loopback device
///
/// The sink always holds one buffer for reading while the device fills the others; the source
/// queues into whatever buffer it owns and reclaims one from the device once it owns none.
///
/// # Example
///
/// ```
/// use v4l_loopback::config::SessionConfig;
/// use v4l_loopback::loopback::Loopback;
/// use v4l_loopback::session::Session;
///
/// let dev = Loopback::new("loopback0");
/// let cfg = SessionConfig::new("loopback0").iterations(10);
///
/// let mut session = Session::open(&dev, &cfg).unwrap();
/// session.start().unwrap();
/// session.run(cfg.iterations).unwrap();
/// assert_eq!(session.sink().ownership().app_owned(), 1);
/// ```
pub struct Session<H: Handle> {
    source: Stream<H>,
    sink: Stream<H>,
    iterations: usize,
}

impl<H: Handle> Session<H> {
    /// Open both endpoints
    ///
    /// The source goes first since it negotiates the format the sink then picks up.
    pub fn open<D>(driver: &D, config: &SessionConfig) -> Result<Self>
    where
        D: Driver<Handle = H>,
    {
        let source = Stream::open(driver, &config.source)?;
        let sink = Stream::open(driver, &config.sink)?;

        Ok(Session {
            source,
            sink,
            iterations: 0,
        })
    }

    pub fn source(&self) -> &Stream<H> {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Stream<H> {
        &mut self.source
    }

    pub fn sink(&self) -> &Stream<H> {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut Stream<H> {
        &mut self.sink
    }

    /// Iterations completed so far
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Queue the initial frames and start streaming on both endpoints
    ///
    /// The source queues one frame, the sink queues all its buffers but the last, which it keeps
    /// in hand.
    pub fn start(&mut self) -> Result<()> {
        self.source.feed()?;
        let in_hand = self.sink.prime()?;
        debug!(in_hand, "sink primed");

        self.source.start()?;
        self.sink.start()?;
        Ok(())
    }

    /// Run one iteration, see [`Session::step_with`]
    pub fn step(&mut self) -> Result<Step> {
        self.step_with(|_| (), |_, _| ())
    }

    /// Run one iteration
    ///
    /// The sink takes the next frame from the device and hands back the one it held, then
    /// `consume` reads the new frame. Afterwards `fill` writes the next source frame, which is
    /// queued.
    pub fn step_with<F, C>(&mut self, fill: F, consume: C) -> Result<Step>
    where
        F: FnOnce(&mut [u8]),
        C: FnOnce(&[u8], &Metadata),
    {
        let in_hand = self.sink.drain()?;
        consume(self.sink.get(in_hand)?, self.sink.get_meta(in_hand)?);

        let reclaimed = self.source.ownership().first_app_owned().is_none();
        let fed = self.source.feed_with(fill)?;

        self.iterations += 1;
        Ok(Step {
            in_hand,
            fed,
            reclaimed,
        })
    }

    /// Run `iterations` iterations
    pub fn run(&mut self, iterations: usize) -> Result<()> {
        for _ in 0..iterations {
            self.step()?;
        }
        info!(iterations = self.iterations, "streaming loop done");
        Ok(())
    }

    /// Stop streaming on both endpoints, all buffers return to the application
    pub fn stop(&mut self) -> Result<()> {
        self.sink.stop()?;
        self.source.stop()
    }
}
