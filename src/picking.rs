//! Asynchronous pick readback.
//!
//! Reading the pick buffer back from the GPU is slow, so pick requests run
//! as a bounded best-effort pipeline: at most two requests in flight
//! (double-buffered), a minimum interval between issues to bound readback
//! pressure, and cancellation of requests whose frame is already too stale
//! to be worth waiting for. A request can be force-completed synchronously
//! when an immediate answer is required (mouse leaving the viewport).
//!
//! The GPU side is abstracted behind [`PickBackend`] so the pipeline logic
//! stays testable without a GL context.

use std::collections::VecDeque;

use web_time::{Duration, Instant};

/// Result of one completed pick readback.
#[derive(Debug, Clone, PartialEq)]
pub struct PickData {
    /// Identifier of the object under the pointer, 0 for background.
    pub pick_id: u64,
    /// Position of the pick in layer coordinates.
    pub position: Vec<f32>,
}

/// GPU-side operations the pick pipeline needs.
///
/// `issue` starts an asynchronous readback (fence plus buffer pack) and
/// returns a handle; `poll` is non-blocking; `block_on` waits for the fence;
/// `read` consumes a signaled request's buffer; `cancel` releases a request
/// that will never be read.
pub trait PickBackend {
    /// Begin an asynchronous readback, returning its handle.
    fn issue(&mut self) -> u64;

    /// Whether the request's fence has signaled.
    fn poll(&mut self, handle: u64) -> bool;

    /// Wait synchronously until the request's fence signals.
    fn block_on(&mut self, handle: u64);

    /// Read a signaled request's buffer.
    fn read(&mut self, handle: u64) -> PickData;

    /// Release a request without reading it.
    fn cancel(&mut self, handle: u64);
}

/// Maximum readback requests in flight.
const MAX_IN_FLIGHT: usize = 2;

/// Minimum interval between issued requests.
const MIN_ISSUE_INTERVAL: Duration = Duration::from_millis(10);

/// A pending request older than this many frames at poll time is cancelled
/// rather than waited on.
const STALE_FRAME_THRESHOLD: u64 = 2;

#[derive(Debug)]
struct InFlight {
    handle: u64,
    frame: u64,
}

/// Bounded pick-readback pipeline over a [`PickBackend`].
pub struct PickRequestManager<B: PickBackend> {
    backend: B,
    in_flight: VecDeque<InFlight>,
    frame: u64,
    last_issue: Option<Instant>,
    latest: Option<PickData>,
}

impl<B: PickBackend> PickRequestManager<B> {
    /// Create an idle pipeline.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            in_flight: VecDeque::new(),
            frame: 0,
            last_issue: None,
            latest: None,
        }
    }

    /// Advance the frame counter. Stale-request accounting is relative to
    /// this.
    pub fn next_frame(&mut self) {
        self.frame += 1;
    }

    /// Current frame number.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Most recent completed pick, if any.
    pub fn latest(&self) -> Option<&PickData> {
        self.latest.as_ref()
    }

    /// Issue a new readback request if the pipeline has room and the
    /// inter-request interval has elapsed. Returns whether a request was
    /// issued.
    pub fn request_pick(&mut self) -> bool {
        if self.in_flight.len() >= MAX_IN_FLIGHT {
            return false;
        }
        if let Some(last) = self.last_issue {
            if last.elapsed() < MIN_ISSUE_INTERVAL {
                return false;
            }
        }
        let handle = self.backend.issue();
        self.in_flight.push_back(InFlight {
            handle,
            frame: self.frame,
        });
        self.last_issue = Some(Instant::now());
        log::debug!("issued pick readback {handle} at frame {}", self.frame);
        true
    }

    /// Poll in-flight requests: completed ones are read (newest result
    /// wins), stale ones are cancelled.
    pub fn update(&mut self) {
        while let Some(front) = self.in_flight.front() {
            if self.backend.poll(front.handle) {
                let front = self.in_flight.pop_front().expect("polled front");
                self.latest = Some(self.backend.read(front.handle));
                continue;
            }
            if self.frame.saturating_sub(front.frame) >= STALE_FRAME_THRESHOLD {
                let front = self.in_flight.pop_front().expect("polled front");
                log::debug!("cancelling stale pick readback {}", front.handle);
                self.backend.cancel(front.handle);
                continue;
            }
            // Requests complete in issue order; a pending fresh front blocks
            // the rest.
            break;
        }
    }

    /// Synchronously finish the newest in-flight request and drop older
    /// ones. Returns the freshest pick available afterwards.
    pub fn force_complete(&mut self) -> Option<&PickData> {
        while self.in_flight.len() > 1 {
            let old = self.in_flight.pop_front().expect("older request");
            self.backend.cancel(old.handle);
        }
        if let Some(last) = self.in_flight.pop_front() {
            self.backend.block_on(last.handle);
            self.latest = Some(self.backend.read(last.handle));
        }
        self.latest.as_ref()
    }
}
