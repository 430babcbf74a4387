// Sort manager
// Owns the sort worker thread and the manager's half of the ping-pong buffer pair.
//
// Flow:
//   set_centers / set_rows  -> data + first writable buffer moved to the worker
//   set_camera              -> pose forwarded when it moved more than epsilon
//   poll                    -> newest published buffer becomes the front buffer,
//                              the previous front is moved straight back to the worker
// The render side never blocks on the worker and always has a complete front buffer.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::camera::CameraPose;
use crate::config::{IndexFormat, SortConfig};
use crate::error::{Result, SplatError};
use crate::sort::{OrderBuffer, SortRequest, SortResponse, SortSource, SortWorker};

/// Coarse manager state, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPhase {
    /// No splat data handed to the worker yet
    Idle,
    /// Data and a writable buffer are with the worker
    Armed,
    /// A pose that warrants a new pass has been sent and not yet answered
    Sorting,
    /// The front buffer holds the newest order the worker produced
    Published,
    /// Worker gone; the last published order stays in use
    Disconnected,
}

pub struct SortManager {
    config: SortConfig,
    /// None once shut down
    sender: Option<Sender<SortRequest>>,
    receiver: Receiver<SortResponse>,
    front: Option<OrderBuffer>,
    generation: u64,
    last_sent_pose: Option<CameraPose>,
    last_published: Option<(u64, CameraPose)>,
    phase: SortPhase,
    messages_sent: u64,
    disconnect_warned: bool,
}

impl SortManager {
    /// Start the worker thread. The thread exits on its own once the manager is dropped.
    pub fn spawn(config: SortConfig) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<SortRequest>();
        let (response_tx, response_rx) = mpsc::channel::<SortResponse>();

        let worker = SortWorker::new(config);
        thread::Builder::new()
            .name("splat-sort".to_string())
            .spawn(move || run_worker(worker, request_rx, response_tx))
            .map_err(SplatError::WorkerSpawn)?;

        debug!("Spawned splat sort worker (epsilon {})", config.epsilon);
        Ok(Self {
            config,
            sender: Some(request_tx),
            receiver: response_rx,
            front: None,
            generation: 0,
            last_sent_pose: None,
            last_published: None,
            phase: SortPhase::Idle,
            messages_sent: 0,
            disconnect_warned: false,
        })
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Hand interleaved xyz centers to the worker; the front buffer starts as the identity order
    pub fn set_centers(&mut self, centers: Vec<f32>) -> bool {
        let count = centers.len() / 3;
        let front = OrderBuffer::identity(count, self.config.index_format);
        let back = OrderBuffer::identity(count, self.config.index_format);
        self.set_source(SortSource::Centers(centers), front, back)
    }

    /// Hand full attribute rows to the worker; the front buffer starts as the unsorted rows
    pub fn set_rows(&mut self, rows: Vec<u32>, stride: usize) -> bool {
        let front = OrderBuffer::from_rows(rows.clone(), stride);
        let back = OrderBuffer::from_rows(rows.clone(), stride);
        self.set_source(SortSource::Rows { rows, stride }, front, back)
    }

    fn set_source(&mut self, source: SortSource, front: OrderBuffer, back: OrderBuffer) -> bool {
        if self.sender.is_none() {
            return false;
        }
        self.generation += 1;
        info!(
            "Sort data generation {}: {} splats",
            self.generation,
            source.len()
        );
        self.front = Some(front);
        self.last_published = None;
        let request = SortRequest {
            source: Some((self.generation, source)),
            buffer: Some(back),
            camera: self.last_sent_pose,
            int_indices: Some(self.config.index_format == IndexFormat::U32),
        };
        let sent = self.send(request);
        if sent {
            self.phase = if self.last_sent_pose.is_some() {
                SortPhase::Sorting
            } else {
                SortPhase::Armed
            };
        }
        sent
    }

    /// Forward a camera pose (in the splats' space). Poses within epsilon of the last one
    /// sent are dropped here; returns whether a message went out.
    pub fn set_camera(&mut self, pose: CameraPose) -> bool {
        if self.sender.is_none() {
            return false;
        }
        if let Some(last) = self.last_sent_pose {
            if !pose.differs_from(&last, self.config.epsilon) {
                return false;
            }
        }
        self.last_sent_pose = Some(pose);
        let sent = self.send(SortRequest::camera(pose));
        if sent && self.generation > 0 {
            self.phase = SortPhase::Sorting;
        }
        sent
    }

    /// Adopt the newest published order, if any. Never blocks.
    pub fn poll(&mut self) -> Option<&OrderBuffer> {
        let mut newest: Option<SortResponse> = None;
        loop {
            match self.receiver.try_recv() {
                Ok(response) if response.generation == self.generation => {
                    if let Some(older) = newest.replace(response) {
                        self.return_buffer(older.buffer);
                    }
                }
                Ok(stale) => debug!("Dropping order from data generation {}", stale.generation),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.mark_disconnected();
                    break;
                }
            }
        }
        let response = newest?;
        self.publish(response);
        self.front.as_ref()
    }

    /// Block up to `timeout` for a new order. Meant for offline rendering and tests.
    pub fn wait_for_update(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(response) if response.generation == self.generation => {
                    self.publish(response);
                    // Pick up anything that landed right behind it
                    self.poll();
                    return true;
                }
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => {
                    self.mark_disconnected();
                    return false;
                }
            }
        }
    }

    fn publish(&mut self, response: SortResponse) {
        let SortResponse {
            buffer, pass, pose, ..
        } = response;
        if let Some(previous) = self.front.replace(buffer) {
            self.return_buffer(previous);
        }
        self.last_published = Some((pass, pose));
        if self.phase != SortPhase::Disconnected {
            self.phase = SortPhase::Published;
        }
    }

    fn return_buffer(&mut self, buffer: OrderBuffer) {
        self.send(SortRequest::buffer(buffer));
    }

    fn send(&mut self, request: SortRequest) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.send(request) {
            Ok(()) => {
                self.messages_sent += 1;
                true
            }
            Err(_) => {
                self.mark_disconnected();
                false
            }
        }
    }

    fn mark_disconnected(&mut self) {
        // A shut-down manager expects its worker to go away
        if self.sender.is_none() {
            return;
        }
        self.phase = SortPhase::Disconnected;
        if !self.disconnect_warned {
            self.disconnect_warned = true;
            warn!("Splat sort worker disconnected, keeping the last published order");
        }
    }

    /// Order the renderer should draw now
    pub fn front(&self) -> Option<&OrderBuffer> {
        self.front.as_ref()
    }

    pub fn phase(&self) -> SortPhase {
        self.phase
    }

    /// Pass number and pose of the order in the front buffer
    pub fn last_published(&self) -> Option<(u64, CameraPose)> {
        self.last_published
    }

    /// Messages sent to the worker (data, poses and returned buffers)
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.is_none()
    }

    /// Stop forwarding updates. An in-flight pass finishes on its own and is discarded.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_some() {
            debug!("Sort manager shut down");
        }
    }
}

/// Worker thread entry point: coalesce queued messages, then run at most one pass
fn run_worker(
    mut worker: SortWorker,
    requests: Receiver<SortRequest>,
    responses: Sender<SortResponse>,
) {
    while let Ok(request) = requests.recv() {
        worker.apply(request);
        while let Ok(request) = requests.try_recv() {
            worker.apply(request);
        }
        if let Some(response) = worker.run_pass() {
            if responses.send(response).is_err() {
                break;
            }
        }
    }
    debug!("Splat sort worker exiting after {} passes", worker.passes());
}
