//! Player control loop and its public handle.
//!
//! One worker thread owns the whole pipeline: it opens the output device,
//! opens playlist entries, decodes and converts audio, and feeds the bounded
//! queue. Transport commands arrive over a channel and are drained between
//! decode iterations, so they are applied in submission order and never touch
//! the pipeline mid-buffer.
//!
//! The output stream is not `Send` on most backends, so the device is built
//! on the worker thread via a factory closure; open failures are reported
//! back to [`AudioPlayer::start`] through a one-shot channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::config::PlayerConfig;
use crate::decoder::Decoder;
use crate::device::OutputDevice;
use crate::error::PlayerError;
use crate::events::Notification;
use crate::filter::FilterChain;
use crate::format::AudioFormat;
use crate::queue::{ElementQueue, QueueElement};
use crate::render::{PlaybackPosition, RenderState, SharedRender};

/// Transport command, consumed strictly in submission order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// Relative seek in seconds; negative values rewind.
    Seek(f64),
    /// Abandon the current track and open the next playlist entry.
    Next,
    /// Shut the pipeline down.
    Exit,
}

/// Builds the output device on the worker thread.
pub type DeviceFactory = Box<dyn FnOnce() -> Box<dyn OutputDevice> + Send>;

/// Opens a playlist entry as a decoder. Per-track failures are skipped.
pub type OpenFn = Box<dyn FnMut(&Path) -> Result<Box<dyn Decoder>, PlayerError> + Send>;

pub struct AudioPlayer;

impl AudioPlayer {
    /// Spawn the control thread and open the output device on it.
    ///
    /// Returns once the device has opened, so initialization failures surface
    /// here rather than asynchronously.
    pub fn start(
        config: PlayerConfig,
        device_fn: DeviceFactory,
        open_fn: OpenFn,
    ) -> Result<PlayerHandle, PlayerError> {
        let (cmd_tx, cmd_rx) = unbounded();
        let (track_tx, track_rx) = unbounded();
        let (notify_tx, notify_rx) = unbounded();
        let (init_tx, init_rx) = bounded(1);

        let queue = Arc::new(ElementQueue::new(config.queue_capacity));
        let position = Arc::new(PlaybackPosition::default());
        let position_handle = position.clone();

        let join = thread::Builder::new()
            .name("player-control".into())
            .spawn(move || {
                let mut device = device_fn();
                let render = RenderState::shared(queue.clone(), position.clone(), notify_tx.clone());
                let dst_format = match device.open(render.clone()) {
                    Ok(fmt) => {
                        let _ = init_tx.send(Ok(()));
                        fmt
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                control_loop(ControlContext {
                    device,
                    open_fn,
                    config,
                    dst_format,
                    cmd_rx,
                    track_rx,
                    queue,
                    render,
                    position,
                    notify_tx,
                });
            })
            .map_err(|e| PlayerError::DeviceInit(format!("spawn control thread: {e}")))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(PlayerHandle {
                cmd_tx,
                track_tx,
                notify_rx,
                position: position_handle,
                join: Some(join),
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(PlayerError::DeviceInit(
                    "control thread exited during startup".into(),
                ))
            }
        }
    }
}

/// Owner-side handle to a running player.
///
/// All methods are non-blocking and callable from any thread. Dropping the
/// handle requests exit and joins the control thread.
pub struct PlayerHandle {
    cmd_tx: Sender<Command>,
    track_tx: Sender<PathBuf>,
    notify_rx: Receiver<Notification>,
    position: Arc<PlaybackPosition>,
    join: Option<thread::JoinHandle<()>>,
}

impl PlayerHandle {
    /// Append a playlist entry. Picked up when the current track ends or on
    /// [`request_next`](Self::request_next).
    pub fn enqueue_track(&self, path: impl Into<PathBuf>) {
        let _ = self.track_tx.send(path.into());
    }

    pub fn request_seek(&self, seconds: f64) {
        let _ = self.cmd_tx.send(Command::Seek(seconds));
    }

    pub fn request_next(&self) {
        let _ = self.cmd_tx.send(Command::Next);
    }

    pub fn request_exit(&self) {
        let _ = self.cmd_tx.send(Command::Exit);
    }

    /// Outbound notifications in emission order.
    pub fn notifications(&self) -> &Receiver<Notification> {
        &self.notify_rx
    }

    /// Last position the callback began playing, in source frames.
    pub fn position_frames(&self) -> u64 {
        self.position.load()
    }

    /// Block until the control thread finishes.
    pub fn join(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Exit);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

struct OpenStream {
    decoder: Box<dyn Decoder>,
    chain: FilterChain,
    /// Decoded audio that could not be enqueued yet because the queue was
    /// full; retried next iteration so commands stay responsive.
    pending: Option<QueueElement>,
    total_published: bool,
}

struct ControlContext {
    device: Box<dyn OutputDevice>,
    open_fn: OpenFn,
    config: PlayerConfig,
    dst_format: AudioFormat,
    cmd_rx: Receiver<Command>,
    track_rx: Receiver<PathBuf>,
    queue: Arc<ElementQueue>,
    render: SharedRender,
    position: Arc<PlaybackPosition>,
    notify_tx: Sender<Notification>,
}

fn control_loop(mut ctx: ControlContext) {
    let full_backoff = Duration::from_millis(ctx.config.full_backoff_ms);
    let idle = Duration::from_millis(ctx.config.idle_sleep_ms);

    let mut stream: Option<OpenStream> = None;
    // Set while a seek has been applied but no buffer decoded since; duplicate
    // seeks arriving in that window are ignored.
    let mut jumped = false;
    // A stream ended; report the stop once the playlist and the queued audio
    // are both exhausted.
    let mut stop_pending = false;

    ctx.device.start();

    'outer: loop {
        while let Ok(cmd) = ctx.cmd_rx.try_recv() {
            match cmd {
                Command::Exit => break 'outer,
                Command::Next => {
                    // The queue drains naturally; only the decode side stops.
                    stream = None;
                    jumped = false;
                    stop_pending = true;
                    tracing::info!("advancing to next track");
                }
                Command::Seek(seconds) => {
                    if jumped {
                        tracing::debug!(seconds, "seek ignored, previous seek still settling");
                        continue;
                    }
                    let Some(s) = stream.as_mut() else { continue };
                    if apply_seek(&mut ctx, s, seconds) {
                        jumped = true;
                    }
                }
            }
        }

        let Some(s) = stream.as_mut() else {
            match ctx.track_rx.try_recv() {
                Ok(path) => {
                    stream = open_track(&mut ctx, &path);
                    if stream.is_some() {
                        jumped = false;
                        stop_pending = false;
                    }
                }
                Err(_) => {
                    if stop_pending && playback_finished(&ctx) {
                        stop_pending = false;
                        let _ = ctx.notify_tx.send(Notification::PlaybackStop);
                    }
                    thread::sleep(idle);
                }
            }
            continue;
        };

        // Unknown-length streams may report their length late; retry until
        // the decoder supplies it so the update rides the queue in order.
        if !s.total_published {
            if let Some(frames) = s.decoder.total_frames() {
                let rate = s.decoder.audio_format().rate;
                if rate > 0 {
                    let secs = frames as f64 / rate as f64;
                    if ctx.queue.try_push(QueueElement::TotalTime(secs)).is_ok() {
                        s.total_published = true;
                    }
                } else {
                    s.total_published = true;
                }
            }
        }

        if s.pending.is_none() {
            if ctx.queue.len() >= ctx.queue.capacity() {
                ctx.queue.wait_for_space(full_backoff);
                continue;
            }
            match s.chain.read(s.decoder.as_mut()) {
                Ok(buf) if buf.is_empty() => {
                    tracing::debug!("end of stream");
                    stream = None;
                    stop_pending = true;
                    continue;
                }
                Ok(buf) => s.pending = Some(QueueElement::Audio(buf)),
                Err(e) => {
                    tracing::warn!("decode failed, skipping track: {e}");
                    stream = None;
                    stop_pending = true;
                    continue;
                }
            }
        }

        if let Some(element) = s.pending.take() {
            match ctx.queue.try_push(element) {
                Ok(()) => jumped = false,
                Err(back) => {
                    s.pending = Some(back);
                    ctx.queue.wait_for_space(full_backoff);
                }
            }
        }
    }

    ctx.queue.close();
    ctx.device.pause();
    ctx.device.close();
    let _ = ctx.notify_tx.send(Notification::PlaybackStop);
}

fn open_track(ctx: &mut ControlContext, path: &Path) -> Option<OpenStream> {
    let decoder = match (ctx.open_fn)(path) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(path = %path.display(), "skipping track: {e}");
            return None;
        }
    };
    let chain = match FilterChain::new(&*decoder, ctx.dst_format, ctx.config.gain) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), "unsupported track: {e}");
            return None;
        }
    };
    tracing::info!(
        path = %path.display(),
        rate = decoder.audio_format().rate,
        channels = decoder.audio_format().channels,
        "track opened"
    );
    if let Some(meta) = decoder.metadata() {
        push_waiting(ctx, QueueElement::Metadata(meta));
    }
    Some(OpenStream {
        decoder,
        chain,
        pending: None,
        total_published: false,
    })
}

/// `true` once nothing audible remains: no queued elements and no partially
/// consumed buffer held by the callback.
fn playback_finished(ctx: &ControlContext) -> bool {
    if !ctx.queue.is_empty() {
        return false;
    }
    match ctx.render.lock() {
        Ok(render) => !render.is_draining(),
        Err(_) => true,
    }
}

/// Push a non-audio element, backing off while the queue is full.
fn push_waiting(ctx: &ControlContext, mut element: QueueElement) {
    let backoff = Duration::from_millis(ctx.config.full_backoff_ms);
    loop {
        match ctx.queue.try_push(element) {
            Ok(()) => return,
            Err(back) => {
                if ctx.queue.is_closed() {
                    return;
                }
                element = back;
                ctx.queue.wait_for_space(backoff);
            }
        }
    }
}

/// Run the seek protocol. Returns `true` when the decoder repositioned.
///
/// Order matters: pause the device first so the callback stops consuming,
/// then drain the queue (keeping non-audio elements), anchor on the earliest
/// discarded position, reposition the decoder, publish the new position, and
/// only then resume the device.
fn apply_seek(ctx: &mut ControlContext, s: &mut OpenStream, seconds: f64) -> bool {
    ctx.device.pause();
    s.pending = None;

    let in_flight = match ctx.render.lock() {
        Ok(mut render) => render.take_current().map(|b| b.position_at_cursor()),
        Err(_) => None,
    };
    let queued = ctx.queue.discard_audio();
    let anchor = in_flight.or(queued).unwrap_or_else(|| ctx.position.load());

    let rate = s.decoder.audio_format().rate as f64;
    let target = (anchor as f64 + seconds * rate).max(0.0) as u64;

    let ok = s.decoder.seek(target);
    if ok {
        s.chain.flush();
        ctx.position.store(target);
        tracing::info!(anchor, target, seconds, "seek applied");
    } else {
        tracing::warn!(anchor, target, seconds, "decoder refused seek");
    }

    ctx.device.start();
    ok
}
