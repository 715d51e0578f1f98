// src/frame.rs
//! Scene/frame controller: mono and VR deferred queues plus the VR pass state machine.
//!
//! - `flush`: mono queue, one replay per call
//! - `flush_vr`: per-eye VR, called once per eye; swaps on the left eye and
//!   clears after the right eye, so each batch replays twice
//! - `flush_vr_single_pass`: one call replays the VR batch for both eyes,
//!   switching the viewport between them
//! - Shutdown: while a pipeline's counter is positive its flushes discard
//!   their batch and count down

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::command_buffer::{DeferredQueue, QueueStats};

pub const DEFAULT_SHUTDOWN_GRACE: u32 = 2;

// ---------- Pass state ----------

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl Eye {
    pub fn index(self) -> usize {
        self as usize
    }

    fn from_u8(raw: u8) -> Self {
        if raw == 0 {
            Eye::Left
        } else {
            Eye::Right
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Mono,
    Vr,
}

impl Pipeline {
    pub fn from_vr(vr: bool) -> Self {
        if vr {
            Pipeline::Vr
        } else {
            Pipeline::Mono
        }
    }
}

/// Which flush is replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Mono,
    VrEye(Eye),
    VrSinglePass,
}

/// Handed to every executed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassInfo {
    pub state: FrameState,
    /// Per-eye VR pass counter at execution time.
    pub vr_pass: Eye,
    /// Eye being replayed by the single-pass flush (last value otherwise).
    pub stereo_eye: Eye,
}

impl PassInfo {
    /// Eye selected by the counter a command asked for.
    pub fn eye(&self, single_pass: bool) -> Eye {
        if single_pass {
            self.stereo_eye
        } else {
            self.vr_pass
        }
    }
}

/// Where replayed commands land: the render context of the flushing thread.
pub trait PassTarget<C> {
    /// Start of every flush call, before any command (depth state etc).
    fn begin_pass(&mut self);

    /// Single-pass stereo: called before each eye's replay.
    fn set_eye_viewport(&mut self, eye: Eye);

    fn execute(&mut self, command: &C, pass: &PassInfo);

    fn end_pass(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub executed: usize,
    pub discarded: usize,
}

// ---------- Render events ----------

/// Integer codes the host render thread passes to the event callback.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    Flush = 0,
    FlushVr = 1,
    FlushVrSinglePass = 2,
}

impl TryFrom<i32> for RenderEvent {
    type Error = i32;

    fn try_from(code: i32) -> std::result::Result<Self, i32> {
        match code {
            0 => Ok(RenderEvent::Flush),
            1 => Ok(RenderEvent::FlushVr),
            2 => Ok(RenderEvent::FlushVrSinglePass),
            other => Err(other),
        }
    }
}

// ---------- Controller ----------

pub struct FrameController<C> {
    mono: DeferredQueue<C>,
    vr: DeferredQueue<C>,
    vr_pass: AtomicU8,
    stereo_eye: AtomicU8,
    shutdown: AtomicU32,
    shutdown_vr: AtomicU32,
    vr_enabled: AtomicBool,
}

impl<C> Default for FrameController<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> FrameController<C> {
    pub fn new() -> Self {
        Self {
            mono: DeferredQueue::new("mono"),
            vr: DeferredQueue::new("vr"),
            vr_pass: AtomicU8::new(0),
            stereo_eye: AtomicU8::new(0),
            shutdown: AtomicU32::new(0),
            shutdown_vr: AtomicU32::new(0),
            vr_enabled: AtomicBool::new(false),
        }
    }

    pub fn queue(&self, pipeline: Pipeline) -> &DeferredQueue<C> {
        match pipeline {
            Pipeline::Mono => &self.mono,
            Pipeline::Vr => &self.vr,
        }
    }

    pub fn begin_scene(&self, vr: bool) {
        self.queue(Pipeline::from_vr(vr)).begin_scene();
    }

    pub fn end_scene(&self, vr: bool) {
        self.queue(Pipeline::from_vr(vr)).end_scene();
    }

    pub fn push(&self, vr: bool, command: C) {
        self.queue(Pipeline::from_vr(vr)).push(command);
    }

    pub fn vr_pass(&self) -> Eye {
        Eye::from_u8(self.vr_pass.load(Ordering::Acquire))
    }

    pub fn stereo_eye(&self) -> Eye {
        Eye::from_u8(self.stereo_eye.load(Ordering::Acquire))
    }

    pub fn reset_vr_pass(&self) {
        self.vr_pass.store(0, Ordering::Release);
    }

    pub fn set_vr_enabled(&self, enabled: bool) {
        self.vr_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn vr_enabled(&self) -> bool {
        self.vr_enabled.load(Ordering::Relaxed)
    }

    /// Discard the next `grace` flushes of each pipeline and restart the VR pass.
    pub fn signal_shutdown(&self, grace: u32) {
        self.shutdown.store(grace, Ordering::Release);
        self.shutdown_vr.store(grace, Ordering::Release);
        self.reset_vr_pass();
    }

    pub fn shutdown_remaining(&self, pipeline: Pipeline) -> u32 {
        match pipeline {
            Pipeline::Mono => self.shutdown.load(Ordering::Acquire),
            Pipeline::Vr => self.shutdown_vr.load(Ordering::Acquire),
        }
    }

    pub fn metrics(&self, pipeline: Pipeline) -> QueueStats {
        self.queue(pipeline).metrics()
    }

    /// Drop every pending command on both pipelines.
    pub fn clear(&self) {
        self.mono.clear();
        self.vr.clear();
    }

    fn pass_info(&self, state: FrameState) -> PassInfo {
        PassInfo {
            state,
            vr_pass: self.vr_pass(),
            stereo_eye: self.stereo_eye(),
        }
    }

    /// Mono flush: swap, replay once, clear.
    #[tracing::instrument(level = "debug", skip_all, fields(queue = "mono"))]
    pub fn flush<T: PassTarget<C>>(&self, target: &mut T) -> FlushReport {
        self.mono.swap();
        target.begin_pass();

        let report = if take_grace(&self.shutdown) {
            FlushReport {
                executed: 0,
                discarded: self.mono.skip(),
            }
        } else {
            let pass = self.pass_info(FrameState::Mono);
            FlushReport {
                executed: self.mono.replay(|c| target.execute(c, &pass)),
                discarded: 0,
            }
        };

        self.mono.clear_back();
        self.mono.record_flush();
        target.end_pass();
        report
    }

    /// Per-eye VR flush. The left-eye call swaps, the right-eye call clears,
    /// and every call advances the pass counter 0 -> 1 -> 0.
    #[tracing::instrument(level = "debug", skip_all, fields(queue = "vr", eye = ?self.vr_pass()))]
    pub fn flush_vr<T: PassTarget<C>>(&self, target: &mut T) -> FlushReport {
        let eye = self.vr_pass();
        if eye == Eye::Left {
            self.vr.swap();
        }
        target.begin_pass();

        let report = if take_grace(&self.shutdown_vr) {
            FlushReport {
                executed: 0,
                discarded: self.vr.skip(),
            }
        } else {
            let pass = self.pass_info(FrameState::VrEye(eye));
            FlushReport {
                executed: self.vr.replay(|c| target.execute(c, &pass)),
                discarded: 0,
            }
        };

        if eye == Eye::Right {
            self.vr.clear_back();
        }
        let next = match eye {
            Eye::Left => Eye::Right,
            Eye::Right => Eye::Left,
        };
        self.vr_pass.store(next as u8, Ordering::Release);
        self.vr.record_flush();
        target.end_pass();
        report
    }

    /// Single-pass stereo: one swap, the batch replayed for the left then the right eye.
    /// Shares the VR queue, so it also spends the VR shutdown grace, not the mono one.
    #[tracing::instrument(level = "debug", skip_all, fields(queue = "vr_single_pass"))]
    pub fn flush_vr_single_pass<T: PassTarget<C>>(&self, target: &mut T) -> FlushReport {
        self.vr.swap();
        target.begin_pass();

        let mut report = FlushReport::default();
        if take_grace(&self.shutdown_vr) {
            report.discarded = self.vr.skip();
        } else {
            for eye in [Eye::Left, Eye::Right] {
                self.stereo_eye.store(eye as u8, Ordering::Release);
                target.set_eye_viewport(eye);
                let pass = self.pass_info(FrameState::VrSinglePass);
                report.executed += self.vr.replay(|c| target.execute(c, &pass));
            }
        }

        self.vr.clear_back();
        self.vr.record_flush();
        target.end_pass();
        report
    }
}

/// Decrement a positive shutdown counter. `true` means this flush is discarded.
fn take_grace(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        passes: usize,
        viewports: Vec<Eye>,
        ran: Vec<(u32, PassInfo)>,
    }

    impl PassTarget<u32> for Recorder {
        fn begin_pass(&mut self) {
            self.passes += 1;
        }

        fn set_eye_viewport(&mut self, eye: Eye) {
            self.viewports.push(eye);
        }

        fn execute(&mut self, command: &u32, pass: &PassInfo) {
            self.ran.push((*command, *pass));
        }
    }

    impl Recorder {
        fn commands(&self) -> Vec<u32> {
            self.ran.iter().map(|(c, _)| *c).collect()
        }
    }

    fn enqueue(frames: &FrameController<u32>, vr: bool, commands: &[u32]) {
        frames.begin_scene(vr);
        for &c in commands {
            frames.push(vr, c);
        }
        frames.end_scene(vr);
    }

    #[test]
    fn mono_flush_runs_each_command_once_in_order() {
        let frames = FrameController::new();
        enqueue(&frames, false, &[1, 2, 3]);

        let mut target = Recorder::default();
        let report = frames.flush(&mut target);
        assert_eq!(report, FlushReport { executed: 3, discarded: 0 });
        assert_eq!(target.commands(), vec![1, 2, 3]);
        assert_eq!(target.passes, 1);

        // nothing left for the next flush
        assert_eq!(frames.flush(&mut target).executed, 0);
        assert_eq!(target.passes, 2);
    }

    #[test]
    fn per_eye_vr_replays_batch_for_both_eyes() {
        let frames = FrameController::new();
        enqueue(&frames, true, &[7, 8]);

        let mut target = Recorder::default();
        frames.flush_vr(&mut target);
        assert_eq!(frames.vr_pass(), Eye::Right);

        // enqueued between the eyes: belongs to the next frame
        enqueue(&frames, true, &[9]);
        frames.flush_vr(&mut target);
        assert_eq!(frames.vr_pass(), Eye::Left);

        assert_eq!(target.commands(), vec![7, 8, 7, 8]);
        let eyes: Vec<_> = target.ran.iter().map(|(_, p)| p.state).collect();
        assert_eq!(
            eyes,
            vec![
                FrameState::VrEye(Eye::Left),
                FrameState::VrEye(Eye::Left),
                FrameState::VrEye(Eye::Right),
                FrameState::VrEye(Eye::Right),
            ]
        );

        target.ran.clear();
        frames.flush_vr(&mut target);
        assert_eq!(target.commands(), vec![9]);
    }

    #[test]
    fn single_pass_replays_left_then_right() {
        let frames = FrameController::new();
        enqueue(&frames, true, &[1, 2]);

        let mut target = Recorder::default();
        let report = frames.flush_vr_single_pass(&mut target);
        assert_eq!(report.executed, 4);
        assert_eq!(target.viewports, vec![Eye::Left, Eye::Right]);

        let order: Vec<_> = target.ran.iter().map(|(c, p)| (*c, p.stereo_eye)).collect();
        assert_eq!(
            order,
            vec![(1, Eye::Left), (2, Eye::Left), (1, Eye::Right), (2, Eye::Right)]
        );
        assert_eq!(frames.queue(Pipeline::Vr).back_len(), 0);
    }

    #[test]
    fn shutdown_discards_two_flushes_per_pipeline() {
        let frames = FrameController::new();
        let mut target = Recorder::default();
        frames.flush_vr(&mut target);
        assert_eq!(frames.vr_pass(), Eye::Right);

        frames.signal_shutdown(DEFAULT_SHUTDOWN_GRACE);
        assert_eq!(frames.vr_pass(), Eye::Left);

        for _ in 0..2 {
            enqueue(&frames, false, &[1]);
            let report = frames.flush(&mut target);
            assert_eq!(report, FlushReport { executed: 0, discarded: 1 });
        }
        enqueue(&frames, false, &[2]);
        assert_eq!(frames.flush(&mut target).executed, 1);
        assert_eq!(target.commands(), vec![2]);

        for _ in 0..2 {
            enqueue(&frames, true, &[3]);
            assert_eq!(frames.flush_vr_single_pass(&mut target).executed, 0);
        }
        enqueue(&frames, true, &[4]);
        assert_eq!(frames.flush_vr_single_pass(&mut target).executed, 2);

        let mono = frames.metrics(Pipeline::Mono);
        assert_eq!(mono.discarded, 2);
        assert_eq!(mono.flushes, 3);
    }

    #[test]
    fn shutdown_discards_first_eye_pair() {
        let frames = FrameController::new();
        let mut target = Recorder::default();
        frames.signal_shutdown(DEFAULT_SHUTDOWN_GRACE);

        let mut executed = Vec::new();
        for batch in 1..=3 {
            enqueue(&frames, true, &[batch]);
            executed.push(frames.flush_vr(&mut target).executed);
            executed.push(frames.flush_vr(&mut target).executed);
        }
        assert_eq!(executed, vec![0, 0, 1, 1, 1, 1]);
        assert_eq!(target.commands(), vec![2, 2, 3, 3]);
        assert_eq!(frames.shutdown_remaining(Pipeline::Vr), 0);
        assert_eq!(frames.shutdown_remaining(Pipeline::Mono), DEFAULT_SHUTDOWN_GRACE);
    }

    #[test]
    fn reset_vr_pass_restarts_at_left_eye() {
        let frames = FrameController::new();
        let mut target = Recorder::default();
        enqueue(&frames, true, &[1]);
        frames.flush_vr(&mut target);
        frames.reset_vr_pass();

        // left eye again: swaps in the (empty) next batch
        assert_eq!(frames.flush_vr(&mut target).executed, 0);
    }

    #[test]
    fn render_event_codes() {
        assert_eq!(RenderEvent::try_from(0), Ok(RenderEvent::Flush));
        assert_eq!(RenderEvent::try_from(2), Ok(RenderEvent::FlushVrSinglePass));
        assert_eq!(RenderEvent::try_from(5), Err(5));
    }

    #[test]
    fn engine_thread_enqueues_while_render_thread_flushes() {
        let frames = Arc::new(FrameController::new());
        let producer = {
            let frames = Arc::clone(&frames);
            thread::spawn(move || {
                for frame in 0..50u32 {
                    enqueue(&frames, false, &[frame * 2, frame * 2 + 1]);
                }
            })
        };

        let mut target = Recorder::default();
        let mut executed = 0;
        while executed < 100 {
            executed += frames.flush(&mut target).executed;
            if producer.is_finished() && frames.queue(Pipeline::Mono).front_len() == 0 {
                executed += frames.flush(&mut target).executed;
                break;
            }
        }
        producer.join().unwrap();
        executed += frames.flush(&mut target).executed;

        assert_eq!(executed, 100);
        // whole frames only, in order
        assert_eq!(target.commands(), (0..100u32).collect::<Vec<_>>());
    }
}
