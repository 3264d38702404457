//! Frame loop: replays a scenario into a started logger.
//!
//! Each frame collects the signals due up to the frame's end time, lets
//! the host decide which of them it would report, steps the logger, then
//! applies any grasp pauses that have come due. The loop stops when the
//! scenario duration is reached or a stop is requested.

use std::iter::Peekable;
use std::slice::Iter;
use std::sync::atomic::{AtomicBool, Ordering};

use semlog_core::config::EngineConfig;
use semlog_core::{EventSink, IndividualRegistry, SymbolicLogger};
use semlog_types::{EntityHandle, RawOverlapSignal};
use tracing::{debug, info};

use crate::host::ScriptedHost;
use crate::scenario::{PauseSpec, Scenario, SignalSpec};

/// Logger as driven by the engine.
pub type EngineLogger<S> = SymbolicLogger<IndividualRegistry, ScriptedHost, S>;

/// Why the frame loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Session time reached the scenario duration.
    ScenarioComplete,
    /// A stop was requested (Ctrl-C).
    Interrupted,
}

impl RunEnd {
    /// Whether the session should be finished as forced.
    pub const fn forced(self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Outcome of one frame loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunResult {
    /// Why the loop stopped.
    pub end: RunEnd,
    /// Frames stepped.
    pub frames: u64,
    /// Signals the host delivered to the logger.
    pub delivered: u64,
}

/// Cursor over a scenario's time-ordered signals and pauses.
struct Playback<'a> {
    signals: Peekable<Iter<'a, SignalSpec>>,
    pauses: Peekable<Iter<'a, PauseSpec>>,
}

impl<'a> Playback<'a> {
    fn new(scenario: &'a Scenario) -> Self {
        Self {
            signals: scenario.signals.iter().peekable(),
            pauses: scenario.pauses.iter().peekable(),
        }
    }

    fn signals_until(&mut self, until: f64) -> Vec<RawOverlapSignal> {
        let mut due = Vec::new();
        while let Some(spec) = self.signals.next_if(|s| s.t <= until) {
            due.push(spec.to_signal());
        }
        due
    }

    fn pauses_until(&mut self, until: f64) -> Vec<PauseSpec> {
        let mut due = Vec::new();
        while let Some(spec) = self.pauses.next_if(|p| p.t <= until) {
            due.push(*spec);
        }
        due
    }
}

/// Step `logger` through `scenario` until it completes or `stop` is set.
///
/// The logger must already be started; finishing it is left to the caller.
pub async fn run_session<S: EventSink>(
    logger: &mut EngineLogger<S>,
    scenario: &Scenario,
    engine: &EngineConfig,
    stop: &AtomicBool,
) -> RunResult {
    let mut playback = Playback::new(scenario);
    let mut frames: u64 = 0;
    let mut delivered: u64 = 0;

    info!(
        duration = scenario.duration,
        frame_dt = engine.frame_dt,
        frame_interval_ms = engine.frame_interval_ms,
        signals = scenario.signals.len(),
        "Playback starting"
    );

    let end = loop {
        if stop.load(Ordering::Relaxed) {
            info!(session_time = logger.now(), "Stop requested");
            break RunEnd::Interrupted;
        }
        if logger.now() >= scenario.duration {
            break RunEnd::ScenarioComplete;
        }

        let until = logger.now() + engine.frame_dt;
        let due = playback.signals_until(until);
        let reported = logger.host_mut().observe(&due);
        delivered = delivered.saturating_add(u64::try_from(reported.len()).unwrap_or(u64::MAX));
        logger.step(engine.frame_dt, &reported);
        frames = frames.saturating_add(1);

        for pause in playback.pauses_until(logger.now()) {
            debug!(owner = pause.owner, paused = pause.paused, "Applying grasp pause");
            logger.set_grasp_paused(EntityHandle(pause.owner), pause.paused);
        }

        if engine.frame_interval_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(engine.frame_interval_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }
    };

    info!(
        ?end,
        frames,
        delivered,
        session_time = logger.now(),
        next_sweep = ?logger.next_sweep(),
        "Playback ended"
    );
    RunResult {
        end,
        frames,
        delivered,
    }
}
