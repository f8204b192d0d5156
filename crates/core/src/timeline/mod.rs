use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    Applied, AvatarSession, PlaybackConfig, Result, SettingsRequest, SourceOpener, Surface,
};

/// Wall clock measured from a single fixed origin.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    origin: Instant,
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.origin = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Fixed-rate ticker that sleeps out whatever remains of each period.
///
/// A tick that overruns its period is not made up for; the next wait simply
/// returns without sleeping.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    last: Instant,
}

impl Ticker {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            period: Duration::from_nanos(1_000_000_000 / u64::from(rate_hz.max(1))),
            last: Instant::now(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Sleeps until one period has passed since the previous call and
    /// returns how long it slept.
    pub fn wait(&mut self) -> Duration {
        let target = self.last + self.period;
        let now = Instant::now();
        let slept = if target > now {
            let remaining = target - now;
            thread::sleep(remaining);
            remaining
        } else {
            Duration::ZERO
        };
        self.last = Instant::now();
        slept
    }
}

/// Input the playback loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Quit,
    Reconfigure(SettingsRequest),
}

/// Source of user input, drained once per tick on the playback thread.
pub trait EventSource {
    /// Everything that arrived since the previous call. An error ends the
    /// loop.
    fn drain(&mut self) -> Result<Vec<PlayerEvent>>;

    /// Reports the outcome of a [`PlayerEvent::Reconfigure`] back to whoever
    /// asked for it, together with the settings now in effect.
    fn settings_applied(&mut self, _current: SettingsRequest, _result: &Result<Applied>) {}
}

/// What happened on a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented,
    /// The source had no frame; the previous one stays on screen.
    NoFrame,
    PresentFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickStats {
    pub ticks: u64,
    pub presented: u64,
    pub no_frame: u64,
    pub present_failed: u64,
}

impl TickStats {
    fn record(&mut self, outcome: TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Presented => self.presented += 1,
            TickOutcome::NoFrame => self.no_frame += 1,
            TickOutcome::PresentFailed => self.present_failed += 1,
        }
    }
}

/// The real-time playback loop.
///
/// Each tick reads the published stage, asks that stage's source for the
/// frame at the elapsed time and presents it scaled to the window. Elapsed
/// time comes from one origin, so late or skipped ticks never shift the
/// loops; they just land further along them.
#[derive(Debug)]
pub struct Scheduler {
    clock: PlaybackClock,
    ticker: Ticker,
    stats: TickStats,
}

impl Scheduler {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            clock: PlaybackClock::start(),
            ticker: Ticker::new(config.target_fps),
            stats: TickStats::default(),
        }
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// Runs one tick at `elapsed` seconds.
    pub fn tick<O, D>(&mut self, session: &mut AvatarSession<O, D>, elapsed: f64) -> TickOutcome
    where
        O: SourceOpener,
        D: Surface,
    {
        let outcome = match session.current_frame(elapsed) {
            None => TickOutcome::NoFrame,
            Some(frame) => match session.present(&frame) {
                Ok(()) => TickOutcome::Presented,
                Err(err) => {
                    tracing::warn!(%err, elapsed, "failed to present frame");
                    TickOutcome::PresentFailed
                }
            },
        };
        self.stats.record(outcome);
        outcome
    }

    /// Ticks until a quit event arrives or `events` fails.
    ///
    /// Settings requests are applied between ticks, so the source set and
    /// the surface are never swapped while a frame is in flight.
    pub fn run<O, D, E>(&mut self, session: &mut AvatarSession<O, D>, events: &mut E) -> Result<TickStats>
    where
        O: SourceOpener,
        D: Surface,
        E: EventSource,
    {
        self.clock.reset();
        self.ticker.reset();
        tracing::info!(period = ?self.ticker.period(), "playback started");

        loop {
            for event in events.drain()? {
                match event {
                    PlayerEvent::Quit => {
                        tracing::info!(stats = ?self.stats, "playback stopped");
                        return Ok(self.stats);
                    }
                    PlayerEvent::Reconfigure(request) => {
                        let result = session.reconfigure(request);
                        events.settings_applied(session.settings(), &result);
                    }
                }
            }

            let elapsed = self.clock.elapsed_seconds();
            self.tick(session, elapsed);
            self.ticker.wait();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(&PlaybackConfig::default())
    }
}
