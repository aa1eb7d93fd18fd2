//! Render/skip decisions for each frame.
//!
//! Emulation always runs; only the render phase is optional. Two policies
//! are available behind `SkipPolicy`:
//!
//! - `PatternSkip`: a fixed repeating mask per `FrameskipLevel`, fully
//!   deterministic.
//! - `AdaptiveSkip`: tracks how far behind real time the emulation core is
//!   (the backlog) and an exponential average of render cost, and skips while
//!   the backlog is large relative to one render.
//!
//! `FrameSkipController` wraps either policy with the rules that hold for
//! both: a cap on consecutive skips and a forced render whenever the
//! scheduler asks for one (video mode change).

use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};

/// Deterministic frame-skip levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameskipLevel {
    /// Render every frame
    None,
    /// Render 4 of every 6 frames
    Low,
    /// Render every other frame
    Medium,
    /// Render every third frame
    #[default]
    High,
    /// Render 1 of every 5 frames
    Extreme,
}

impl FrameskipLevel {
    /// `(mask, period)`: bit `i` set means frame `i` of each period renders.
    pub fn pattern(self) -> (u32, u32) {
        match self {
            FrameskipLevel::None => (0b11_1111, 6),
            FrameskipLevel::Low => (0b01_1011, 6),
            FrameskipLevel::Medium => (0b01_0101, 6),
            FrameskipLevel::High => (0b00_1001, 6),
            FrameskipLevel::Extreme => (0b0_0001, 5),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "0" => Some(FrameskipLevel::None),
            "low" | "1" => Some(FrameskipLevel::Low),
            "medium" | "2" => Some(FrameskipLevel::Medium),
            "high" | "3" => Some(FrameskipLevel::High),
            "extreme" | "4" => Some(FrameskipLevel::Extreme),
            _ => None,
        }
    }
}

/// Guard against skipping one field of a flicker effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParityProtection {
    #[default]
    Off,
    /// After two same-parity renders in a row, render the next opposite-parity frame.
    Weak,
    /// Never skip the opposite-parity frame after a render.
    Strong,
}

/// Tuning for `AdaptiveSkip`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTuning {
    /// Render cost assumed before the first render is measured
    pub default_render_cost_us: u32,
    /// Skip when backlog >= estimate / divisor
    pub threshold_divisor: u32,
    /// Backlog paid down per skipped frame, as a fraction of the estimate
    pub paydown_num: u32,
    pub paydown_den: u32,
    /// Backlog is clamped to this many frame budgets
    pub max_backlog_frames: u32,
    /// An audio wait longer than this means we are ahead: backlog resets
    pub audio_wait_reset_us: u32,
    pub parity: ParityProtection,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        Self {
            default_render_cost_us: 4000,
            threshold_divisor: 4,
            paydown_num: 3,
            paydown_den: 2,
            max_backlog_frames: 8,
            audio_wait_reset_us: 500,
            parity: ParityProtection::Off,
        }
    }
}

/// Serializable policy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipPolicyConfig {
    Pattern { level: FrameskipLevel },
    Adaptive(AdaptiveTuning),
}

impl Default for SkipPolicyConfig {
    fn default() -> Self {
        SkipPolicyConfig::Pattern {
            level: FrameskipLevel::default(),
        }
    }
}

impl SkipPolicyConfig {
    pub fn build(&self) -> Box<dyn SkipPolicy> {
        match *self {
            SkipPolicyConfig::Pattern { level } => Box::new(PatternSkip::new(level)),
            SkipPolicyConfig::Adaptive(tuning) => Box::new(AdaptiveSkip::new(tuning)),
        }
    }
}

/// State shared by every policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FrameSkipState {
    pub consecutive_skipped: u32,
    pub backlog_us: u32,
    pub render_cost_ema_us: u32,
}

/// Timing of one completed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTiming {
    /// Time from frame start to just before the audio wait
    pub work_us: u32,
    pub audio_wait_us: u32,
    pub budget_us: u32,
}

/// Why a frame was rendered or skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionReason {
    Policy,
    ConsecutiveLimit,
    Parity,
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkipDecision {
    pub render: bool,
    pub reason: DecisionReason,
}

pub trait SkipPolicy: Send {
    /// First opinion on whether `frame` should render.
    fn wants_render(&mut self, frame: u64, state: &FrameSkipState) -> bool;

    /// Policy-specific protection applied after the consecutive-skip cap.
    /// Returns true to override a skip.
    fn protect(&mut self, _frame: u64) -> bool {
        false
    }

    /// The final decision for `frame` is known.
    fn on_decided(&mut self, _frame: u64, _render: bool, _state: &mut FrameSkipState) {}

    /// The render phase took `render_us`.
    fn on_rendered(&mut self, _render_us: u32, _state: &mut FrameSkipState) {}

    /// The frame is over; fold its timing into the state.
    fn on_frame_end(&mut self, _timing: &FrameTiming, _state: &mut FrameSkipState) {}

    fn reset(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Fixed repeating render mask
pub struct PatternSkip {
    level: FrameskipLevel,
    mask: u32,
    period: u32,
}

impl PatternSkip {
    pub fn new(level: FrameskipLevel) -> Self {
        let (mask, period) = level.pattern();
        Self {
            level,
            mask,
            period,
        }
    }

    pub fn level(&self) -> FrameskipLevel {
        self.level
    }
}

impl SkipPolicy for PatternSkip {
    fn wants_render(&mut self, frame: u64, _state: &FrameSkipState) -> bool {
        let phase = (frame % self.period as u64) as u32;
        self.mask & (1 << phase) != 0
    }

    fn name(&self) -> &'static str {
        "pattern"
    }
}

/// Backlog-driven skipping
pub struct AdaptiveSkip {
    tuning: AdaptiveTuning,
    last_render_parity: Option<u64>,
    same_parity_renders: u32,
}

impl AdaptiveSkip {
    pub fn new(tuning: AdaptiveTuning) -> Self {
        Self {
            tuning,
            last_render_parity: None,
            same_parity_renders: 0,
        }
    }

    fn estimate(&self, state: &FrameSkipState) -> u32 {
        if state.render_cost_ema_us > 0 {
            state.render_cost_ema_us
        } else {
            self.tuning.default_render_cost_us
        }
    }
}

impl SkipPolicy for AdaptiveSkip {
    fn wants_render(&mut self, _frame: u64, state: &FrameSkipState) -> bool {
        let estimate = self.estimate(state);
        let threshold = estimate / self.tuning.threshold_divisor.max(1);
        !(estimate > 0 && state.backlog_us > 0 && state.backlog_us >= threshold)
    }

    fn protect(&mut self, frame: u64) -> bool {
        let Some(last) = self.last_render_parity else {
            return false;
        };
        let opposite = frame & 1 != last;
        match self.tuning.parity {
            ParityProtection::Off => false,
            ParityProtection::Strong => opposite,
            ParityProtection::Weak => opposite && self.same_parity_renders >= 1,
        }
    }

    fn on_decided(&mut self, frame: u64, render: bool, state: &mut FrameSkipState) {
        if render {
            let parity = frame & 1;
            if self.last_render_parity == Some(parity) {
                self.same_parity_renders += 1;
            } else {
                self.same_parity_renders = 0;
            }
            self.last_render_parity = Some(parity);
        } else if state.backlog_us > 0 {
            let estimate = self.estimate(state) as u64;
            let paydown =
                estimate * self.tuning.paydown_num as u64 / self.tuning.paydown_den.max(1) as u64;
            state.backlog_us = (state.backlog_us as u64).saturating_sub(paydown) as u32;
        }
    }

    fn on_rendered(&mut self, render_us: u32, state: &mut FrameSkipState) {
        // A zero reading is a missing measurement, not a free render.
        if render_us == 0 {
            return;
        }
        state.render_cost_ema_us = if state.render_cost_ema_us == 0 {
            render_us
        } else {
            ((state.render_cost_ema_us as u64 * 7 + render_us as u64) / 8) as u32
        };
    }

    fn on_frame_end(&mut self, timing: &FrameTiming, state: &mut FrameSkipState) {
        if timing.audio_wait_us > self.tuning.audio_wait_reset_us {
            state.backlog_us = 0;
            return;
        }
        let delta = timing.work_us as i64 - timing.budget_us as i64;
        let cap = timing.budget_us as i64 * self.tuning.max_backlog_frames as i64;
        state.backlog_us = (state.backlog_us as i64 + delta).clamp(0, cap) as u32;
    }

    fn reset(&mut self) {
        self.last_render_parity = None;
        self.same_parity_renders = 0;
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}

/// Counters kept by the controller
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SkipStats {
    pub rendered: u64,
    pub skipped: u64,
    pub forced: u64,
    pub limit_renders: u64,
    pub longest_skip_run: u32,
}

/// A policy plus the rules every policy obeys.
pub struct FrameSkipController {
    policy: Box<dyn SkipPolicy>,
    state: FrameSkipState,
    max_consecutive: u32,
    stats: SkipStats,
}

impl FrameSkipController {
    pub fn new(policy: Box<dyn SkipPolicy>, max_consecutive: u32) -> Self {
        Self {
            policy,
            state: FrameSkipState::default(),
            max_consecutive,
            stats: SkipStats::default(),
        }
    }

    pub fn from_config(config: &SkipPolicyConfig, max_consecutive: u32) -> Self {
        Self::new(config.build(), max_consecutive)
    }

    /// Decide whether `frame` renders. `force` always renders.
    pub fn decide(&mut self, frame: u64, force: bool) -> SkipDecision {
        let mut render = self.policy.wants_render(frame, &self.state);
        let mut reason = DecisionReason::Policy;

        if !render && self.state.consecutive_skipped >= self.max_consecutive {
            render = true;
            reason = DecisionReason::ConsecutiveLimit;
            self.stats.limit_renders += 1;
        }
        if !render && self.policy.protect(frame) {
            render = true;
            reason = DecisionReason::Parity;
        }
        if force {
            if !render {
                reason = DecisionReason::Forced;
            }
            render = true;
            self.stats.forced += 1;
        }

        self.policy.on_decided(frame, render, &mut self.state);

        if render {
            self.state.consecutive_skipped = 0;
            self.stats.rendered += 1;
        } else {
            self.state.consecutive_skipped += 1;
            self.stats.skipped += 1;
            self.stats.longest_skip_run = self
                .stats
                .longest_skip_run
                .max(self.state.consecutive_skipped);
        }

        log(LogCategory::FrameSkip, LogLevel::Trace, || {
            format!(
                "frame {} {} ({:?}) backlog={}us ema={}us",
                frame,
                if render { "render" } else { "skip" },
                reason,
                self.state.backlog_us,
                self.state.render_cost_ema_us
            )
        });

        SkipDecision { render, reason }
    }

    pub fn record_render(&mut self, render_us: u32) {
        self.policy.on_rendered(render_us, &mut self.state);
    }

    pub fn finish_frame(&mut self, timing: &FrameTiming) {
        self.policy.on_frame_end(timing, &mut self.state);
    }

    pub fn state(&self) -> FrameSkipState {
        self.state
    }

    pub fn stats(&self) -> SkipStats {
        self.stats
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Swap in a different policy; counters and backlog start over.
    pub fn set_policy(&mut self, policy: Box<dyn SkipPolicy>) {
        self.policy = policy;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.policy.reset();
        self.state = FrameSkipState::default();
        self.stats = SkipStats::default();
    }
}
