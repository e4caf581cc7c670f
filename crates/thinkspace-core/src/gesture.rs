//! Pull-to-break gesture recognizer.
//!
//! A pure state machine: `step(state, input) -> (state, effects)`. It never
//! touches a store; the caller turns `GestureEffect::Break` into a chain
//! break and `MergeRequested` into whatever the merge extension point does.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureConfig {
    /// Downward travel (px) that maps to full resistance.
    pub pull_threshold: f32,
    /// Resistance at or above which a release fires the break.
    pub snap_at: f32,
    /// Resistance above which the near-threshold cue fires, once.
    pub near_at: f32,
    pub long_press: Duration,
    /// Travel (px, either axis) that cancels a pending long press.
    pub move_slop: f32,
    /// Visual offset (px) at full resistance.
    pub max_offset: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            pull_threshold: 120.0,
            snap_at: 0.8,
            near_at: 0.7,
            long_press: Duration::from_millis(500),
            move_slop: 10.0,
            max_offset: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureInput {
    PointerDown { x: f32, y: f32 },
    PointerMove { x: f32, y: f32 },
    PointerUp,
    /// The long-press timer the caller started has elapsed.
    LongPressElapsed,
    RightClick,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEffect {
    StartLongPressTimer(Duration),
    CancelLongPressTimer,
    /// Haptic/visual cue: the pull is close to snapping.
    NearThreshold,
    Break,
    /// Merge intent. No behavior is attached yet.
    MergeRequested,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Tracking,
    Snapped,
    Cancelled,
    LongPressed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GestureState {
    pub phase: Phase,
    origin: (f32, f32),
    resistance: f32,
    near_fired: bool,
    long_press_armed: bool,
    did_snap: bool,
}

impl GestureState {
    pub fn resistance(&self) -> f32 {
        self.resistance
    }

    pub fn did_snap(&self) -> bool {
        self.did_snap
    }

    pub fn is_tracking(&self) -> bool {
        self.phase == Phase::Tracking
    }

    /// Presentation offset derived from resistance through an ease-out curve.
    pub fn visual_offset(&self, config: &GestureConfig) -> f32 {
        ease_out_cubic(self.resistance) * config.max_offset
    }
}

fn ease_out_cubic(t: f32) -> f32 {
    let inv = 1.0 - t.clamp(0.0, 1.0);
    1.0 - inv * inv * inv
}

/// Resistance for a vertical delta. Only downward travel counts.
pub fn resistance_for(delta_y: f32, config: &GestureConfig) -> f32 {
    if delta_y <= 0.0 || config.pull_threshold <= 0.0 {
        return 0.0;
    }
    (delta_y / config.pull_threshold).clamp(0.0, 1.0)
}

pub fn step(state: GestureState, input: GestureInput, config: &GestureConfig) -> (GestureState, Vec<GestureEffect>) {
    let mut effects = Vec::new();

    let next = match input {
        GestureInput::PointerDown { x, y } => {
            if state.long_press_armed {
                effects.push(GestureEffect::CancelLongPressTimer);
            }
            effects.push(GestureEffect::StartLongPressTimer(config.long_press));
            GestureState {
                phase: Phase::Tracking,
                origin: (x, y),
                long_press_armed: true,
                ..GestureState::default()
            }
        }

        GestureInput::PointerMove { x, y } if state.is_tracking() => {
            let mut next = state;
            let dx = x - state.origin.0;
            let dy = y - state.origin.1;

            if next.long_press_armed && (dx.abs() > config.move_slop || dy.abs() > config.move_slop) {
                next.long_press_armed = false;
                effects.push(GestureEffect::CancelLongPressTimer);
            }

            next.resistance = resistance_for(dy, config);
            if !next.near_fired && next.resistance > config.near_at {
                next.near_fired = true;
                effects.push(GestureEffect::NearThreshold);
            }
            next
        }

        GestureInput::PointerUp if state.is_tracking() => {
            if state.long_press_armed {
                effects.push(GestureEffect::CancelLongPressTimer);
            }
            if state.resistance >= config.snap_at {
                effects.push(GestureEffect::Break);
                GestureState {
                    phase: Phase::Snapped,
                    did_snap: true,
                    ..GestureState::default()
                }
            } else {
                GestureState {
                    phase: Phase::Cancelled,
                    ..GestureState::default()
                }
            }
        }

        GestureInput::LongPressElapsed if state.is_tracking() && state.long_press_armed => {
            effects.push(GestureEffect::MergeRequested);
            GestureState {
                phase: Phase::LongPressed,
                ..GestureState::default()
            }
        }

        GestureInput::RightClick => {
            if state.long_press_armed {
                effects.push(GestureEffect::CancelLongPressTimer);
            }
            effects.push(GestureEffect::MergeRequested);
            GestureState {
                phase: Phase::LongPressed,
                ..GestureState::default()
            }
        }

        // Moves, releases and stale timers outside a tracked gesture.
        _ => state,
    };

    (next, effects)
}

/// Convenience driver that owns the state and the callback sink.
pub struct PullToBreak {
    config: GestureConfig,
    state: GestureState,
}

impl PullToBreak {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            state: GestureState::default(),
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn visual_offset(&self) -> f32 {
        self.state.visual_offset(&self.config)
    }

    pub fn feed(&mut self, input: GestureInput) -> Vec<GestureEffect> {
        let (next, effects) = step(self.state, input, &self.config);
        self.state = next;
        effects
    }
}
