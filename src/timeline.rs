//! Progress scalar, phase lookup and milestone bookkeeping.
//!
//! The controller is the single writer of timeline progress. Everything else
//! reads `t` from it; nothing calls back into it. Notifications are delivered
//! synchronously inside [`TimelineController::set_progress`].

use anyhow::Result;
use healing_common::{clamp01, MilestoneEvent, Phase, TimelineConfig};
use log::{debug, trace};
use std::collections::HashSet;

/// Tolerance for phase table contiguity checks.
const PHASE_EPSILON: f32 = 1e-5;

/// Key a subscriber listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    ProgressUpdate,
    PhaseChange,
    /// A specific milestone id.
    Milestone(String),
    /// Every milestone, regardless of id.
    AnyMilestone,
    /// Every notification the controller emits.
    All,
    Reset,
}

impl EventKey {
    /// Parses the string form hosts use (`"progressUpdate"`, `"milestone"`, `"*"`, ...).
    /// Anything unrecognised is treated as a milestone id.
    pub fn parse(name: &str) -> Self {
        match name {
            "progressUpdate" => EventKey::ProgressUpdate,
            "phaseChange" => EventKey::PhaseChange,
            "milestone" => EventKey::AnyMilestone,
            "*" => EventKey::All,
            "reset" => EventKey::Reset,
            other => EventKey::Milestone(other.to_string()),
        }
    }
}

/// Payload delivered alongside `t`.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    ProgressUpdate,
    PhaseChange { phase: Phase },
    Milestone { event: MilestoneEvent },
    Reset,
}

/// Handle returned by [`TimelineController::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(f32, &TimelineEvent)>;

struct Subscriber {
    id: SubscriptionId,
    key: EventKey,
    callback: Callback,
}

/// Owns the canonical progress value, the phase table and the fired-milestone set.
pub struct TimelineController {
    progress: f32,
    previous_progress: f32,
    phases: Vec<Phase>,
    milestones: Vec<MilestoneEvent>,
    current_phase: usize,
    fired: HashSet<String>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

impl std::fmt::Debug for TimelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineController")
            .field("progress", &self.progress)
            .field("phase", &self.current_phase().id)
            .field("fired", &self.fired.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl TimelineController {
    /// Builds a controller from the phase and milestone tables.
    ///
    /// Phases must start at 0, end at 1 and be contiguous. Milestones are
    /// stable-sorted by `t` so that a large forward jump fires them in
    /// chronological order. Duplicate milestone ids are rejected.
    pub fn new(config: &TimelineConfig) -> Result<Self> {
        validate_phases(&config.phases)?;

        let mut milestones = config.milestones.clone();
        let mut seen = HashSet::new();
        for m in &milestones {
            if !(0.0..=1.0).contains(&m.t) {
                anyhow::bail!("milestone '{}' has t = {} outside [0, 1].", m.id, m.t);
            }
            if !seen.insert(m.id.clone()) {
                anyhow::bail!("duplicate milestone id '{}'.", m.id);
            }
        }
        if milestones.windows(2).any(|w| w[1].t < w[0].t) {
            debug!("Milestone table is not sorted by t; sorting it.");
        }
        milestones.sort_by(|a, b| a.t.total_cmp(&b.t));

        Ok(Self {
            progress: 0.0,
            previous_progress: 0.0,
            phases: config.phases.clone(),
            milestones,
            current_phase: 0,
            fired: HashSet::new(),
            subscribers: Vec::new(),
            next_subscription: 1,
        })
    }

    /// Registers a callback for `key`. Callbacks receive `(t, event)`.
    pub fn subscribe<F>(&mut self, key: EventKey, callback: F) -> SubscriptionId
    where
        F: FnMut(f32, &TimelineEvent) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber { id, key, callback: Box::new(callback) });
        id
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Sets timeline progress, clamped to [0, 1], and emits notifications.
    ///
    /// Order: progress update, phase change (if any), un-fire milestones above
    /// `t` when moving backward, then fire every milestone at or below `t` that
    /// is not already fired.
    pub fn set_progress(&mut self, t: f32) {
        let t = if t.is_nan() { 0.0 } else { clamp01(t) };
        self.previous_progress = self.progress;
        self.progress = t;

        self.emit(&EventKey::ProgressUpdate, TimelineEvent::ProgressUpdate);

        let phase_idx = self.phase_index_at(t);
        if phase_idx != self.current_phase {
            self.current_phase = phase_idx;
            let phase = self.phases[phase_idx].clone();
            debug!("Phase change -> '{}' at t={:.3}", phase.id, t);
            self.emit(&EventKey::PhaseChange, TimelineEvent::PhaseChange { phase });
        }

        if t < self.previous_progress {
            let before = self.fired.len();
            let milestones = &self.milestones;
            self.fired.retain(|id| milestones.iter().any(|m| &m.id == id && m.t <= t));
            if self.fired.len() != before {
                trace!("Scrubbed back to {:.3}: un-fired {} milestone(s)", t, before - self.fired.len());
            }
        }

        for i in 0..self.milestones.len() {
            let due = self.milestones[i].t <= t && !self.fired.contains(&self.milestones[i].id);
            if !due {
                continue;
            }
            let event = self.milestones[i].clone();
            self.fired.insert(event.id.clone());
            debug!("Milestone '{}' fired at t={:.3}", event.id, t);
            self.emit(&EventKey::Milestone(event.id.clone()), TimelineEvent::Milestone { event: event.clone() });
            self.emit(&EventKey::AnyMilestone, TimelineEvent::Milestone { event });
        }
    }

    /// Progress back to 0, fired set cleared, phase back to the first entry.
    pub fn reset(&mut self) {
        self.progress = 0.0;
        self.previous_progress = 0.0;
        self.current_phase = 0;
        self.fired.clear();
        self.emit(&EventKey::Reset, TimelineEvent::Reset);
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn previous_progress(&self) -> f32 {
        self.previous_progress
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn milestones(&self) -> &[MilestoneEvent] {
        &self.milestones
    }

    pub fn current_phase(&self) -> &Phase {
        &self.phases[self.current_phase]
    }

    /// Phase containing `t`. The last phase owns `t = 1`.
    pub fn phase_at(&self, t: f32) -> &Phase {
        &self.phases[self.phase_index_at(t)]
    }

    /// Position within the current phase, 0..1.
    pub fn phase_progress(&self) -> f32 {
        let phase = self.current_phase();
        let span = phase.t_end - phase.t_start;
        if span <= 0.0 {
            return 1.0;
        }
        clamp01((self.progress - phase.t_start) / span)
    }

    pub fn is_fired(&self, id: &str) -> bool {
        self.fired.contains(id)
    }

    /// Fired milestones in table order.
    pub fn fired_events(&self) -> Vec<&MilestoneEvent> {
        self.milestones.iter().filter(|m| self.fired.contains(&m.id)).collect()
    }

    /// First unfired milestone in table order.
    pub fn next_event(&self) -> Option<&MilestoneEvent> {
        self.milestones.iter().find(|m| !self.fired.contains(&m.id))
    }

    fn phase_index_at(&self, t: f32) -> usize {
        self.phases
            .iter()
            .position(|p| t >= p.t_start && t < p.t_end)
            .unwrap_or(self.phases.len() - 1)
    }

    fn emit(&mut self, key: &EventKey, event: TimelineEvent) {
        let t = self.progress;
        for sub in self.subscribers.iter_mut() {
            if &sub.key == key || sub.key == EventKey::All {
                (sub.callback)(t, &event);
            }
        }
    }
}

fn validate_phases(phases: &[Phase]) -> Result<()> {
    let (first, last) = match (phases.first(), phases.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => anyhow::bail!("phase table must not be empty."),
    };
    if first.t_start.abs() > PHASE_EPSILON {
        anyhow::bail!("first phase '{}' must start at 0, starts at {}.", first.id, first.t_start);
    }
    if (last.t_end - 1.0).abs() > PHASE_EPSILON {
        anyhow::bail!("last phase '{}' must end at 1, ends at {}.", last.id, last.t_end);
    }
    for p in phases {
        if p.t_end <= p.t_start {
            anyhow::bail!("phase '{}' is empty or inverted ({}..{}).", p.id, p.t_start, p.t_end);
        }
    }
    for w in phases.windows(2) {
        if (w[1].t_start - w[0].t_end).abs() > PHASE_EPSILON {
            anyhow::bail!(
                "phases '{}' and '{}' leave a gap or overlap ({} vs {}).",
                w[0].id, w[1].id, w[0].t_end, w[1].t_start
            );
        }
    }
    Ok(())
}
