//! Retry observation and convergence tracking.
//!
//! `FeedbackLoopTracker` never decides whether a task is retried. Whoever runs
//! the retries (the orchestrator) reports each attempt, and the tracker keeps
//! the history, computes a trend, and emits the correction-cycle telemetry.

pub mod meetings;

pub use meetings::{CONVERGENCE_STALLED, MeetingRegistry, MeetingTrigger, MeetingType};

use crate::events::EventSink;
use chrono::Utc;
use nugget_common::{
    AttemptRecord, AttemptStatus, BuildEvent, CorrectionStep, FeedbackLoop, Trend,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One initial attempt plus two retries.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Trend across the two most recent resolved attempts.
///
/// Fewer than two resolved attempts is reported as improving.
pub fn compute_trend(attempts: &[AttemptRecord]) -> Trend {
    let mut resolved = attempts.iter().rev().filter(|a| a.is_resolved());
    let (Some(latest), Some(previous)) = (resolved.next(), resolved.next()) else {
        return Trend::Improving;
    };

    let (now, before) = (latest.pass_ratio(), previous.pass_ratio());
    if (now - before).abs() < f64::EPSILON {
        Trend::Stalled
    } else if now > before {
        Trend::Improving
    } else {
        Trend::Diverging
    }
}

pub struct FeedbackLoopTracker {
    /// Loops in first-attempt order
    loops: Vec<FeedbackLoop>,
    /// Tasks that already received a stall meeting invite
    stall_fired: HashSet<String>,
    max_attempts: u32,
    events: EventSink,
    meetings: Arc<MeetingRegistry>,
}

impl FeedbackLoopTracker {
    pub fn new(events: EventSink, meetings: Arc<MeetingRegistry>) -> Self {
        Self {
            loops: Vec::new(),
            stall_fired: HashSet::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            events,
            meetings,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn get(&self, task_id: &str) -> Option<&FeedbackLoop> {
        self.loops.iter().find(|l| l.task_id == task_id)
    }

    fn get_mut(&mut self, task_id: &str) -> Option<&mut FeedbackLoop> {
        self.loops.iter_mut().find(|l| l.task_id == task_id)
    }

    pub fn loops(&self) -> &[FeedbackLoop] {
        &self.loops
    }

    /// Begin attempt `attempt_number` (0 = first try) of a task.
    pub fn start_attempt(
        &mut self,
        task_id: &str,
        task_name: &str,
        attempt_number: u32,
        failure_reason: Option<&str>,
    ) {
        let max_attempts = self.max_attempts;
        if self.get(task_id).is_none() {
            self.loops.push(FeedbackLoop {
                task_id: task_id.to_string(),
                task_name: task_name.to_string(),
                attempts: Vec::new(),
                converged: false,
                current_step: None,
                max_attempts,
            });
        }

        let is_retry = attempt_number > 0;
        let Some(fl) = self.get_mut(task_id) else {
            return;
        };
        fl.converged = false;
        fl.current_step = is_retry.then_some(CorrectionStep::Diagnosing);
        fl.attempts.push(AttemptRecord {
            attempt_number,
            status: AttemptStatus::InProgress,
            failure_reason: failure_reason.map(str::to_string),
            tests_passing: None,
            tests_total: None,
            timestamp: Utc::now(),
        });
        let max_attempts = fl.max_attempts;

        if !is_retry {
            return;
        }

        info!(task_id, attempt = attempt_number, "Correction cycle started");
        self.events.emit(BuildEvent::CorrectionCycleStarted {
            task_id: task_id.to_string(),
            attempt_number,
            failure_reason: failure_reason.unwrap_or_default().to_string(),
            max_attempts,
        });
        self.events.emit(BuildEvent::CorrectionCycleProgress {
            task_id: task_id.to_string(),
            attempt_number,
            step: CorrectionStep::Diagnosing,
        });
    }

    pub fn mark_fixing(&mut self, task_id: &str) {
        self.advance_step(task_id, CorrectionStep::Fixing);
    }

    pub fn mark_retesting(&mut self, task_id: &str) {
        self.advance_step(task_id, CorrectionStep::Retesting);
    }

    fn advance_step(&mut self, task_id: &str, step: CorrectionStep) {
        let Some(fl) = self.get_mut(task_id) else {
            return;
        };
        let Some(attempt_number) = fl.attempts.last().map(|a| a.attempt_number) else {
            return;
        };
        if attempt_number == 0 {
            return;
        }

        fl.current_step = Some(step);
        self.events.emit(BuildEvent::CorrectionCycleProgress {
            task_id: task_id.to_string(),
            attempt_number,
            step,
        });
    }

    /// Close out the current attempt and report convergence.
    ///
    /// Returns the trend after this attempt, or `None` for an unknown task.
    pub fn record_attempt_result(
        &mut self,
        task_id: &str,
        passed: bool,
        tests_passing: Option<u32>,
        tests_total: Option<u32>,
    ) -> Option<Trend> {
        let Some(fl) = self.get_mut(task_id) else {
            warn!(task_id, "Attempt result recorded for a task with no feedback loop");
            return None;
        };
        let Some(current) = fl.attempts.last_mut() else {
            warn!(task_id, "Attempt result recorded before any attempt started");
            return None;
        };

        current.status = if passed {
            AttemptStatus::Passed
        } else {
            AttemptStatus::Failed
        };
        current.tests_passing = tests_passing;
        current.tests_total = tests_total;
        fl.converged = passed;
        fl.current_step = None;

        let trend = compute_trend(&fl.attempts);
        let resolved = fl.attempts.iter().filter(|a| a.is_resolved()).count();
        let task_name = fl.task_name.clone();
        let update = BuildEvent::ConvergenceUpdate {
            task_id: task_id.to_string(),
            attempts_so_far: fl.attempts.len() as u32,
            tests_passing,
            tests_total,
            trend,
            converged: passed,
            attempts: fl.attempts.clone(),
        };
        debug!(task_id, ?trend, passed, resolved, "Attempt recorded");
        self.events.emit(update);

        if !passed && trend != Trend::Improving && resolved >= 2 {
            self.offer_debug_meeting(task_id, &task_name, resolved);
        }

        Some(trend)
    }

    fn offer_debug_meeting(&mut self, task_id: &str, task_name: &str, attempts: usize) {
        if self.stall_fired.contains(task_id) {
            return;
        }
        let Some(meeting) = self.meetings.find_debug_meeting(CONVERGENCE_STALLED) else {
            debug!(task_id, "No debug meeting registered for stalled convergence");
            return;
        };
        self.stall_fired.insert(task_id.to_string());

        info!(task_id, meeting = %meeting.id, "Suggesting debug meeting for stalled task");
        self.events.emit(BuildEvent::MeetingInvite {
            meeting_type_id: meeting.id.clone(),
            meeting_id: uuid::Uuid::new_v4().to_string(),
            agent_name: meeting.agent_name.clone(),
            title: format!("{}: {}", meeting.name, task_name),
            description: format!(
                "\"{}\" has failed {} attempts without getting closer. Want to debug it together?",
                task_name, attempts
            ),
        });
    }

    pub fn trend(&self, task_id: &str) -> Option<Trend> {
        self.get(task_id).map(|fl| compute_trend(&fl.attempts))
    }

    /// Whether the task is being retried right now.
    pub fn is_in_correction_cycle(&self, task_id: &str) -> bool {
        self.get(task_id)
            .is_some_and(|fl| fl.attempts.len() > 1 && !fl.converged)
    }

    pub fn reset(&mut self) {
        self.loops.clear();
        self.stall_fired.clear();
    }
}
