//! # Run Scheduling Policy
//!
//! Decides which (date, step) run to dispatch next within one work item.
//! The engine owns concurrency and persistence; the policy owns ordering.

use crate::dates::DateRange;
use crate::error::EtlError;
use crate::worker::results::{RunOutcome, RunStatus, Step};

/// One dispatchable unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSlot {
    pub date: String,
    pub step: Step,
}

/// Ordering policy for the runs of a single work item.
pub trait JobPolicy: Send {
    /// Whether any run could still be dispatched, now or after pending
    /// completions land.
    fn has_more_runs_to_schedule(&self) -> bool;

    /// The next run that is ready right now, if any. Marks it in flight.
    fn schedule_next_run(&mut self) -> Option<RunSlot>;

    /// Record a completed run and update gating state.
    fn run_complete(&mut self, date: &str, step: Step, outcome: &RunOutcome)
        -> Result<(), EtlError>;

    /// Whether any dispatched run has not completed yet.
    fn has_incomplete_runs(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    InFlight,
    Success,
    Failed,
}

/// The ET/Load interleaving policy.
///
/// ET runs are dispatched strictly date-ordered but may overlap. Loads are
/// strictly date-ordered with at most one in flight, and a date's Load only
/// dispatches once its ET succeeded; a ready Load takes priority over the
/// next ET. A Load failure halts all further Loads. A second Load failure
/// while one is already recorded cannot happen under the singleton rule,
/// so it is reported as a policy violation.
pub struct EtLoadInterleaver {
    dates: Vec<String>,
    et: Vec<SlotState>,
    load: Vec<SlotState>,
    load_in_flight: bool,
    load_halted: bool,
    load_failure_recorded: bool,
}

impl EtLoadInterleaver {
    pub fn new(run_start_date: &str, run_end_date: &str) -> Result<Self, EtlError> {
        let dates: Vec<String> = DateRange::new(run_start_date, run_end_date, 1)?.collect();
        let slots = vec![SlotState::Pending; dates.len()];
        Ok(Self {
            et: slots.clone(),
            load: slots,
            dates,
            load_in_flight: false,
            load_halted: false,
            load_failure_recorded: false,
        })
    }

    fn index_of(&self, date: &str) -> Result<usize, EtlError> {
        self.dates
            .iter()
            .position(|d| d == date)
            .ok_or_else(|| EtlError::PolicyViolation(format!("unknown run date {date}")))
    }

    /// The next Load in date order that has not been dispatched.
    fn next_load_index(&self) -> Option<usize> {
        self.load.iter().position(|s| *s == SlotState::Pending)
    }

    fn next_et_index(&self) -> Option<usize> {
        self.et.iter().position(|s| *s == SlotState::Pending)
    }
}

impl JobPolicy for EtLoadInterleaver {
    fn has_more_runs_to_schedule(&self) -> bool {
        if self.next_et_index().is_some() {
            return true;
        }
        if self.load_halted {
            return false;
        }
        match self.next_load_index() {
            // A pending Load stays schedulable unless its ET already failed.
            Some(i) => self.et[i] != SlotState::Failed,
            None => false,
        }
    }

    fn schedule_next_run(&mut self) -> Option<RunSlot> {
        // Loads first: the warehouse copy is the serial bottleneck, so a
        // ready Load never waits behind ET dispatches.
        if !self.load_halted && !self.load_in_flight {
            if let Some(i) = self.next_load_index() {
                match self.et[i] {
                    SlotState::Success => {
                        self.load[i] = SlotState::InFlight;
                        self.load_in_flight = true;
                        return Some(RunSlot {
                            date: self.dates[i].clone(),
                            step: Step::Load,
                        });
                    }
                    SlotState::Failed => {
                        // This date can never load, and Loads are strictly
                        // ordered, so none of the later ones can either.
                        self.load_halted = true;
                    }
                    SlotState::Pending | SlotState::InFlight => {}
                }
            }
        }

        if let Some(i) = self.next_et_index() {
            self.et[i] = SlotState::InFlight;
            return Some(RunSlot {
                date: self.dates[i].clone(),
                step: Step::Et,
            });
        }

        None
    }

    fn run_complete(
        &mut self,
        date: &str,
        step: Step,
        outcome: &RunOutcome,
    ) -> Result<(), EtlError> {
        let i = self.index_of(date)?;
        match step {
            Step::Et => {
                self.et[i] = if outcome.is_success() {
                    SlotState::Success
                } else {
                    SlotState::Failed
                };
            }
            Step::Load => {
                self.load_in_flight = false;
                match outcome.status {
                    RunStatus::Success => self.load[i] = SlotState::Success,
                    RunStatus::Cancelled => {
                        self.load[i] = SlotState::Failed;
                        self.load_halted = true;
                    }
                    RunStatus::Error => {
                        if self.load_failure_recorded {
                            return Err(EtlError::PolicyViolation(format!(
                                "load failure for {date} while another load failure is pending"
                            )));
                        }
                        self.load_failure_recorded = true;
                        self.load[i] = SlotState::Failed;
                        self.load_halted = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn has_incomplete_runs(&self) -> bool {
        self.et
            .iter()
            .chain(self.load.iter())
            .any(|s| *s == SlotState::InFlight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(days: u32) -> EtLoadInterleaver {
        EtLoadInterleaver::new("2014-01-01", &format!("2014-01-{days:02}")).unwrap()
    }

    fn slot(date: &str, step: Step) -> RunSlot {
        RunSlot {
            date: date.into(),
            step,
        }
    }

    #[test]
    fn ets_dispatch_in_date_order_before_any_load() {
        let mut p = policy(3);
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-01", Step::Et)));
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-02", Step::Et)));
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-03", Step::Et)));
        // No ET has succeeded, so no Load is ready.
        assert_eq!(p.schedule_next_run(), None);
        assert!(p.has_incomplete_runs());
        assert!(p.has_more_runs_to_schedule());
    }

    #[test]
    fn ready_load_takes_priority_over_remaining_ets() {
        let mut p = policy(3);
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-01", Step::Et)));
        p.run_complete("2014-01-01", Step::Et, &RunOutcome::success())
            .unwrap();
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-01", Step::Load)));
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-02", Step::Et)));
    }

    #[test]
    fn loads_are_singleton_and_strictly_ordered() {
        let mut p = policy(3);
        for date in ["2014-01-01", "2014-01-02", "2014-01-03"] {
            assert_eq!(p.schedule_next_run(), Some(slot(date, Step::Et)));
        }
        // Day 2 finishes before day 1; its Load must still wait its turn.
        p.run_complete("2014-01-02", Step::Et, &RunOutcome::success())
            .unwrap();
        assert_eq!(p.schedule_next_run(), None);

        p.run_complete("2014-01-01", Step::Et, &RunOutcome::success())
            .unwrap();
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-01", Step::Load)));
        // One Load in flight blocks the next even though day 2 is ready.
        assert_eq!(p.schedule_next_run(), None);

        p.run_complete("2014-01-01", Step::Load, &RunOutcome::success())
            .unwrap();
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-02", Step::Load)));
    }

    #[test]
    fn three_day_walk_to_completion() {
        let mut p = policy(3);
        let mut dispatched = Vec::new();
        // Drive the policy with instant completions, recording the order.
        while p.has_more_runs_to_schedule() || p.has_incomplete_runs() {
            match p.schedule_next_run() {
                Some(run) => {
                    dispatched.push(run.clone());
                    p.run_complete(&run.date, run.step, &RunOutcome::success())
                        .unwrap();
                }
                None => break,
            }
        }
        assert_eq!(dispatched.len(), 6);
        // Every dispatched Load follows its own ET.
        for (i, run) in dispatched.iter().enumerate() {
            if run.step == Step::Load {
                let et_pos = dispatched
                    .iter()
                    .position(|r| r.step == Step::Et && r.date == run.date)
                    .unwrap();
                assert!(et_pos < i);
            }
        }
        assert!(!p.has_more_runs_to_schedule());
        assert!(!p.has_incomplete_runs());
    }

    #[test]
    fn et_failure_halts_loads_at_that_date() {
        let mut p = policy(3);
        for date in ["2014-01-01", "2014-01-02", "2014-01-03"] {
            assert_eq!(p.schedule_next_run(), Some(slot(date, Step::Et)));
        }
        p.run_complete("2014-01-01", Step::Et, &RunOutcome::error("et boom"))
            .unwrap();
        p.run_complete("2014-01-02", Step::Et, &RunOutcome::success())
            .unwrap();
        p.run_complete("2014-01-03", Step::Et, &RunOutcome::success())
            .unwrap();

        // Day 1 can never load, so strictly ordered Loads are all halted.
        assert_eq!(p.schedule_next_run(), None);
        assert!(!p.has_more_runs_to_schedule());
        assert!(!p.has_incomplete_runs());
    }

    #[test]
    fn load_failure_halts_further_loads() {
        let mut p = policy(2);
        p.schedule_next_run();
        p.schedule_next_run();
        p.run_complete("2014-01-01", Step::Et, &RunOutcome::success())
            .unwrap();
        p.run_complete("2014-01-02", Step::Et, &RunOutcome::success())
            .unwrap();

        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-01", Step::Load)));
        p.run_complete("2014-01-01", Step::Load, &RunOutcome::error("copy failed"))
            .unwrap();

        assert_eq!(p.schedule_next_run(), None);
        assert!(!p.has_more_runs_to_schedule());
    }

    #[test]
    fn second_load_failure_is_a_policy_violation() {
        let mut p = policy(2);
        p.schedule_next_run();
        p.schedule_next_run();
        p.run_complete("2014-01-01", Step::Et, &RunOutcome::success())
            .unwrap();
        p.run_complete("2014-01-02", Step::Et, &RunOutcome::success())
            .unwrap();
        p.schedule_next_run();
        p.run_complete("2014-01-01", Step::Load, &RunOutcome::error("boom"))
            .unwrap();

        let err = p
            .run_complete("2014-01-02", Step::Load, &RunOutcome::error("boom"))
            .unwrap_err();
        assert!(matches!(err, EtlError::PolicyViolation(_)));
    }

    #[test]
    fn single_day_window_runs_both_steps() {
        let mut p = EtLoadInterleaver::new("2014-01-05", "2014-01-05").unwrap();
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-05", Step::Et)));
        p.run_complete("2014-01-05", Step::Et, &RunOutcome::success())
            .unwrap();
        assert_eq!(p.schedule_next_run(), Some(slot("2014-01-05", Step::Load)));
        p.run_complete("2014-01-05", Step::Load, &RunOutcome::success())
            .unwrap();
        assert!(!p.has_more_runs_to_schedule());
    }
}
