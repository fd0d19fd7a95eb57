use thiserror::Error;

use crate::protocol::{DoneReport, TaskSnapshot};
use crate::types::TaskStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("slot {0} has no task")]
    NoSuchSlot(usize),
    #[error("snapshot is for {remote}, local list is on {local}")]
    DateMismatch { local: String, remote: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub done: bool,
    /// Not completed on a previous day; renders as Undone until done again.
    pub carried: bool,
    pub streak: u32,
}

/// A completion awaiting remote acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoneRecord {
    pub name: String,
    pub date: String,
}

/// The device-local task model: an ordered roster (one strip slot per task)
/// plus an outbox of completions not yet acknowledged upstream. The outbox is
/// what makes a done task render as Pending instead of Done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskList {
    date: String,
    tasks: Vec<Task>,
    outbox: Vec<DoneRecord>,
}

impl TaskList {
    pub fn new(date: &str, names: impl IntoIterator<Item = String>) -> Self {
        Self {
            date: date.to_string(),
            tasks: names
                .into_iter()
                .map(|name| Task {
                    name,
                    done: false,
                    carried: false,
                    streak: 0,
                })
                .collect(),
            outbox: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn get(&self, slot: usize) -> Option<&Task> {
        self.tasks.get(slot)
    }

    pub fn status(&self, slot: usize) -> Option<TaskStatus> {
        let task = self.tasks.get(slot)?;
        Some(if task.done {
            if self.outbox.iter().any(|record| record.name == task.name) {
                TaskStatus::Pending
            } else {
                TaskStatus::Done
            }
        } else if task.carried {
            TaskStatus::Undone
        } else {
            TaskStatus::Todo
        })
    }

    /// Marks the task at `slot` completed on `date` and queues the completion
    /// for upstream delivery. Marking an already-done task is a no-op.
    pub fn mark_done(&mut self, slot: usize, date: &str) -> Result<(), TaskError> {
        let task = self.tasks.get_mut(slot).ok_or(TaskError::NoSuchSlot(slot))?;
        if task.done {
            return Ok(());
        }
        task.done = true;
        task.streak = task.streak.saturating_add(1);
        self.outbox.push(DoneRecord {
            name: task.name.clone(),
            date: date.to_string(),
        });
        Ok(())
    }

    pub fn has_unsynced(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn unsynced_count(&self) -> usize {
        self.outbox.len()
    }

    /// Outbox grouped into one report per date, oldest first.
    pub fn reports(&self) -> Vec<DoneReport> {
        let mut reports: Vec<DoneReport> = Vec::new();
        for record in &self.outbox {
            match reports.iter_mut().find(|report| report.date == record.date) {
                Some(report) => {
                    if !report.tasks.contains(&record.name) {
                        report.tasks.push(record.name.clone());
                    }
                }
                None => reports.push(DoneReport {
                    date: record.date.clone(),
                    tasks: vec![record.name.clone()],
                }),
            }
        }
        reports
    }

    /// Drops outbox records covered by an accepted report.
    pub fn acknowledge(&mut self, report: &DoneReport) {
        self.outbox
            .retain(|record| record.date != report.date || !report.tasks.contains(&record.name));
    }

    /// Day rollover: completed tasks reset to Todo keeping their streak;
    /// tasks left incomplete become Undone and their streak resets. Unsynced
    /// completions stay queued so they are still pushed for their own date.
    pub fn roll_over(&mut self, date: &str) {
        if date == self.date {
            return;
        }
        for task in &mut self.tasks {
            if task.done {
                task.done = false;
                task.carried = false;
            } else {
                task.carried = true;
                task.streak = 0;
            }
        }
        self.date = date.to_string();
    }

    /// Merges a remote snapshot for the current date. Remote state is
    /// authoritative except for completions still in the outbox, which stay
    /// visible (Pending) until acknowledged. Names unknown to the roster are
    /// ignored; a snapshot for another date is rejected without mutating.
    pub fn apply_snapshot(&mut self, snapshot: &TaskSnapshot) -> Result<(), TaskError> {
        if snapshot.date != self.date {
            return Err(TaskError::DateMismatch {
                local: self.date.clone(),
                remote: snapshot.date.clone(),
            });
        }

        let outbox = &self.outbox;
        for record in &snapshot.tasks {
            let Some(task) = self.tasks.iter_mut().find(|task| task.name == record.name) else {
                continue;
            };
            let locally_pending = outbox
                .iter()
                .any(|queued| queued.name == record.name && queued.date == snapshot.date);

            if locally_pending {
                task.done = true;
            } else {
                task.done = record.done;
                task.streak = record.streak;
            }
            if task.done {
                task.carried = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaskRecord;
    use pretty_assertions::assert_eq;

    fn list() -> TaskList {
        TaskList::new(
            "2026-03-14",
            ["meditate", "exercise", "read"].map(String::from),
        )
    }

    #[test]
    fn fresh_list_is_all_todo() {
        let tasks = list();
        for slot in 0..tasks.len() {
            assert_eq!(tasks.status(slot), Some(TaskStatus::Todo));
        }
        assert_eq!(tasks.status(3), None);
    }

    #[test]
    fn mark_done_queues_and_renders_pending() {
        let mut tasks = list();
        tasks.mark_done(1, "2026-03-14").unwrap();

        assert_eq!(tasks.status(1), Some(TaskStatus::Pending));
        assert_eq!(tasks.get(1).unwrap().streak, 1);
        assert!(tasks.has_unsynced());
    }

    #[test]
    fn acknowledged_completion_becomes_done() {
        let mut tasks = list();
        tasks.mark_done(1, "2026-03-14").unwrap();

        let reports = tasks.reports();
        assert_eq!(
            reports,
            vec![DoneReport {
                date: "2026-03-14".to_string(),
                tasks: vec!["exercise".to_string()],
            }]
        );

        tasks.acknowledge(&reports[0]);
        assert_eq!(tasks.status(1), Some(TaskStatus::Done));
        assert!(!tasks.has_unsynced());
    }

    #[test]
    fn marking_twice_is_a_no_op() {
        let mut tasks = list();
        tasks.mark_done(0, "2026-03-14").unwrap();
        tasks.mark_done(0, "2026-03-14").unwrap();

        assert_eq!(tasks.get(0).unwrap().streak, 1);
        assert_eq!(tasks.unsynced_count(), 1);
    }

    #[test]
    fn unknown_slot_is_an_error() {
        let mut tasks = list();
        assert_eq!(
            tasks.mark_done(9, "2026-03-14"),
            Err(TaskError::NoSuchSlot(9))
        );
    }

    #[test]
    fn roll_over_carries_missed_tasks_and_resets_done() {
        let mut tasks = list();
        tasks.mark_done(0, "2026-03-14").unwrap();
        let reports = tasks.reports();
        tasks.acknowledge(&reports[0]);

        tasks.roll_over("2026-03-15");

        assert_eq!(tasks.date(), "2026-03-15");
        // Done yesterday: fresh Todo, streak intact.
        assert_eq!(tasks.status(0), Some(TaskStatus::Todo));
        assert_eq!(tasks.get(0).unwrap().streak, 1);
        // Missed yesterday: carried over, streak gone.
        assert_eq!(tasks.status(1), Some(TaskStatus::Undone));
        assert_eq!(tasks.get(1).unwrap().streak, 0);
    }

    #[test]
    fn roll_over_keeps_unsynced_completions_queued() {
        let mut tasks = list();
        tasks.mark_done(0, "2026-03-14").unwrap();
        tasks.roll_over("2026-03-15");

        assert_eq!(
            tasks.reports(),
            vec![DoneReport {
                date: "2026-03-14".to_string(),
                tasks: vec!["meditate".to_string()],
            }]
        );
    }

    #[test]
    fn snapshot_merge_adopts_remote_state_but_keeps_pending() {
        let mut tasks = list();
        tasks.mark_done(0, "2026-03-14").unwrap();

        let snapshot = TaskSnapshot {
            date: "2026-03-14".to_string(),
            tasks: vec![
                // Remote has not seen our completion yet.
                TaskRecord {
                    name: "meditate".to_string(),
                    done: false,
                    streak: 0,
                },
                // Completed from another client.
                TaskRecord {
                    name: "read".to_string(),
                    done: true,
                    streak: 7,
                },
            ],
        };
        tasks.apply_snapshot(&snapshot).unwrap();

        assert_eq!(tasks.status(0), Some(TaskStatus::Pending));
        assert_eq!(tasks.get(0).unwrap().streak, 1);
        assert_eq!(tasks.status(2), Some(TaskStatus::Done));
        assert_eq!(tasks.get(2).unwrap().streak, 7);
    }

    #[test]
    fn snapshot_for_another_date_is_rejected_unchanged() {
        let mut tasks = list();
        let before = tasks.clone();

        let snapshot = TaskSnapshot {
            date: "2026-03-13".to_string(),
            tasks: vec![TaskRecord {
                name: "meditate".to_string(),
                done: true,
                streak: 3,
            }],
        };

        assert!(tasks.apply_snapshot(&snapshot).is_err());
        assert_eq!(tasks, before);
    }
}
