use smart_leds::RGB8;
use thiserror::Error;

use crate::config::StripConfig;
use crate::protocol::{ServiceError, TaskService};
use crate::tasks::TaskList;
use crate::types::TaskStatus;

pub const OFF: RGB8 = RGB8 { r: 0, g: 0, b: 0 };
const TODO_COLOR: RGB8 = RGB8 { r: 0, g: 0, b: 80 };
const PENDING_COLOR: RGB8 = RGB8 { r: 90, g: 50, b: 0 };
const UNDONE_COLOR: RGB8 = RGB8 { r: 90, g: 0, b: 0 };
const LOADING_COLOR: RGB8 = RGB8 { r: 60, g: 60, b: 60 };

#[derive(Debug, Error)]
pub enum StripError {
    #[error("slot {slot} out of range for {pixel_count} pixels")]
    SlotOutOfRange { slot: usize, pixel_count: usize },
    #[error("pixel driver failure: {0}")]
    Driver(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Hardware seam: pushes one rendered frame (physical pixel order) to the
/// strip. Implementations: WS2812-over-RMT on device builds, a logging driver
/// on the host, a recording driver in tests.
pub trait PixelDriver {
    fn render(&mut self, frame: &[RGB8]) -> Result<(), StripError>;
}

/// The pixel-state engine. Owns the frame buffer and the driver handle; the
/// task model is borrowed per call and never stored.
pub struct Strip<D> {
    driver: D,
    pixel_count: usize,
    reversed: bool,
    offset: usize,
    brightness: u8,
    awake: bool,
    loading_pixel: usize,
    frame: Vec<RGB8>,
}

impl<D: PixelDriver> Strip<D> {
    pub fn new(config: &StripConfig, driver: D) -> Self {
        let pixel_count = config.pixel_count.max(1);
        Self {
            driver,
            pixel_count,
            reversed: config.reversed,
            offset: config.offset % pixel_count,
            brightness: config.brightness,
            awake: true,
            loading_pixel: 0,
            frame: vec![OFF; pixel_count],
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    pub fn is_awake(&self) -> bool {
        self.awake
    }

    pub fn loading_pixel(&self) -> usize {
        self.loading_pixel
    }

    /// Rendered frame in physical pixel order, before brightness scaling.
    pub fn frame(&self) -> &[RGB8] {
        &self.frame
    }

    /// Logical slot index to physical strip index. Bijective over
    /// `[0, pixel_count)` for any reversed/offset combination.
    pub fn translate_pixel_location(&self, slot: usize) -> usize {
        let directed = if self.reversed {
            self.pixel_count - 1 - slot
        } else {
            slot
        };
        (directed + self.offset) % self.pixel_count
    }

    /// While asleep every push writes a blanked frame; the rendered frame is
    /// kept so waking restores the display.
    pub fn set_awake(&mut self, awake: bool) -> Result<(), StripError> {
        self.awake = awake;
        self.show()
    }

    /// Rebuilds the frame from the task model. Pure recomputation: calling it
    /// twice against unchanged data yields an identical frame.
    pub fn visualize(&mut self, tasks: &TaskList) {
        self.frame = vec![OFF; self.pixel_count];
        for slot in 0..self.pixel_count.min(tasks.len()) {
            let Some(status) = tasks.status(slot) else {
                continue;
            };
            let color = match status {
                TaskStatus::Todo => TODO_COLOR,
                TaskStatus::Pending => PENDING_COLOR,
                TaskStatus::Undone => UNDONE_COLOR,
                TaskStatus::Done => {
                    done_shade(tasks.get(slot).map(|task| task.streak).unwrap_or(0))
                }
            };
            self.paint(slot, color);
        }
    }

    /// Pushes the frame to the hardware. No logical state changes.
    pub fn show(&mut self) -> Result<(), StripError> {
        if !self.awake {
            return self.driver.render(&vec![OFF; self.pixel_count]);
        }
        let out: Vec<RGB8> = self
            .frame
            .iter()
            .map(|color| scale(*color, self.brightness))
            .collect();
        self.driver.render(&out)
    }

    /// Day rollover: reloads the task model for the new date and re-renders.
    pub fn new_day(&mut self, date: &str, tasks: &mut TaskList) -> Result<(), StripError> {
        tasks.roll_over(date);
        self.visualize(tasks);
        self.show()
    }

    /// Marks `slot` done for `date`, pushes the completion upstream and
    /// re-renders. An out-of-range slot is a contract violation reported
    /// without touching the frame. A failed push leaves the task Pending and
    /// surfaces the error; the next sync retries it.
    pub fn done<S: TaskService>(
        &mut self,
        slot: usize,
        date: &str,
        tasks: &mut TaskList,
        service: &mut S,
    ) -> Result<(), StripError> {
        if slot >= self.pixel_count || slot >= tasks.len() {
            return Err(StripError::SlotOutOfRange {
                slot,
                pixel_count: self.pixel_count,
            });
        }
        tasks
            .mark_done(slot, date)
            .map_err(|_| StripError::SlotOutOfRange {
                slot,
                pixel_count: self.pixel_count,
            })?;

        let pushed = self.sync_up(tasks, service);
        self.visualize(tasks);
        self.show()?;
        pushed?;
        Ok(())
    }

    /// Reconciles with the remote store: push queued completions, then pull
    /// the remote snapshot, then re-render. The loading pixel advances around
    /// each network step so in-progress work is visible. Reports the first
    /// failure; a failed pull leaves the task model untouched.
    pub fn sync<S: TaskService>(
        &mut self,
        tasks: &mut TaskList,
        service: &mut S,
    ) -> Result<(), StripError> {
        self.advance_loading_animation()?;
        let up = self.sync_up(tasks, service);
        self.advance_loading_animation()?;
        let down = self.sync_down(tasks, service);
        self.visualize(tasks);
        self.show()?;
        up?;
        down?;
        Ok(())
    }

    /// Advances the loading pixel one position (wrapping) and pushes the
    /// current frame with a transient loading overlay on it. Neither the
    /// frame nor the task model is mutated.
    pub fn advance_loading_animation(&mut self) -> Result<(), StripError> {
        self.loading_pixel = (self.loading_pixel + 1) % self.pixel_count;
        if !self.awake {
            return self.driver.render(&vec![OFF; self.pixel_count]);
        }
        let mut out: Vec<RGB8> = self
            .frame
            .iter()
            .map(|color| scale(*color, self.brightness))
            .collect();
        out[self.translate_pixel_location(self.loading_pixel)] =
            scale(LOADING_COLOR, self.brightness);
        self.driver.render(&out)
    }

    fn sync_up<S: TaskService>(
        &mut self,
        tasks: &mut TaskList,
        service: &mut S,
    ) -> Result<(), ServiceError> {
        for report in tasks.reports() {
            service.report_done(&report)?;
            tasks.acknowledge(&report);
        }
        Ok(())
    }

    fn sync_down<S: TaskService>(
        &mut self,
        tasks: &mut TaskList,
        service: &mut S,
    ) -> Result<(), ServiceError> {
        let snapshot = service.fetch_tasks(tasks.date())?;
        tasks
            .apply_snapshot(&snapshot)
            .map_err(|err| ServiceError::Payload(err.to_string()))
    }

    fn paint(&mut self, slot: usize, color: RGB8) {
        let physical = self.translate_pixel_location(slot);
        self.frame[physical] = color;
    }
}

/// Done shade: green, brighter the longer the streak.
fn done_shade(streak: u32) -> RGB8 {
    let boost = streak.saturating_mul(10).min(160) as u8;
    RGB8 {
        r: 0,
        g: 40 + boost,
        b: 0,
    }
}

fn scale(color: RGB8, brightness: u8) -> RGB8 {
    let apply = |v: u8| ((u16::from(v) * (u16::from(brightness) + 1)) >> 8) as u8;
    RGB8 {
        r: apply(color.r),
        g: apply(color.g),
        b: apply(color.b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DoneReceipt, DoneReport, TaskRecord, TaskSnapshot};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct RecordingDriver {
        frames: Vec<Vec<RGB8>>,
    }

    impl PixelDriver for RecordingDriver {
        fn render(&mut self, frame: &[RGB8]) -> Result<(), StripError> {
            self.frames.push(frame.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeService {
        fail_fetch: bool,
        fail_push: bool,
        snapshot: Option<TaskSnapshot>,
        pushed: Vec<DoneReport>,
    }

    impl TaskService for FakeService {
        fn fetch_tasks(&mut self, date: &str) -> Result<TaskSnapshot, ServiceError> {
            if self.fail_fetch {
                return Err(ServiceError::Unreachable("fetch refused".to_string()));
            }
            Ok(self.snapshot.clone().unwrap_or(TaskSnapshot {
                date: date.to_string(),
                tasks: Vec::new(),
            }))
        }

        fn report_done(&mut self, report: &DoneReport) -> Result<DoneReceipt, ServiceError> {
            if self.fail_push {
                return Err(ServiceError::Unreachable("push refused".to_string()));
            }
            self.pushed.push(report.clone());
            Ok(DoneReceipt {
                added: report.tasks.len() as u32,
            })
        }
    }

    fn config(pixel_count: usize) -> StripConfig {
        StripConfig {
            pixel_count,
            data_pin: 18,
            reversed: false,
            offset: 0,
            brightness: 255,
        }
    }

    fn strip(pixel_count: usize) -> Strip<RecordingDriver> {
        Strip::new(&config(pixel_count), RecordingDriver::default())
    }

    fn tasks() -> TaskList {
        TaskList::new(
            "2026-03-14",
            ["meditate", "exercise", "read"].map(String::from),
        )
    }

    #[test]
    fn translation_is_a_bijection_for_any_layout() {
        for (reversed, offset) in [(false, 0), (true, 0), (false, 5), (true, 9)] {
            let mut layout = config(12);
            layout.reversed = reversed;
            layout.offset = offset;
            let strip = Strip::new(&layout, RecordingDriver::default());

            let image: BTreeSet<usize> = (0..12)
                .map(|slot| strip.translate_pixel_location(slot))
                .collect();
            assert_eq!(image.len(), 12, "reversed={reversed} offset={offset}");
            assert!(image.iter().all(|physical| *physical < 12));
        }
    }

    #[test]
    fn reversed_offset_layout_maps_as_documented() {
        let mut layout = config(10);
        layout.reversed = true;
        layout.offset = 3;
        let strip = Strip::new(&layout, RecordingDriver::default());

        assert_eq!(strip.translate_pixel_location(0), 2); // (9 + 3) % 10
        assert_eq!(strip.translate_pixel_location(9), 3);
    }

    #[test]
    fn loading_pixel_advances_and_wraps() {
        let mut strip = strip(10);

        let mut seen = Vec::new();
        for _ in 0..3 {
            strip.advance_loading_animation().unwrap();
            seen.push(strip.loading_pixel());
        }
        assert_eq!(seen, vec![1, 2, 3]);

        for _ in 0..7 {
            strip.advance_loading_animation().unwrap();
        }
        assert_eq!(strip.loading_pixel(), 0);
    }

    #[test]
    fn loading_overlay_does_not_touch_the_frame() {
        let mut strip = strip(3);
        let tasks = tasks();
        strip.visualize(&tasks);
        let before = strip.frame().to_vec();

        strip.advance_loading_animation().unwrap();

        assert_eq!(strip.frame(), before.as_slice());
        // The pushed frame differs from the stored one only at the overlay.
        let pushed = strip.driver.frames.last().unwrap();
        let overlay = strip.translate_pixel_location(strip.loading_pixel());
        for (physical, color) in pushed.iter().enumerate() {
            if physical == overlay {
                assert_eq!(*color, LOADING_COLOR);
            } else {
                assert_eq!(*color, before[physical]);
            }
        }
    }

    #[test]
    fn visualize_is_idempotent() {
        let mut strip = strip(3);
        let mut tasks = tasks();
        tasks.mark_done(1, "2026-03-14").unwrap();

        strip.visualize(&tasks);
        let first = strip.frame().to_vec();
        strip.visualize(&tasks);

        assert_eq!(strip.frame(), first.as_slice());
    }

    #[test]
    fn done_out_of_range_fails_and_leaves_frame_alone() {
        let mut strip = strip(3);
        let mut tasks = tasks();
        let mut service = FakeService::default();
        strip.visualize(&tasks);
        let before = strip.frame().to_vec();
        let rendered_before = strip.driver.frames.len();

        let err = strip
            .done(7, "2026-03-14", &mut tasks, &mut service)
            .unwrap_err();

        assert!(matches!(err, StripError::SlotOutOfRange { slot: 7, .. }));
        assert_eq!(strip.frame(), before.as_slice());
        assert_eq!(strip.driver.frames.len(), rendered_before);
        assert!(service.pushed.is_empty());
    }

    #[test]
    fn done_pushes_upstream_and_renders_green() {
        let mut strip = strip(3);
        let mut tasks = tasks();
        let mut service = FakeService::default();

        strip.done(1, "2026-03-14", &mut tasks, &mut service).unwrap();

        assert_eq!(tasks.status(1), Some(TaskStatus::Done));
        assert_eq!(
            service.pushed,
            vec![DoneReport {
                date: "2026-03-14".to_string(),
                tasks: vec!["exercise".to_string()],
            }]
        );
        let physical = strip.translate_pixel_location(1);
        let frame = strip.driver.frames.last().unwrap();
        assert_eq!(frame[physical], done_shade(1));
    }

    #[test]
    fn done_with_unreachable_backend_degrades_to_pending() {
        let mut strip = strip(3);
        let mut tasks = tasks();
        let mut service = FakeService {
            fail_push: true,
            ..FakeService::default()
        };

        let err = strip
            .done(1, "2026-03-14", &mut tasks, &mut service)
            .unwrap_err();

        assert!(matches!(err, StripError::Service(_)));
        assert_eq!(tasks.status(1), Some(TaskStatus::Pending));
        let physical = strip.translate_pixel_location(1);
        assert_eq!(strip.frame()[physical], PENDING_COLOR);
    }

    #[test]
    fn failed_sync_down_leaves_tasks_unchanged() {
        let mut strip = strip(3);
        let mut tasks = tasks();
        let mut service = FakeService {
            fail_fetch: true,
            ..FakeService::default()
        };
        let before = tasks.clone();

        assert!(strip.sync(&mut tasks, &mut service).is_err());
        assert_eq!(tasks, before);
    }

    #[test]
    fn sync_drains_outbox_and_merges_remote_state() {
        let mut strip = strip(3);
        let mut tasks = tasks();
        tasks.mark_done(0, "2026-03-14").unwrap();

        let mut service = FakeService {
            snapshot: Some(TaskSnapshot {
                date: "2026-03-14".to_string(),
                tasks: vec![TaskRecord {
                    name: "read".to_string(),
                    done: true,
                    streak: 5,
                }],
            }),
            ..FakeService::default()
        };

        strip.sync(&mut tasks, &mut service).unwrap();

        assert!(!tasks.has_unsynced());
        assert_eq!(tasks.status(0), Some(TaskStatus::Done));
        assert_eq!(tasks.status(2), Some(TaskStatus::Done));
        assert_eq!(tasks.get(2).unwrap().streak, 5);
    }

    #[test]
    fn asleep_strip_pushes_blank_frames_and_wakes_back() {
        let mut strip = strip(3);
        let mut tasks = tasks();
        tasks.mark_done(0, "2026-03-14").unwrap();
        strip.visualize(&tasks);

        strip.set_awake(false).unwrap();
        assert_eq!(
            strip.driver.frames.last().unwrap(),
            &vec![OFF; 3],
            "asleep show must blank the output"
        );

        strip.advance_loading_animation().unwrap();
        assert_eq!(strip.driver.frames.last().unwrap(), &vec![OFF; 3]);

        strip.set_awake(true).unwrap();
        let restored = strip.driver.frames.last().unwrap();
        assert_ne!(restored, &vec![OFF; 3], "wake must restore the frame");
    }
}
