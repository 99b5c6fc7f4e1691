use std::collections::VecDeque;
use std::time::Instant;

use log::{debug, warn};

use crate::config::Config;
use crate::errors::{CamMeasureError, Result};
use crate::frame::FrameBuffer;
use crate::measurement::{CalibrationData, DetectedObject};
use crate::pipeline::{Detection, DetectionReport, MeasurePipeline};

/// Ordered so that a later variant outranks an earlier one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    Low,
    Medium,
    High,
}

/// One pending detection request from a frame source
#[derive(Debug)]
pub struct FrameJob {
    pub source_id: String,
    pub frame: FrameBuffer,
    pub calibration: CalibrationData,
    pub priority: JobPriority,
    attempts: u32,
}

impl FrameJob {
    pub fn new(
        source_id: impl Into<String>,
        frame: FrameBuffer,
        calibration: CalibrationData,
        priority: JobPriority,
    ) -> Self {
        FrameJob {
            source_id: source_id.into(),
            frame,
            calibration,
            priority,
            attempts: 0,
        }
    }
}

/// How a submission was absorbed into the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// A pending job from the same source was replaced in place
    Updated,
    /// Queued after evicting the named lower-priority job
    Displaced(String),
    /// Queue full of equal-or-higher priority work
    Rejected,
}

/// What one `run_next` call produced
#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        source_id: String,
        objects: Vec<DetectedObject>,
        report: DetectionReport,
    },
    /// The run exceeded its budget; its result was discarded
    TimedOut {
        source_id: String,
        attempts: u32,
        dropped: bool,
    },
    Failed {
        source_id: String,
        error: CamMeasureError,
    },
}

/// Deduplicating priority queue that feeds frames to a pipeline one at a
/// time.
///
/// At most one job per source is ever pending: resubmitting while a job
/// waits replaces its payload instead of queueing a duplicate. Runs race
/// against a timeout budget; a timed-out job is retried a bounded number of
/// times and then dropped. Pausing stops new invocations only, an in-flight
/// frame always runs to completion.
pub struct FrameScheduler {
    queue: VecDeque<FrameJob>,
    capacity: usize,
    timeout_ms: u64,
    max_retries: u32,
    paused: bool,
}

impl FrameScheduler {
    pub fn new(config: &Config) -> Self {
        FrameScheduler {
            queue: VecDeque::new(),
            capacity: config.queue_capacity.max(1),
            timeout_ms: config.frame_timeout_ms,
            max_retries: config.max_retries,
            paused: false,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Enqueue a job, coalescing with any pending job from the same source.
    pub fn submit(&mut self, job: FrameJob) -> SubmitOutcome {
        if let Some(pending) = self
            .queue
            .iter_mut()
            .find(|pending| pending.source_id == job.source_id)
        {
            debug!("scheduler: updated pending job for {}", job.source_id);
            *pending = job;
            return SubmitOutcome::Updated;
        }

        if self.queue.len() >= self.capacity {
            let lowest = match self.queue.iter().map(|j| j.priority).min() {
                Some(priority) => priority,
                None => return SubmitOutcome::Rejected,
            };
            if job.priority <= lowest {
                warn!(
                    "scheduler: queue full, rejecting {} at priority {:?}",
                    job.source_id, job.priority
                );
                return SubmitOutcome::Rejected;
            }
            // Oldest job at the lowest priority goes first
            if let Some(idx) = self.queue.iter().position(|j| j.priority == lowest) {
                if let Some(evicted) = self.queue.remove(idx) {
                    warn!(
                        "scheduler: queue full, evicting {} for {}",
                        evicted.source_id, job.source_id
                    );
                    self.queue.push_back(job);
                    return SubmitOutcome::Displaced(evicted.source_id);
                }
            }
        }

        self.queue.push_back(job);
        SubmitOutcome::Queued
    }

    /// Run one job against the deadline. An over-budget run reports
    /// `StageTimeout`; whatever the run itself produced is discarded.
    fn run_with_deadline(&self, pipeline: &MeasurePipeline, job: &FrameJob) -> Result<Detection> {
        let started = Instant::now();
        let result = pipeline.detect_full(&job.frame, &job.calibration);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if elapsed_ms > self.timeout_ms as f64 {
            return Err(CamMeasureError::StageTimeout {
                stage: "detect",
                budget_ms: self.timeout_ms,
            });
        }
        result
    }

    /// Run the highest-priority pending job through the pipeline.
    /// Returns `None` when paused or idle.
    pub fn run_next(&mut self, pipeline: &MeasurePipeline) -> Option<JobOutcome> {
        if self.paused {
            debug!("scheduler: paused, skipping invocation");
            return None;
        }

        let best = self.queue.iter().map(|j| j.priority).max()?;
        let idx = self.queue.iter().position(|j| j.priority == best)?;
        let mut job = self.queue.remove(idx)?;

        match self.run_with_deadline(pipeline, &job) {
            Ok(detection) => Some(JobOutcome::Completed {
                source_id: job.source_id,
                objects: detection.objects,
                report: detection.report,
            }),
            Err(CamMeasureError::StageTimeout { budget_ms, .. }) => {
                job.attempts += 1;
                let attempts = job.attempts;
                let source_id = job.source_id.clone();
                let dropped = attempts > self.max_retries;
                if dropped {
                    warn!(
                        "scheduler: {} timed out {} times, dropping",
                        source_id, attempts
                    );
                } else {
                    warn!(
                        "scheduler: {} exceeded {} ms (attempt {}), requeueing",
                        source_id, budget_ms, attempts
                    );
                    self.queue.push_back(job);
                }
                Some(JobOutcome::TimedOut {
                    source_id,
                    attempts,
                    dropped,
                })
            }
            Err(error) => Some(JobOutcome::Failed {
                source_id: job.source_id,
                error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(width: u32, height: u32, value: u8) -> FrameBuffer {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
        FrameBuffer::new(width, height, pixels).unwrap()
    }

    fn job(source_id: &str, priority: JobPriority) -> FrameJob {
        FrameJob::new(
            source_id,
            flat_frame(16, 16, 100),
            CalibrationData::uncalibrated(),
            priority,
        )
    }

    fn scheduler_with(capacity: usize, timeout_ms: u64, max_retries: u32) -> FrameScheduler {
        let mut config = Config::default();
        config.queue_capacity = capacity;
        config.frame_timeout_ms = timeout_ms;
        config.max_retries = max_retries;
        FrameScheduler::new(&config)
    }

    #[test]
    fn resubmission_updates_pending_job_in_place() {
        let mut scheduler = scheduler_with(10, 500, 2);
        assert_eq!(scheduler.submit(job("cam-a", JobPriority::Low)), SubmitOutcome::Queued);
        assert_eq!(scheduler.submit(job("cam-b", JobPriority::Low)), SubmitOutcome::Queued);

        let outcome = scheduler.submit(job("cam-a", JobPriority::High));
        assert_eq!(outcome, SubmitOutcome::Updated);
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn full_queue_evicts_oldest_lowest_priority() {
        let mut scheduler = scheduler_with(3, 500, 2);
        scheduler.submit(job("low-old", JobPriority::Low));
        scheduler.submit(job("low-new", JobPriority::Low));
        scheduler.submit(job("medium", JobPriority::Medium));

        let outcome = scheduler.submit(job("high", JobPriority::High));
        assert_eq!(outcome, SubmitOutcome::Displaced("low-old".to_string()));
        assert_eq!(scheduler.len(), 3);

        // A bottom-priority submission cannot displace anything
        let outcome = scheduler.submit(job("low-late", JobPriority::Low));
        assert_eq!(outcome, SubmitOutcome::Rejected);
    }

    #[test]
    fn runs_highest_priority_first_in_fifo_order() {
        let mut scheduler = scheduler_with(10, 60_000, 2);
        scheduler.submit(job("low", JobPriority::Low));
        scheduler.submit(job("high-1", JobPriority::High));
        scheduler.submit(job("high-2", JobPriority::High));

        let pipeline = MeasurePipeline::new(Config::default()).unwrap();
        match scheduler.run_next(&pipeline) {
            Some(JobOutcome::Completed { source_id, .. }) => assert_eq!(source_id, "high-1"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        match scheduler.run_next(&pipeline) {
            Some(JobOutcome::Completed { source_id, .. }) => assert_eq!(source_id, "high-2"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        match scheduler.run_next(&pipeline) {
            Some(JobOutcome::Completed { source_id, .. }) => assert_eq!(source_id, "low"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(scheduler.run_next(&pipeline).is_none());
    }

    #[test]
    fn timed_out_job_retries_then_drops() {
        // A zero budget forces every run over its deadline
        let mut scheduler = scheduler_with(10, 0, 2);
        scheduler.submit(job("slow", JobPriority::Medium));
        let pipeline = MeasurePipeline::new(Config::default()).unwrap();

        for expected_attempts in 1..=2u32 {
            match scheduler.run_next(&pipeline) {
                Some(JobOutcome::TimedOut {
                    attempts, dropped, ..
                }) => {
                    assert_eq!(attempts, expected_attempts);
                    assert!(!dropped);
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert_eq!(scheduler.len(), 1);
        }

        match scheduler.run_next(&pipeline) {
            Some(JobOutcome::TimedOut {
                attempts, dropped, ..
            }) => {
                assert_eq!(attempts, 3);
                assert!(dropped);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(scheduler.is_empty());
    }

    #[test]
    fn over_budget_run_surfaces_a_timeout_error() {
        let scheduler = scheduler_with(10, 0, 2);
        let pipeline = MeasurePipeline::new(Config::default()).unwrap();
        let pending = job("slow", JobPriority::Medium);

        let result = scheduler.run_with_deadline(&pipeline, &pending);
        assert!(matches!(
            result,
            Err(CamMeasureError::StageTimeout { budget_ms: 0, .. })
        ));
    }

    #[test]
    fn paused_scheduler_skips_invocations() {
        let mut scheduler = scheduler_with(10, 60_000, 2);
        scheduler.submit(job("cam-a", JobPriority::Medium));
        let pipeline = MeasurePipeline::new(Config::default()).unwrap();

        scheduler.pause();
        assert!(scheduler.run_next(&pipeline).is_none());
        assert_eq!(scheduler.len(), 1);

        scheduler.resume();
        assert!(matches!(
            scheduler.run_next(&pipeline),
            Some(JobOutcome::Completed { .. })
        ));
    }
}
