//! Per-stage wall-clock accounting for a batch run.

use std::time::Duration;

/// Stages timed for every processed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load = 0,
    Preprocess = 1,
    Forward = 2,
    Decode = 3,
    Write = 4,
}

impl Stage {
    pub const ALL: [Stage; 5] = [Stage::Load, Stage::Preprocess, Stage::Forward, Stage::Decode, Stage::Write];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Load => "Load",
            Stage::Preprocess => "Preprocess",
            Stage::Forward => "Inference",
            Stage::Decode => "Postprocess",
            Stage::Write => "Write",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TimeCalc {
    n: usize,
    duration: Vec<Duration>,
}

impl TimeCalc {
    pub fn total(&self) -> Duration {
        self.duration.iter().sum::<Duration>()
    }

    /// Number of images that contributed at least one stage.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn avg(&self) -> Duration {
        match self.n {
            0 => Duration::ZERO,
            n => self.total() / n as u32,
        }
    }

    pub fn stage_total(&self, stage: Stage) -> Duration {
        self.duration.get(stage as usize).copied().unwrap_or_default()
    }

    pub fn avg_stage(&self, stage: Stage) -> Duration {
        match self.n {
            0 => Duration::ZERO,
            n => self.stage_total(stage) / n as u32,
        }
    }

    pub fn add(&mut self, stage: Stage, x: Duration) {
        let i = stage as usize;
        if self.duration.len() <= i {
            self.duration.resize(i + 1, Duration::ZERO);
        }
        self.duration[i] += x;
    }

    /// Marks one image as finished.
    pub fn tick(&mut self) {
        self.n += 1;
    }

    /// One line summary in stage order, e.g. `Load: 1.2ms | Preprocess: ...`.
    pub fn summary(&self) -> String {
        Stage::ALL
            .iter()
            .map(|s| format!("{}: {:.2?}", s.name(), self.avg_stage(*s)))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
