//! Progress reporting
//!
//! Adapters describe their work up front as a [`ProgressPlan`]; the
//! orchestrator feeds visited units into a [`ProgressTracker`] which turns
//! them into percentages. Percentages never decrease and stay at or below
//! [`MAX_RUNNING_PERCENT`] until the caller marks the job complete.

/// Highest percentage reported while a job is still running
pub const MAX_RUNNING_PERCENT: u8 = 99;

/// Receives progress updates for one job
///
/// Implementations must return promptly; the translation loop waits on them.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn report(&self, percent: u8, message: &str) {
        self(percent, message)
    }
}

/// Sink that drops every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn report(&self, _percent: u8, _message: &str) {}
}

/// Shape of the work a document represents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressPlan {
    /// One denominator for the whole document
    Linear { total: usize },
    /// Equal share per section (sheet, slide, page), each with its own
    /// denominator
    Sectioned { sizes: Vec<usize> },
}

impl ProgressPlan {
    /// Total work units across the document
    pub fn total_units(&self) -> usize {
        match self {
            ProgressPlan::Linear { total } => *total,
            ProgressPlan::Sectioned { sizes } => sizes.iter().sum(),
        }
    }

    pub fn section_count(&self) -> usize {
        match self {
            ProgressPlan::Linear { .. } => 1,
            ProgressPlan::Sectioned { sizes } => sizes.len(),
        }
    }
}

/// Turns visited units into percentages
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    plan: ProgressPlan,
    processed: usize,
    section: usize,
    done_in_section: usize,
    last: u8,
}

impl ProgressTracker {
    pub fn new(plan: ProgressPlan) -> Self {
        Self {
            plan,
            processed: 0,
            section: 0,
            done_in_section: 0,
            last: 0,
        }
    }

    /// Units visited so far
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Move to `section`, returning the sections passed that had no units
    /// together with the percentage each of them completes
    pub fn enter_section(&mut self, section: usize) -> Vec<(usize, u8)> {
        let mut empty = Vec::new();
        if let ProgressPlan::Sectioned { sizes } = &self.plan {
            let count = sizes.len();
            while self.section < section.min(count) {
                if sizes[self.section] == 0 {
                    let percent = Self::clamp(self.section as u64 + 1, 1, 1, count);
                    empty.push((self.section, percent));
                }
                self.section += 1;
                self.done_in_section = 0;
            }
        }
        for (_, percent) in empty.iter_mut() {
            *percent = self.bump(*percent);
        }
        empty
    }

    /// Record `weight` units visited in `section`; returns the percentage to
    /// report, or `None` when there is no denominator to report against
    pub fn advance(&mut self, section: usize, weight: usize) -> Option<u8> {
        self.enter_section(section);
        self.processed += weight;
        self.done_in_section += weight;

        let percent = match &self.plan {
            ProgressPlan::Linear { total } => {
                if *total == 0 {
                    return None;
                }
                Self::clamp(self.processed as u64, 1, 1, *total)
            }
            ProgressPlan::Sectioned { sizes } => {
                let count = sizes.len();
                let size = *sizes.get(self.section)?;
                if size == 0 {
                    return None;
                }
                // floor(section*100/count + done*100/size/count)
                let numerator = self.section as u64 * size as u64 + self.done_in_section as u64;
                Self::clamp(numerator, 1, size, count)
            }
        };

        Some(self.bump(percent))
    }

    /// Report any trailing sections without units
    pub fn finish(&mut self) -> Vec<(usize, u8)> {
        let count = match &self.plan {
            ProgressPlan::Sectioned { sizes } => sizes.len(),
            ProgressPlan::Linear { .. } => return Vec::new(),
        };
        self.enter_section(count)
    }

    /// floor(numerator * 100 / (scale * size * count)) capped for running jobs
    fn clamp(numerator: u64, scale: u64, size: usize, count: usize) -> u8 {
        let denominator = scale * size as u64 * count as u64;
        if denominator == 0 {
            return 0;
        }
        let percent = numerator * 100 / denominator;
        percent.min(MAX_RUNNING_PERCENT as u64) as u8
    }

    fn bump(&mut self, percent: u8) -> u8 {
        self.last = self.last.max(percent);
        self.last
    }
}
