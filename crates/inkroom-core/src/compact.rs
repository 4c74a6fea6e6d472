//! History compaction: stroke simplification and log trimming.

use kurbo::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::{Action, Point};

/// Log length that triggers a trim.
pub const MAX_LOG_SIZE: usize = 10_000;
/// Entries kept after a trim.
pub const KEEP_SUFFIX: usize = 7_500;
/// Default simplification tolerance in canvas pixels.
pub const DEFAULT_EPSILON: f64 = 1.0;

/// Invalid log bounds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitsError {
    #[error("max_log_size must be greater than zero")]
    ZeroMaxSize,
    #[error("keep_suffix must be greater than zero")]
    ZeroSuffix,
    #[error("keep_suffix ({keep_suffix}) exceeds max_log_size ({max_log_size})")]
    SuffixTooLarge {
        keep_suffix: usize,
        max_log_size: usize,
    },
}

/// Memory bound for one room log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_log_size: usize,
    pub keep_suffix: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_log_size: MAX_LOG_SIZE,
            keep_suffix: KEEP_SUFFIX,
        }
    }
}

impl Limits {
    pub fn new(max_log_size: usize, keep_suffix: usize) -> Result<Self, LimitsError> {
        let limits = Self {
            max_log_size,
            keep_suffix,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.max_log_size == 0 {
            return Err(LimitsError::ZeroMaxSize);
        }
        if self.keep_suffix == 0 {
            return Err(LimitsError::ZeroSuffix);
        }
        if self.keep_suffix > self.max_log_size {
            return Err(LimitsError::SuffixTooLarge {
                keep_suffix: self.keep_suffix,
                max_log_size: self.max_log_size,
            });
        }
        Ok(())
    }

    /// Apply [`trim_log`] with these bounds.
    pub fn trim<T>(&self, log: Vec<T>) -> Vec<T> {
        trim_log(log, self.max_log_size, self.keep_suffix)
    }
}

/// Drop all but the newest `keep_suffix` entries once `log` outgrows `max_size`.
///
/// The suffix is clamped to `max_size`, so the result never exceeds the bound.
pub fn trim_log<T>(mut log: Vec<T>, max_size: usize, keep_suffix: usize) -> Vec<T> {
    if log.len() > max_size {
        let keep = keep_suffix.min(max_size);
        let dropped = log.len() - keep;
        log.drain(..dropped);
        log::debug!("Trimmed {} log entries, {} kept", dropped, keep);
    }
    log
}

/// Ramer-Douglas-Peucker simplification.
///
/// The first and last point always survive. Every discarded point lies within
/// `epsilon` of the segment joining the two survivors around it. Pressure is
/// carried through unchanged.
pub fn simplify(points: &[Point], epsilon: f64) -> Vec<Point> {
    retained_indices(points, epsilon)
        .into_iter()
        .map(|i| points[i])
        .collect()
}

/// Indices of the points [`simplify`] keeps, ascending.
pub fn retained_indices(points: &[Point], epsilon: f64) -> Vec<usize> {
    let epsilon = if epsilon.is_nan() { 0.0 } else { epsilon.max(0.0) };
    if points.is_empty() {
        return Vec::new();
    }
    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    // Pending (first, last) spans; a work list keeps deep splits off the call stack.
    let mut spans = vec![(0, last)];
    while let Some((first, last)) = spans.pop() {
        if last - first < 2 {
            continue;
        }
        let (index, dist) = farthest_point(points, first, last);
        if dist > epsilon {
            keep[index] = true;
            spans.push((first, index));
            spans.push((index, last));
        }
    }

    keep.iter()
        .enumerate()
        .filter_map(|(i, &kept)| kept.then_some(i))
        .collect()
}

/// The interior point of `first..=last` farthest from their chord.
fn farthest_point(points: &[Point], first: usize, last: usize) -> (usize, f64) {
    let (start, end) = (points[first], points[last]);
    let mut best = (first, 0.0);
    for (i, point) in points.iter().enumerate().take(last).skip(first + 1) {
        let dist = segment_distance(*point, start, end);
        if dist > best.1 {
            best = (i, dist);
        }
    }
    best
}

/// Distance from `point` to the segment `start..end`.
pub fn segment_distance(point: Point, start: Point, end: Point) -> f64 {
    let segment = Vec2::new(end.x - start.x, end.y - start.y);
    let offset = Vec2::new(point.x - start.x, point.y - start.y);

    let len_sq = segment.hypot2();
    if len_sq < f64::EPSILON {
        return offset.hypot();
    }

    let t = (offset.dot(segment) / len_sq).clamp(0.0, 1.0);
    (offset - segment * t).hypot()
}

/// Simplify each run of `Draw` actions in `actions`.
///
/// A run ends at any `Start` or `Clear`, or where the stamped peer changes.
/// Non-`Draw` actions are kept in place and surviving draws keep their
/// metadata.
pub fn compact_batch(actions: Vec<Action>, epsilon: f64) -> Vec<Action> {
    let before = actions.len();
    let mut out = Vec::with_capacity(before);
    let mut run: Vec<Action> = Vec::new();

    for action in actions {
        let continues_run = action.is_draw()
            && run
                .last()
                .is_none_or(|prev: &Action| prev.peer() == action.peer());
        if !continues_run {
            flush_run(&mut run, &mut out, epsilon);
        }
        if action.is_draw() {
            run.push(action);
        } else {
            out.push(action);
        }
    }
    flush_run(&mut run, &mut out, epsilon);

    if out.len() < before {
        log::trace!("Compacted batch from {} to {} actions", before, out.len());
    }
    out
}

fn flush_run(run: &mut Vec<Action>, out: &mut Vec<Action>, epsilon: f64) {
    if run.is_empty() {
        return;
    }
    let points: Vec<Point> = run.iter().filter_map(Action::point).collect();
    let mut keep = retained_indices(&points, epsilon).into_iter().peekable();
    for (i, action) in run.drain(..).enumerate() {
        if keep.peek() == Some(&i) {
            keep.next();
            out.push(action);
        }
    }
}
