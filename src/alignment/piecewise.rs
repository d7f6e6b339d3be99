use crate::error::AlignmentError;
use crate::types::{Segment, UNSET};

const UNSET_F: f64 = UNSET as f64;

/// Piecewise affine map built from segments ordered by boundary.
///
/// Segment `i` applies from the previous segment's boundary upward (the first
/// from zero). Windows are swept in ascending order and each later window
/// overrides earlier ones, so the last segment whose window contains a value
/// decides it, and the final segment extends past its own boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseTranslator {
    segments: Vec<Segment>,
}

impl PiecewiseTranslator {
    pub fn new(mut segments: Vec<Segment>) -> Result<Self, AlignmentError> {
        if segments.is_empty() {
            return Err(AlignmentError::insufficient(
                "build piecewise translator",
                "no segments",
            ));
        }
        segments.sort_by(|a, b| a.boundary.total_cmp(&b.boundary));
        if segments.windows(2).any(|w| w[0].boundary == w[1].boundary) {
            // TODO: decide whether coinciding boundaries with different maps should be an error.
            tracing::warn!("piecewise: segments share a boundary; the later segment takes precedence");
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Lower edge of each segment's window, in the domain being translated from.
    fn window_start(&self, index: usize, backwards: bool) -> f64 {
        let segment = &self.segments[index];
        let source_start = match index {
            0 => 0.0,
            _ => self.segments[index - 1].boundary,
        };
        if backwards {
            segment.coefficients.apply(source_start)
        } else {
            source_start
        }
    }

    /// Index of the segment that decides `value`.
    pub fn covering_index(&self, value: f64, backwards: bool) -> Option<usize> {
        (0..self.segments.len())
            .rev()
            .find(|&i| value >= self.window_start(i, backwards))
    }

    /// Map one value; `None` when no segment covers it. The unset sentinel maps to itself.
    pub fn translate(&self, value: f64, backwards: bool) -> Option<f64> {
        if value == UNSET_F {
            return Some(UNSET_F);
        }
        let coefficients = &self.segments[self.covering_index(value, backwards)?].coefficients;
        Some(if backwards {
            coefficients.apply_backwards(value)
        } else {
            coefficients.apply(value)
        })
    }

    /// Map every value. Values no segment covers become the unset sentinel
    /// when they all sit at or before `align_start_index`; any later one is
    /// an error.
    pub fn translate_all(
        &self,
        values: &[f64],
        align_start_index: usize,
        backwards: bool,
    ) -> Result<Vec<f64>, AlignmentError> {
        let mapped: Vec<Option<f64>> = values
            .iter()
            .map(|&v| self.translate(v, backwards))
            .collect();
        resolve_unaligned(mapped, align_start_index)
    }
}

/// Apply the unaligned-value policy to a batch of translations.
pub fn resolve_unaligned(
    mapped: Vec<Option<f64>>,
    align_start_index: usize,
) -> Result<Vec<f64>, AlignmentError> {
    let unresolved: Vec<usize> = mapped
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_none())
        .map(|(i, _)| i)
        .collect();
    if !unresolved.is_empty() {
        if unresolved.iter().all(|&i| i <= align_start_index) {
            tracing::warn!(events = ?unresolved, "could not align events before session start");
        } else {
            tracing::error!(
                events = ?unresolved,
                start_index = align_start_index,
                "events could not be aligned"
            );
            return Err(AlignmentError::Unaligned {
                count: unresolved.len(),
                start_index: align_start_index,
            });
        }
    }
    Ok(mapped.into_iter().map(|v| v.unwrap_or(UNSET_F)).collect())
}
