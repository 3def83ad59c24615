//! Annotations: serializable metadata trees attached to array values.
//!
//! Two standard shapes are used by the distributed engine: the locality
//! annotation `("locality", locality_id, num_localities)` and the tile
//! annotation `("tile", ("rows", start, stop), ...)` naming the half-open
//! slab this locality owns along each axis. Annotation equality ignores the
//! insertion order of named sub-annotations.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumString};

use crate::error::{Error, Result};

/// A single entry of an annotation: a scalar leaf or a named sub-annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationEntry {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Nested(Annotation),
}

impl AnnotationEntry {
    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }
}

/// A nested key/value tree attached to a value.
///
/// The name is the key (`"tile"`, `"locality"`, an axis label, ...); entries
/// are ordered scalars and named children. Equality compares scalar leaves
/// in order but named children as an unordered collection, so
/// `("tile", ("rows", ...), ("columns", ...))` equals
/// `("tile", ("columns", ...), ("rows", ...))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    name: String,
    entries: Vec<AnnotationEntry>,
}

impl Annotation {
    #[must_use]
    pub fn new(name: impl Into<String>, entries: Vec<AnnotationEntry>) -> Self {
        Self { name: name.into(), entries }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn entries(&self) -> &[AnnotationEntry] {
        &self.entries
    }

    /// Finds the named sub-annotation, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Annotation> {
        self.entries.iter().find_map(|entry| match entry {
            AnnotationEntry::Nested(ann) if ann.name == name => Some(ann),
            _ => None,
        })
    }

    /// Appends a named sub-annotation, replacing an existing one of the same
    /// name.
    pub fn set(&mut self, ann: Annotation) {
        if let Some(slot) = self.entries.iter_mut().find(|entry| {
            matches!(entry, AnnotationEntry::Nested(existing) if existing.name == ann.name)
        }) {
            *slot = AnnotationEntry::Nested(ann);
        } else {
            self.entries.push(AnnotationEntry::Nested(ann));
        }
    }

    fn scalar_leaves(&self) -> impl Iterator<Item = &AnnotationEntry> {
        self.entries.iter().filter(|e| !matches!(e, AnnotationEntry::Nested(_)))
    }

    fn nested(&self) -> impl Iterator<Item = &Annotation> {
        self.entries.iter().filter_map(|e| match e {
            AnnotationEntry::Nested(ann) => Some(ann),
            _ => None,
        })
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name {
            return false;
        }
        if !self.scalar_leaves().eq(other.scalar_leaves()) {
            return false;
        }
        let mine: Vec<&Annotation> = self.nested().collect();
        let theirs: Vec<&Annotation> = other.nested().collect();
        if mine.len() != theirs.len() {
            return false;
        }
        // Named children compare as an unordered collection; a matched
        // child may not be reused.
        let mut used = vec![false; theirs.len()];
        for child in mine {
            let Some(pos) = theirs
                .iter()
                .enumerate()
                .position(|(i, candidate)| !used[i] && *candidate == child)
            else {
                return false;
            };
            used[pos] = true;
        }
        true
    }
}

////////////////////////////////////////////////////////////////////////////
// Locality annotation

/// Identity of one participant in a distributed evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityInfo {
    pub locality_id: u32,
    pub num_localities: u32,
}

impl LocalityInfo {
    #[must_use]
    pub fn new(locality_id: u32, num_localities: u32) -> Self {
        Self { locality_id, num_localities }
    }

    #[must_use]
    pub fn as_annotation(&self) -> Annotation {
        Annotation::new(
            "locality",
            vec![
                AnnotationEntry::Int(i64::from(self.locality_id)),
                AnnotationEntry::Int(i64::from(self.num_localities)),
            ],
        )
    }

    pub fn from_annotation(ann: &Annotation) -> Result<Self> {
        if ann.name() != "locality" || ann.entries().len() != 2 {
            return Err(Error::locality(format!(
                "annotation '{}' is not a locality annotation",
                ann.name()
            )));
        }
        let id = ann.entries()[0].as_int();
        let num = ann.entries()[1].as_int();
        match (id, num) {
            (Some(id), Some(num)) if id >= 0 && num > 0 => Ok(Self::new(id as u32, num as u32)),
            _ => Err(Error::locality("locality annotation entries must be non-negative integers")),
        }
    }
}

////////////////////////////////////////////////////////////////////////////
// Tile annotations

/// Label of one tiled array dimension. Axis order inside an annotation is
/// irrelevant; the label determines which dimension a span describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum TileAxis {
    Pages,
    Rows,
    Columns,
}

impl TileAxis {
    /// Canonical axis labels for arrays of the given rank: vectors are
    /// column-tiled, matrices row/column-tiled, 3-tensors add pages.
    pub fn for_rank(rank: usize) -> Result<&'static [Self]> {
        match rank {
            1 => Ok(&[Self::Columns]),
            2 => Ok(&[Self::Rows, Self::Columns]),
            3 => Ok(&[Self::Pages, Self::Rows, Self::Columns]),
            _ => Err(Error::locality(format!("rank {rank} arrays cannot carry a tile annotation"))),
        }
    }
}

/// A half-open `[start, stop)` slab of one array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSpan {
    pub start: i64,
    pub stop: i64,
}

impl TileSpan {
    #[must_use]
    pub fn new(start: i64, stop: i64) -> Self {
        Self { start, stop }
    }

    #[must_use]
    pub fn size(&self) -> i64 {
        (self.stop - self.start).max(0)
    }

    /// Per-axis intersection geometry: `max(start)..min(stop)`.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let stop = self.stop.min(other.stop);
        (start < stop).then_some(Self { start, stop })
    }
}

/// The tile annotation of one locality: a span per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tiling {
    spans: SmallVec<[(TileAxis, TileSpan); 3]>,
}

impl Tiling {
    /// Builds a tiling from spans listed in canonical axis order for the
    /// given rank.
    pub fn from_spans(rank: usize, spans: &[TileSpan]) -> Result<Self> {
        let axes = TileAxis::for_rank(rank)?;
        if axes.len() != spans.len() {
            return Err(Error::locality(format!(
                "rank {rank} tiling requires {} span(s), received {}",
                axes.len(),
                spans.len()
            )));
        }
        Ok(Self {
            spans: axes.iter().copied().zip(spans.iter().copied()).collect(),
        })
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.spans.len()
    }

    #[must_use]
    pub fn span(&self, axis: TileAxis) -> Option<TileSpan> {
        self.spans.iter().find(|(a, _)| *a == axis).map(|(_, s)| *s)
    }

    /// Span of the `dim`-th dimension in canonical order for this rank.
    pub fn dim_span(&self, dim: usize) -> Result<TileSpan> {
        let axes = TileAxis::for_rank(self.rank())?;
        let axis = axes
            .get(dim)
            .ok_or_else(|| Error::locality(format!("dimension {dim} out of range for rank {}", self.rank())))?;
        self.span(*axis)
            .ok_or_else(|| Error::locality(format!("tile annotation misses the '{axis}' span")))
    }

    /// Spans in canonical order.
    pub fn spans(&self) -> Result<SmallVec<[TileSpan; 3]>> {
        (0..self.rank()).map(|d| self.dim_span(d)).collect()
    }

    /// The local shape this tiling describes.
    pub fn local_shape(&self) -> Result<SmallVec<[usize; 3]>> {
        Ok(self.spans()?.iter().map(|s| s.size() as usize).collect())
    }

    pub fn as_annotation(&self) -> Annotation {
        let entries = self
            .spans
            .iter()
            .map(|(axis, span)| {
                AnnotationEntry::Nested(Annotation::new(
                    axis.to_string(),
                    vec![AnnotationEntry::Int(span.start), AnnotationEntry::Int(span.stop)],
                ))
            })
            .collect();
        Annotation::new("tile", entries)
    }

    pub fn from_annotation(ann: &Annotation) -> Result<Self> {
        if ann.name() != "tile" {
            return Err(Error::locality(format!("annotation '{}' is not a tile annotation", ann.name())));
        }
        let mut spans: SmallVec<[(TileAxis, TileSpan); 3]> = SmallVec::new();
        for child in ann.nested() {
            let axis: TileAxis = child
                .name()
                .parse()
                .map_err(|_| Error::locality(format!("unknown tile axis '{}'", child.name())))?;
            let ints: Vec<i64> = child.entries().iter().filter_map(AnnotationEntry::as_int).collect();
            if ints.len() != 2 || ints[0] > ints[1] {
                return Err(Error::locality(format!("malformed '{axis}' span in tile annotation")));
            }
            if spans.iter().any(|(a, _)| *a == axis) {
                return Err(Error::locality(format!("duplicate '{axis}' span in tile annotation")));
            }
            spans.push((axis, TileSpan::new(ints[0], ints[1])));
        }
        // Normalize to canonical axis order regardless of input order.
        let axes = TileAxis::for_rank(spans.len())?;
        let mut ordered: SmallVec<[(TileAxis, TileSpan); 3]> = SmallVec::new();
        for axis in axes {
            let span = spans
                .iter()
                .find(|(a, _)| a == axis)
                .map(|(_, s)| *s)
                .ok_or_else(|| Error::locality(format!("tile annotation misses the '{axis}' span")))?;
            ordered.push((*axis, span));
        }
        Ok(Self { spans: ordered })
    }

    /// The smallest global shape containing every span of `tilings`.
    pub fn global_shape(tilings: &[Self]) -> Result<SmallVec<[usize; 3]>> {
        let rank = tilings.first().map_or(0, Self::rank);
        if rank == 0 || tilings.iter().any(|t| t.rank() != rank) {
            return Err(Error::locality("participating tilings disagree on rank"));
        }
        let mut shape: SmallVec<[usize; 3]> = SmallVec::from_elem(0, rank);
        for tiling in tilings {
            for (dim, slot) in shape.iter_mut().enumerate() {
                let span = tiling.dim_span(dim)?;
                if span.start < 0 {
                    return Err(Error::locality("tile spans must be non-negative"));
                }
                *slot = (*slot).max(span.stop as usize);
            }
        }
        Ok(shape)
    }

    /// Verifies that `tilings` cover every cell of the global shape: no
    /// gaps ever, and no cell covered twice unless `allow_overlap` is set
    /// (halo exchanges). Coverage is checked per cell; a gap cannot hide
    /// behind an overlap elsewhere.
    pub fn check_cover(tilings: &[Self], allow_overlap: bool) -> Result<SmallVec<[usize; 3]>> {
        let shape = Self::global_shape(tilings)?;
        let volume: usize = shape.iter().product();
        let mut counts = vec![0u32; volume];
        for tiling in tilings {
            let spans = tiling.spans()?;
            mark_cells(&spans, &shape, 0, 0, &mut counts);
        }
        if let Some(cell) = counts.iter().position(|count| *count == 0) {
            return Err(Error::locality(format!(
                "tile spans leave cell {cell} of {volume} uncovered; the partition has gaps"
            )));
        }
        if !allow_overlap && counts.iter().any(|count| *count > 1) {
            return Err(Error::locality("tile spans overlap but overlap was not requested"));
        }
        Ok(shape)
    }
}

/// Increments the coverage count of every cell inside the box the spans
/// describe, in row-major order over the global shape.
fn mark_cells(spans: &[TileSpan], shape: &[usize], base: usize, dim: usize, counts: &mut [u32]) {
    let stride: usize = shape[dim + 1..].iter().product();
    for i in spans[dim].start..spans[dim].stop {
        let offset = base + i as usize * stride;
        if dim + 1 == spans.len() {
            counts[offset] += 1;
        } else {
            mark_cells(spans, shape, offset, dim + 1, counts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_2d(rows: (i64, i64), columns: (i64, i64)) -> Annotation {
        Tiling::from_spans(2, &[TileSpan::new(rows.0, rows.1), TileSpan::new(columns.0, columns.1)])
            .unwrap()
            .as_annotation()
    }

    #[test]
    fn equality_ignores_axis_order() {
        let a = Annotation::new(
            "tile",
            vec![
                AnnotationEntry::Nested(Annotation::new(
                    "columns",
                    vec![AnnotationEntry::Int(0), AnnotationEntry::Int(2)],
                )),
                AnnotationEntry::Nested(Annotation::new(
                    "rows",
                    vec![AnnotationEntry::Int(0), AnnotationEntry::Int(1)],
                )),
            ],
        );
        let b = Annotation::new(
            "tile",
            vec![
                AnnotationEntry::Nested(Annotation::new(
                    "rows",
                    vec![AnnotationEntry::Int(0), AnnotationEntry::Int(1)],
                )),
                AnnotationEntry::Nested(Annotation::new(
                    "columns",
                    vec![AnnotationEntry::Int(0), AnnotationEntry::Int(2)],
                )),
            ],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn equality_is_sensitive_to_span_values() {
        assert_ne!(tile_2d((0, 1), (0, 2)), tile_2d((0, 1), (0, 3)));
    }

    #[test]
    fn tiling_round_trips_through_annotation() {
        let tiling = Tiling::from_spans(3, &[TileSpan::new(0, 4), TileSpan::new(2, 6), TileSpan::new(1, 3)]).unwrap();
        let back = Tiling::from_annotation(&tiling.as_annotation()).unwrap();
        assert_eq!(tiling, back);
        assert_eq!(back.local_shape().unwrap().as_slice(), &[4, 4, 2]);
    }

    #[test]
    fn from_annotation_normalizes_axis_order() {
        let ann = Annotation::new(
            "tile",
            vec![
                AnnotationEntry::Nested(Annotation::new(
                    "columns",
                    vec![AnnotationEntry::Int(3), AnnotationEntry::Int(5)],
                )),
                AnnotationEntry::Nested(Annotation::new(
                    "rows",
                    vec![AnnotationEntry::Int(0), AnnotationEntry::Int(2)],
                )),
            ],
        );
        let tiling = Tiling::from_annotation(&ann).unwrap();
        assert_eq!(tiling.dim_span(0).unwrap(), TileSpan::new(0, 2));
        assert_eq!(tiling.dim_span(1).unwrap(), TileSpan::new(3, 5));
    }

    #[test]
    fn cover_check_detects_gaps_and_overlaps() {
        let left = Tiling::from_spans(1, &[TileSpan::new(0, 2)]).unwrap();
        let right = Tiling::from_spans(1, &[TileSpan::new(2, 4)]).unwrap();
        let gap = Tiling::from_spans(1, &[TileSpan::new(3, 4)]).unwrap();
        let overlap = Tiling::from_spans(1, &[TileSpan::new(1, 4)]).unwrap();

        assert_eq!(
            Tiling::check_cover(&[left.clone(), right], false).unwrap().as_slice(),
            &[4]
        );
        assert!(Tiling::check_cover(&[left.clone(), gap], false).is_err());
        assert!(Tiling::check_cover(&[left.clone(), overlap.clone()], false).is_err());
        assert!(Tiling::check_cover(&[left, overlap], true).is_ok());
    }

    #[test]
    fn an_overlap_cannot_compensate_a_gap() {
        // Volumes add up to the logical shape, but cell 1 is uncovered and
        // cell 0 is double-covered.
        let tilings = vec![
            Tiling::from_spans(1, &[TileSpan::new(0, 1)]).unwrap(),
            Tiling::from_spans(1, &[TileSpan::new(0, 1)]).unwrap(),
            Tiling::from_spans(1, &[TileSpan::new(2, 4)]).unwrap(),
        ];
        assert!(Tiling::check_cover(&tilings, false).is_err());
        assert!(Tiling::check_cover(&tilings, true).is_err());
    }

    #[test]
    fn per_cell_cover_in_two_dimensions() {
        let quadrants: Vec<Tiling> = [(0, 0), (0, 2), (2, 0), (2, 2)]
            .iter()
            .map(|(r, c)| {
                Tiling::from_spans(2, &[TileSpan::new(*r, r + 2), TileSpan::new(*c, c + 2)]).unwrap()
            })
            .collect();
        assert_eq!(Tiling::check_cover(&quadrants, false).unwrap().as_slice(), &[4, 4]);

        let mut with_halo = quadrants.clone();
        with_halo[0] = Tiling::from_spans(2, &[TileSpan::new(0, 3), TileSpan::new(0, 2)]).unwrap();
        assert!(Tiling::check_cover(&with_halo, false).is_err());
        assert!(Tiling::check_cover(&with_halo, true).is_ok());
    }

    #[test]
    fn span_intersection_geometry() {
        let a = TileSpan::new(0, 4);
        let b = TileSpan::new(2, 6);
        assert_eq!(a.intersect(&b), Some(TileSpan::new(2, 4)));
        assert_eq!(a.intersect(&TileSpan::new(4, 6)), None);
    }
}
