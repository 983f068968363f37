//! Contour tracing: extract closed boundary polygons from a binary mask.
//!
//! This module defines the [`ContourTracer`] trait for pluggable tracing
//! algorithms and the [`ContourTracerKind`] enum for selecting one at
//! runtime.
//!
//! # Strategy pattern
//!
//! Both strategies trace outer boundaries only and produce the same kind
//! of output: closed polygons (first point equals last point) through the
//! centers of boundary pixels, one per 8-connected region, filtered by
//! vertex count and region area.

use std::fmt;

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::mask::{BACKGROUND, Mask};
use crate::types::{Point, Polyline};

/// Selects which contour tracing algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContourTracerKind {
    /// Moore-neighbor boundary tracing with Jacob's stopping criterion
    /// and a step bound proportional to the mask area.
    #[default]
    MooreNeighbor,

    /// Suzuki-Abe border following via `imageproc::contours::find_contours`,
    /// keeping outer borders only.
    BorderFollowing,
}

impl fmt::Display for ContourTracerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MooreNeighbor => f.write_str("MooreNeighbor"),
            Self::BorderFollowing => f.write_str("BorderFollowing"),
        }
    }
}

/// Noise filters applied to every traced region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceFilter {
    /// Closed polygons with fewer points than this are dropped.
    pub min_vertices: usize,
    /// Regions with fewer pixels than this are dropped.
    pub minimum_area: u64,
}

/// Outline of one connected mask region.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPolygon {
    outline: Polyline,
    area: u64,
}

impl BoundaryPolygon {
    /// The closed outline.
    #[must_use]
    pub const fn outline(&self) -> &Polyline {
        &self.outline
    }

    /// Outline points; the last equals the first.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        self.outline.points()
    }

    /// Number of outline points, closing point included.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.outline.len()
    }

    /// Always `false` for polygons that survived filtering.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.outline.is_empty()
    }

    /// Pixels in the enclosed region.
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.area
    }
}

/// Everything a tracer found in one mask.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceOutput {
    /// Polygons that passed the filters, in row-major discovery order.
    pub polygons: Vec<BoundaryPolygon>,
    /// Regions dropped by the vertex or area filters.
    pub discarded: usize,
    /// Traces cut short by the step bound and force-closed.
    pub step_limit_hits: usize,
}

/// Trait for contour tracing strategies.
pub trait ContourTracer {
    /// Trace the outer boundary of every region in `mask`.
    fn trace(&self, mask: &Mask, filter: &TraceFilter) -> TraceOutput;
}

impl ContourTracer for ContourTracerKind {
    fn trace(&self, mask: &Mask, filter: &TraceFilter) -> TraceOutput {
        match *self {
            Self::MooreNeighbor => trace_moore(mask, filter),
            Self::BorderFollowing => trace_border_following(mask, filter),
        }
    }
}

/// Clockwise neighbor offsets in image coordinates (y grows downward),
/// starting east.
const DIRECTIONS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Index of the west offset in [`DIRECTIONS`].
const WEST: usize = 4;

/// Per-pixel "already part of a traced region" flags.
struct Visited {
    width: i64,
    flags: Vec<bool>,
}

impl Visited {
    fn new(mask: &Mask) -> Self {
        let len = usize::try_from(mask.dimensions().area()).unwrap_or(0);
        Self {
            width: i64::from(mask.width()),
            flags: vec![false; len],
        }
    }

    fn index(&self, (x, y): (i64, i64)) -> Option<usize> {
        usize::try_from(y * self.width + x).ok()
    }

    fn is_marked(&self, p: (i64, i64)) -> bool {
        self.index(p)
            .and_then(|i| self.flags.get(i).copied())
            .unwrap_or(true)
    }

    /// Mark the 8-connected region containing `start` and return its
    /// pixel count.
    fn fill(&mut self, mask: &Mask, start: (i64, i64)) -> u64 {
        let mut stack = vec![start];
        let mut area = 0;
        while let Some(p) = stack.pop() {
            if !mask.is_set(p.0, p.1) || self.is_marked(p) {
                continue;
            }
            if let Some(slot) = self.index(p).and_then(|i| self.flags.get_mut(i)) {
                *slot = true;
            }
            area += 1;
            for (dx, dy) in DIRECTIONS {
                stack.push((p.0 + dx, p.1 + dy));
            }
        }
        area
    }
}

fn trace_moore(mask: &Mask, filter: &TraceFilter) -> TraceOutput {
    let mut output = TraceOutput::default();
    if mask.is_empty() {
        return output;
    }

    let step_limit = usize::try_from(mask.dimensions().area())
        .unwrap_or(usize::MAX)
        .saturating_mul(4)
        .max(8);
    let mut visited = Visited::new(mask);

    for y in 0..i64::from(mask.height()) {
        for x in 0..i64::from(mask.width()) {
            if !mask.is_set(x, y) || visited.is_marked((x, y)) {
                continue;
            }

            let (boundary, hit_limit) = follow_boundary(mask, (x, y), step_limit);
            let area = visited.fill(mask, (x, y));
            if hit_limit {
                output.step_limit_hits += 1;
                tracing::warn!(x, y, step_limit, "boundary trace hit its step bound");
            }

            let points = boundary
                .into_iter()
                .map(|(px, py)| pixel_center(px, py))
                .collect();
            keep_if_significant(&mut output, Polyline::new(points), area, filter);
        }
    }

    output
}

/// Walk the boundary of the region whose top-left pixel is `start`.
///
/// The search for each next pixel starts just past the background cell
/// examined before the previous move and proceeds clockwise. Tracing
/// stops when the walk is back at `start` and about to repeat its first
/// move, or after `step_limit` moves, in which case the outline is
/// force-closed and `true` is returned alongside it.
fn follow_boundary(mask: &Mask, start: (i64, i64), step_limit: usize) -> (Vec<(i64, i64)>, bool) {
    let mut boundary = vec![start];
    let mut current = start;
    let mut backtrack = WEST;
    let mut first_move = None;
    let mut steps = 0;

    loop {
        let next_dir = (1..=8).map(|i| (backtrack + i) % 8).find(|&d| {
            let (dx, dy) = DIRECTIONS[d];
            mask.is_set(current.0 + dx, current.1 + dy)
        });
        let Some(dir) = next_dir else {
            // Isolated pixel.
            boundary.push(start);
            return (boundary, false);
        };

        if current == start {
            match first_move {
                None => first_move = Some(dir),
                Some(first) if first == dir => return (boundary, false),
                Some(_) => {}
            }
        }

        let (dx, dy) = DIRECTIONS[dir];
        current = (current.0 + dx, current.1 + dy);
        boundary.push(current);
        backtrack = if dir % 2 == 0 {
            (dir + 6) % 8
        } else {
            (dir + 5) % 8
        };

        steps += 1;
        if steps >= step_limit {
            if current != start {
                boundary.push(start);
            }
            return (boundary, true);
        }
    }
}

fn trace_border_following(mask: &Mask, filter: &TraceFilter) -> TraceOutput {
    let mut output = TraceOutput::default();
    if mask.is_empty() {
        return output;
    }

    // Regions touching the image edge are misclassified without a
    // background frame around them.
    let image = mask.as_image();
    let padded = GrayImage::from_fn(image.width() + 2, image.height() + 2, |x, y| {
        if x == 0 || y == 0 || x > image.width() || y > image.height() {
            Luma([BACKGROUND])
        } else {
            *image.get_pixel(x - 1, y - 1)
        }
    });
    let contours: Vec<imageproc::contours::Contour<u32>> =
        imageproc::contours::find_contours(&padded);
    let mut visited = Visited::new(mask);

    for contour in contours {
        if !matches!(contour.border_type, imageproc::contours::BorderType::Outer) {
            continue;
        }
        let unpad = |p: &imageproc::point::Point<u32>| (i64::from(p.x) - 1, i64::from(p.y) - 1);
        let Some(first) = contour.points.first().map(unpad) else {
            continue;
        };
        if visited.is_marked(first) {
            continue;
        }
        let area = visited.fill(mask, first);

        let mut points: Vec<Point> = contour
            .points
            .iter()
            .map(|p| {
                let (x, y) = unpad(p);
                pixel_center(x, y)
            })
            .collect();
        points.push(pixel_center(first.0, first.1));
        keep_if_significant(&mut output, Polyline::new(points), area, filter);
    }

    output
}

fn keep_if_significant(output: &mut TraceOutput, outline: Polyline, area: u64, filter: &TraceFilter) {
    if outline.len() < filter.min_vertices || area < filter.minimum_area {
        output.discarded += 1;
        return;
    }
    output.polygons.push(BoundaryPolygon { outline, area });
}

#[allow(clippy::cast_precision_loss)]
fn pixel_center(x: i64, y: i64) -> Point {
    Point::new(x as f64 + 0.5, y as f64 + 0.5)
}
