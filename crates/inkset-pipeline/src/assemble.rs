//! Budgeted SVG assembly.
//!
//! Paths are admitted layer by layer in palette order. Within a layer the
//! simplest outlines (fewest segments, then shortest) go first. A layer
//! stops admitting at its own path budget. The whole document stops at
//! the total path budget or as soon as one path would overflow the byte
//! budget; later layers are not offered the remaining bytes.
//!
//! If the rendered document still exceeds the byte budget, an emergency
//! pass lowers coordinate precision one digit at a time down to integers,
//! then drops the longest remaining paths one by one until it fits.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Element, Group, Path};
use svg::node::{Node, Value};

use crate::color::Color;
use crate::config::PipelineConfig;
use crate::fit::{Segment, VectorPath};
use crate::layer::ColorLayer;
use crate::types::Dimensions;

/// Namespace of the `<inkset:summary>` metadata element.
pub const METADATA_NAMESPACE: &str = "https://inkset.dev/ns/1";

/// Bytes a `<path d="…"/>` element adds beyond its `d` string.
const PATH_ELEMENT_OVERHEAD: usize = r#"<path d=""/>"#.len() + 1;

/// Bytes a `<g fill="#rrggbb">…</g>` wrapper adds.
const GROUP_OVERHEAD: usize = r##"<g fill="#000000">"##.len() + "</g>".len() + 2;

/// The three hard limits assembly works under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    /// Most paths in any one color group.
    pub max_paths_per_layer: usize,
    /// Most paths in the document.
    pub max_total_paths: usize,
    /// Largest serialized size in bytes.
    pub max_document_bytes: usize,
}

impl From<&PipelineConfig> for Budgets {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_paths_per_layer: config.max_paths_per_layer,
            max_total_paths: config.max_total_paths,
            max_document_bytes: config.max_document_bytes,
        }
    }
}

/// Document-level facts written into the root element and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Working canvas size; becomes `width`, `height` and `viewBox`.
    pub dimensions: Dimensions,
    /// Palette entries extracted for this run.
    pub palette_size: usize,
    /// Whether the document comes from the monochrome fallback.
    pub fallback: bool,
}

/// One color group as it appears in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSummary {
    /// Fill color.
    pub color: Color,
    /// Palette index.
    pub index: usize,
    /// Paths in the group.
    pub path_count: usize,
}

/// The finished SVG document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvgDocument {
    svg: String,
    info: DocumentInfo,
    layers: Vec<LayerSummary>,
    precision: u8,
}

impl SvgDocument {
    /// The serialized document.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.svg
    }

    /// Consume the document, returning the serialized string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.svg
    }

    /// Canvas dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.info.dimensions
    }

    /// Color groups in document order.
    #[must_use]
    pub fn layers(&self) -> &[LayerSummary] {
        &self.layers
    }

    /// Number of `<g>` groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.layers.len()
    }

    /// Total `<path>` elements.
    #[must_use]
    pub fn path_count(&self) -> usize {
        self.layers.iter().map(|l| l.path_count).sum()
    }

    /// Palette entries extracted for the run.
    #[must_use]
    pub const fn palette_size(&self) -> usize {
        self.info.palette_size
    }

    /// Whether the monochrome fallback produced this document.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.info.fallback
    }

    /// Decimal places used for path coordinates.
    #[must_use]
    pub const fn precision(&self) -> u8 {
        self.precision
    }

    /// Serialized size in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.svg.len()
    }
}

/// Counts describing what assembly did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssemblyReport {
    /// Paths offered by the layers.
    pub candidate_paths: usize,
    /// Paths in the document.
    pub admitted_paths: usize,
    /// Paths refused during admission.
    pub refused_paths: usize,
    /// Paths dropped by the emergency pass.
    pub emergency_drops: usize,
    /// Precision finally used.
    pub precision: u8,
    /// Final serialized size (0 when no document was produced).
    pub byte_size: usize,
}

impl AssemblyReport {
    /// `true` when any budget forced paths out or precision down.
    #[must_use]
    pub const fn budget_exceeded(&self, requested_precision: u8) -> bool {
        self.refused_paths > 0 || self.emergency_drops > 0 || self.precision < requested_precision
    }
}

/// Output of [`assemble`].
#[derive(Debug, Clone)]
pub struct Assembly {
    /// `None` when no path survived; the caller must fall back.
    pub document: Option<SvgDocument>,
    /// What happened.
    pub report: AssemblyReport,
}

/// A layer's admitted paths, borrowed from the input.
struct Admitted<'a> {
    color: Color,
    index: usize,
    paths: Vec<&'a VectorPath>,
}

/// Combine color layers into one document under `budgets`.
#[must_use]
pub fn assemble(
    layers: &[ColorLayer],
    info: &DocumentInfo,
    budgets: &Budgets,
    precision: u8,
) -> Assembly {
    let candidate_paths: usize = layers.iter().map(|l| l.paths.len()).sum();
    let mut report = AssemblyReport {
        candidate_paths,
        precision,
        ..AssemblyReport::default()
    };

    let mut admitted = admit(layers, info, budgets, precision, candidate_paths);
    report.admitted_paths = admitted.iter().map(|a| a.paths.len()).sum();
    report.refused_paths = candidate_paths - report.admitted_paths;

    let (svg, precision, drops) =
        emergency_pass(&mut admitted, info, budgets.max_document_bytes, precision);
    report.precision = precision;
    report.emergency_drops = drops;
    report.admitted_paths -= drops;

    if report.admitted_paths == 0 {
        return Assembly {
            document: None,
            report,
        };
    }

    report.byte_size = svg.len();
    let document = SvgDocument {
        svg,
        info: *info,
        layers: summaries(&admitted),
        precision,
    };
    Assembly {
        document: Some(document),
        report,
    }
}

/// Render `layers` with no budgets at all.
///
/// Used for the fallback's last-resort rectangle, which must produce a
/// document whatever the limits say.
#[must_use]
pub fn render_unbudgeted(layers: &[ColorLayer], info: &DocumentInfo, precision: u8) -> SvgDocument {
    let admitted: Vec<Admitted<'_>> = layers
        .iter()
        .filter(|l| !l.paths.is_empty())
        .map(|l| Admitted {
            color: l.color,
            index: l.index,
            paths: l.paths.iter().collect(),
        })
        .collect();
    SvgDocument {
        svg: render(&admitted, info, precision),
        info: *info,
        layers: summaries(&admitted),
        precision,
    }
}

fn admit<'a>(
    layers: &'a [ColorLayer],
    info: &DocumentInfo,
    budgets: &Budgets,
    precision: u8,
    candidate_paths: usize,
) -> Vec<Admitted<'a>> {
    // Upper bound on the skeleton: metadata counts can only shrink.
    let mut bytes = render_skeleton(info, layers.len(), candidate_paths, precision).len();
    let mut total = 0;
    let mut admitted = Vec::new();
    let mut bytes_exhausted = false;

    for layer in layers {
        if bytes_exhausted || total >= budgets.max_total_paths {
            break;
        }
        let mut order: Vec<&VectorPath> = layer.paths.iter().collect();
        order.sort_by(|a, b| {
            a.segment_count()
                .cmp(&b.segment_count())
                .then(a.perimeter().total_cmp(&b.perimeter()))
        });

        let mut paths = Vec::new();
        let mut group_bytes = GROUP_OVERHEAD;
        for path in order {
            if paths.len() >= budgets.max_paths_per_layer || total >= budgets.max_total_paths {
                break;
            }
            let cost = path_data(path, precision).len() + PATH_ELEMENT_OVERHEAD;
            if bytes + group_bytes + cost > budgets.max_document_bytes {
                bytes_exhausted = true;
                break;
            }
            group_bytes += cost;
            paths.push(path);
            total += 1;
        }

        if !paths.is_empty() {
            bytes += group_bytes;
            admitted.push(Admitted {
                color: layer.color,
                index: layer.index,
                paths,
            });
        }
    }
    admitted
}

/// Render, then shed precision and paths until the document fits in
/// `max_bytes`. Returns the document, the precision used and the number
/// of paths dropped.
fn emergency_pass(
    admitted: &mut Vec<Admitted<'_>>,
    info: &DocumentInfo,
    max_bytes: usize,
    mut precision: u8,
) -> (String, u8, usize) {
    let mut svg = render(admitted, info, precision);

    while svg.len() > max_bytes && precision > 0 {
        precision -= 1;
        svg = render(admitted, info, precision);
        tracing::debug!(precision, bytes = svg.len(), "lowered coordinate precision");
    }

    let mut drops = 0;
    while svg.len() > max_bytes && !admitted.is_empty() {
        let mut excess = svg.len() - max_bytes;
        while excess > 0 {
            let Some(freed) = drop_longest(admitted, precision) else {
                break;
            };
            drops += 1;
            excess = excess.saturating_sub(freed);
        }
        svg = render(admitted, info, precision);
    }
    if drops > 0 {
        tracing::debug!(drops, bytes = svg.len(), "dropped longest paths");
    }

    (svg, precision, drops)
}

/// Remove the longest admitted path, returning the bytes it occupied.
fn drop_longest(admitted: &mut Vec<Admitted<'_>>, precision: u8) -> Option<usize> {
    let (layer_idx, path_idx) = admitted
        .iter()
        .enumerate()
        .flat_map(|(li, layer)| layer.paths.iter().enumerate().map(move |(pi, p)| (li, pi, *p)))
        .max_by(|a, b| a.2.perimeter().total_cmp(&b.2.perimeter()))
        .map(|(li, pi, _)| (li, pi))?;

    let path = admitted[layer_idx].paths.remove(path_idx);
    let mut freed = path_data(path, precision).len() + PATH_ELEMENT_OVERHEAD;
    if admitted[layer_idx].paths.is_empty() {
        admitted.remove(layer_idx);
        freed += GROUP_OVERHEAD;
    }
    Some(freed)
}

fn summaries(admitted: &[Admitted<'_>]) -> Vec<LayerSummary> {
    admitted
        .iter()
        .map(|a| LayerSummary {
            color: a.color,
            index: a.index,
            path_count: a.paths.len(),
        })
        .collect()
}

/// Root element with metadata but no groups.
fn document_root(info: &DocumentInfo, groups: usize, paths: usize, precision: u8) -> Document {
    let Dimensions { width, height } = info.dimensions;

    let mut summary = Element::new("inkset:summary");
    summary.assign("xmlns:inkset", METADATA_NAMESPACE);
    summary.assign("palette-size", info.palette_size);
    summary.assign("groups", groups);
    summary.assign("paths", paths);
    summary.assign("precision", precision);
    summary.assign("fallback", info.fallback.to_string());
    let mut metadata = Element::new("metadata");
    metadata.append(summary);

    Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width, height))
        .set("data-palette-size", info.palette_size)
        .set("data-fallback", info.fallback.to_string())
        .add(metadata)
}

fn render_skeleton(info: &DocumentInfo, groups: usize, paths: usize, precision: u8) -> String {
    finish(&document_root(info, groups, paths, precision))
}

fn render(admitted: &[Admitted<'_>], info: &DocumentInfo, precision: u8) -> String {
    let paths = admitted.iter().map(|a| a.paths.len()).sum();
    let mut doc = document_root(info, admitted.len(), paths, precision);
    for layer in admitted {
        let mut group = Group::new().set("fill", layer.color.to_hex());
        for path in &layer.paths {
            group = group.add(Path::new().set("d", path_data(path, precision)));
        }
        doc = doc.add(group);
    }
    finish(&doc)
}

/// The svg crate omits the XML declaration, so it is prepended here.
fn finish(doc: &Document) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}

/// Path `d` string with coordinates rounded to `precision` decimals.
///
/// A trailing straight segment back to the start is replaced by `z`.
#[must_use]
pub fn path_data(path: &VectorPath, precision: u8) -> String {
    let q = |v: f64| quantize(v, precision);
    let start = path.start();
    let segments = match path.segments().split_last() {
        Some((Segment::Line(last), rest)) if *last == start => rest,
        _ => path.segments(),
    };

    let mut data = Data::new().move_to((q(start.x), q(start.y)));
    for segment in segments {
        data = match *segment {
            Segment::Line(to) => data.line_to((q(to.x), q(to.y))),
            Segment::Cubic { c1, c2, to } => data.cubic_curve_to(vec![
                q(c1.x),
                q(c1.y),
                q(c2.x),
                q(c2.y),
                q(to.x),
                q(to.y),
            ]),
        };
    }
    String::from(Value::from(data.close()))
}

#[allow(clippy::cast_possible_truncation)]
fn quantize(v: f64, precision: u8) -> f32 {
    let scale = 10f64.powi(i32::from(precision));
    // `+ 0.0` turns a rounded -0 into 0.
    ((v * scale).round() / scale + 0.0) as f32
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn rect(x0: f64, y0: f64, w: f64, h: f64) -> VectorPath {
        VectorPath::polygon(&[
            Point::new(x0, y0),
            Point::new(x0 + w, y0),
            Point::new(x0 + w, y0 + h),
            Point::new(x0, y0 + h),
        ])
        .unwrap()
    }

    fn info() -> DocumentInfo {
        DocumentInfo {
            dimensions: Dimensions {
                width: 200,
                height: 100,
            },
            palette_size: 2,
            fallback: false,
        }
    }

    fn unlimited() -> Budgets {
        Budgets {
            max_paths_per_layer: usize::MAX,
            max_total_paths: usize::MAX,
            max_document_bytes: usize::MAX,
        }
    }

    fn layer(color: Color, index: usize, paths: Vec<VectorPath>) -> ColorLayer {
        ColorLayer {
            color,
            index,
            paths,
        }
    }

    #[test]
    fn path_data_closes_with_z() {
        let d = path_data(&rect(10.5, 20.0, 5.0, 5.0), 2);
        assert_eq!(d, "M10.5,20 L15.5,20 L15.5,25 L10.5,25 z");
    }

    #[test]
    fn path_data_rounds_to_precision() {
        let path = VectorPath::polygon(&[
            Point::new(1.23456, 2.0),
            Point::new(3.0, 4.98765),
            Point::new(0.0, 0.0),
        ])
        .unwrap();
        assert_eq!(path_data(&path, 2), "M1.23,2 L3,4.99 L0,0 z");
        assert_eq!(path_data(&path, 0), "M1,2 L3,5 L0,0 z");
    }

    #[test]
    fn quantize_normalizes_negative_zero() {
        assert_eq!(quantize(-0.001, 1).to_string(), "0");
    }

    #[test]
    fn document_has_groups_and_metadata() {
        let layers = vec![
            layer(Color::new(255, 255, 255), 0, vec![rect(0.0, 0.0, 200.0, 100.0)]),
            layer(Color::new(255, 0, 0), 1, vec![rect(10.0, 10.0, 20.0, 20.0)]),
        ];
        let out = assemble(&layers, &info(), &unlimited(), 2);
        let doc = out.document.unwrap();
        let svg = doc.as_str();

        assert!(svg.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(svg.contains(r#"width="200""#));
        assert!(svg.contains(r#"height="100""#));
        assert!(svg.contains(r#"viewBox="0 0 200 100""#));
        assert!(svg.contains(r#"data-palette-size="2""#));
        assert!(svg.contains(r#"data-fallback="false""#));
        assert!(svg.contains(r##"<g fill="#ffffff">"##));
        assert!(svg.contains(r##"<g fill="#ff0000">"##));
        assert!(svg.contains(METADATA_NAMESPACE));
        assert_eq!(svg.matches("<path").count(), 2);
        assert_eq!(doc.group_count(), 2);
        assert_eq!(doc.path_count(), 2);
        assert_eq!(doc.byte_size(), svg.len());
        assert_eq!(out.report.refused_paths, 0);
        assert!(!out.report.budget_exceeded(2));

        let white = svg.find("#ffffff").unwrap();
        let red = svg.find("#ff0000").unwrap();
        assert!(white < red, "groups follow palette order");
    }

    #[test]
    fn per_layer_budget_keeps_simplest_paths() {
        let mut paths: Vec<VectorPath> = (0..5)
            .map(|i| rect(0.0, 0.0, f64::from(10 - i), 4.0))
            .collect();
        paths.push(
            VectorPath::polygon(&[
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(1.0, 1.0),
                Point::new(0.5, 2.0),
                Point::new(0.0, 1.0),
            ])
            .unwrap(),
        );
        let layers = vec![layer(Color::new(0, 0, 255), 0, paths)];
        let budgets = Budgets {
            max_paths_per_layer: 2,
            ..unlimited()
        };
        let out = assemble(&layers, &info(), &budgets, 2);
        let doc = out.document.unwrap();
        assert_eq!(doc.path_count(), 2);
        assert_eq!(out.report.refused_paths, 4);
        // The two shortest rectangles (widths 6 and 7) are admitted.
        assert!(doc.as_str().contains("L6,0"));
        assert!(doc.as_str().contains("L7,0"));
        assert!(!doc.as_str().contains("L0.5,2"));
    }

    #[test]
    fn total_budget_spans_layers() {
        let layers = vec![
            layer(Color::new(0, 0, 0), 0, vec![rect(0.0, 0.0, 5.0, 5.0); 3]),
            layer(Color::new(200, 0, 0), 1, vec![rect(0.0, 0.0, 5.0, 5.0); 3]),
        ];
        let budgets = Budgets {
            max_total_paths: 4,
            ..unlimited()
        };
        let doc = assemble(&layers, &info(), &budgets, 2).document.unwrap();
        assert_eq!(doc.path_count(), 4);
        assert_eq!(doc.layers()[0].path_count, 3);
        assert_eq!(doc.layers()[1].path_count, 1);
    }

    #[test]
    fn byte_budget_is_respected() {
        let paths: Vec<VectorPath> = (0..50)
            .map(|i| rect(f64::from(i) + 0.123, 1.456, 3.789, 2.5))
            .collect();
        let layers = vec![layer(Color::new(0, 90, 0), 0, paths)];
        let full = assemble(&layers, &info(), &unlimited(), 4)
            .document
            .unwrap()
            .byte_size();
        let budgets = Budgets {
            max_document_bytes: full / 2,
            ..unlimited()
        };
        let out = assemble(&layers, &info(), &budgets, 4);
        let doc = out.document.unwrap();
        assert!(doc.byte_size() <= full / 2);
        assert!(doc.path_count() < 50);
        assert!(out.report.budget_exceeded(4));
    }

    #[test]
    fn byte_budget_stops_later_layers() {
        let big = rect(0.123, 0.456, 150.789, 80.321);
        let small = rect(1.0, 1.0, 2.0, 2.0);
        let layers = vec![
            layer(Color::new(0, 0, 0), 0, vec![small.clone(), big]),
            layer(Color::new(200, 0, 0), 1, vec![small.clone()]),
        ];
        let with_small_only = assemble(
            &[layer(Color::new(0, 0, 0), 0, vec![small])],
            &info(),
            &unlimited(),
            4,
        )
        .document
        .unwrap()
        .byte_size();
        // Enough spare bytes for the second layer's group, too few for
        // the big outline.
        let budgets = Budgets {
            max_document_bytes: with_small_only + 64,
            ..unlimited()
        };
        let out = assemble(&layers, &info(), &budgets, 4);
        let doc = out.document.unwrap();
        assert_eq!(doc.group_count(), 1);
        assert_eq!(doc.path_count(), 1);
        assert_eq!(out.report.refused_paths, 2);
        assert!(out.report.budget_exceeded(4));
    }

    #[test]
    fn impossible_budget_yields_no_document() {
        let layers = vec![layer(Color::new(0, 0, 0), 0, vec![rect(0.0, 0.0, 5.0, 5.0)])];
        let budgets = Budgets {
            max_document_bytes: 10,
            ..unlimited()
        };
        let out = assemble(&layers, &info(), &budgets, 2);
        assert!(out.document.is_none());
        assert_eq!(out.report.admitted_paths, 0);
    }

    fn admitted_pair<'a>(long: &'a VectorPath, short: &'a VectorPath) -> Vec<Admitted<'a>> {
        vec![Admitted {
            color: Color::new(0, 0, 0),
            index: 0,
            paths: vec![long, short],
        }]
    }

    #[test]
    fn emergency_pass_lowers_precision_first() {
        let long = rect(0.111, 0.111, 100.333, 50.777);
        let short = rect(0.111, 0.111, 3.333, 2.777);
        let at_zero = render(&admitted_pair(&long, &short), &info(), 0).len();

        let mut admitted = admitted_pair(&long, &short);
        let (svg, precision, drops) = emergency_pass(&mut admitted, &info(), at_zero, 3);
        assert_eq!(precision, 0);
        assert_eq!(drops, 0);
        assert_eq!(svg.len(), at_zero);
    }

    #[test]
    fn emergency_pass_drops_longest_path() {
        let long = rect(0.111, 0.111, 100.333, 50.777);
        let short = rect(0.111, 0.111, 3.333, 2.777);
        let at_zero = render(&admitted_pair(&long, &short), &info(), 0).len();

        let mut admitted = admitted_pair(&long, &short);
        let (svg, precision, drops) = emergency_pass(&mut admitted, &info(), at_zero - 1, 3);
        assert_eq!(precision, 0);
        assert_eq!(drops, 1);
        assert!(svg.len() < at_zero);
        assert_eq!(admitted[0].paths.len(), 1);
        assert!((admitted[0].paths[0].perimeter() - short.perimeter()).abs() < 1e-9);
    }

    #[test]
    fn empty_layers_yield_no_document() {
        let out = assemble(&[], &info(), &unlimited(), 2);
        assert!(out.document.is_none());
        assert_eq!(out.report.candidate_paths, 0);
    }

    #[test]
    fn unbudgeted_render_always_has_content() {
        let layers = vec![layer(Color::new(9, 9, 9), 0, vec![rect(0.0, 0.0, 200.0, 100.0)])];
        let info = DocumentInfo {
            fallback: true,
            palette_size: 1,
            ..info()
        };
        let doc = render_unbudgeted(&layers, &info, 0);
        assert!(doc.is_fallback());
        assert_eq!(doc.path_count(), 1);
        assert!(doc.as_str().contains(r#"data-fallback="true""#));
    }
}
