//! Palette extraction: k-means++ clustering of sampled pixels into a
//! bounded set of ink colors.
//!
//! The extractor never fails. Inputs it cannot cluster meaningfully are
//! answered with a degenerate palette and a [`PaletteSource`] saying so:
//!
//! - a near-uniform sample yields a single entry holding its mean color;
//! - a sample with too few opaque pixels yields the fixed black/white
//!   contrast palette.
//!
//! Randomness comes exclusively from the caller-supplied RNG, so a fixed
//! seed reproduces the same palette.

use std::collections::HashSet;

use image::RgbaImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::color::{Color, perceptual_distance, perceptual_distance_sq};
use crate::config::PipelineConfig;

/// Fewer opaque samples than this cannot be clustered.
pub const MIN_POPULATION: usize = 4;

/// One representative ink color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaletteEntry {
    /// The representative color.
    pub color: Color,
    /// Fraction of the sampled pixels this entry stands for, in `(0, 1]`.
    pub weight: f64,
    /// Position in the palette (0 = heaviest).
    pub index: usize,
    /// Reserved contrast entries are exempt from the min-distance rule
    /// and are never rejected by masking.
    pub reserved: bool,
}

/// How a palette came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaletteSource {
    /// Regular k-means++ clustering.
    Clustered,
    /// The sample was near-uniform; one entry holds its mean.
    Uniform,
    /// Too few usable pixels; fixed black/white palette.
    ContrastFallback,
}

/// Ordered set of palette entries, heaviest first. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
}

impl Palette {
    /// Build a palette from `(color, weight, reserved)` triples, sorting
    /// by descending weight and assigning indices.
    ///
    /// Returns the black/white fallback when `entries` is empty.
    #[must_use]
    pub fn from_weighted(mut entries: Vec<(Color, f64, bool)>) -> Self {
        entries.retain(|(_, w, _)| w.is_finite() && *w > 0.0);
        if entries.is_empty() {
            return Self::contrast_fallback();
        }
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(index, (color, weight, reserved))| PaletteEntry {
                color,
                weight: weight.min(1.0),
                index,
                reserved,
            })
            .collect();
        Self { entries }
    }

    /// The fixed two-color black/white palette.
    #[must_use]
    pub fn contrast_fallback() -> Self {
        Self {
            entries: vec![
                PaletteEntry {
                    color: Color::BLACK,
                    weight: 0.5,
                    index: 0,
                    reserved: true,
                },
                PaletteEntry {
                    color: Color::WHITE,
                    weight: 0.5,
                    index: 1,
                    reserved: true,
                },
            ],
        }
    }

    /// Entries, heaviest first.
    #[must_use]
    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    /// Number of entries (at least one).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of palette extraction, with the numbers diagnostics need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteExtraction {
    /// The extracted palette.
    pub palette: Palette,
    /// Whether clustering ran or a degenerate palette was substituted.
    pub source: PaletteSource,
    /// Opaque pixels in the sample.
    pub sample_count: usize,
    /// Distinct colors among the samples.
    pub distinct_colors: usize,
    /// Lloyd iterations performed.
    pub iterations: usize,
    /// Whether centroid movement dropped below the convergence threshold.
    pub converged: bool,
    /// Empty clusters that had to be reseeded.
    pub reseeded: usize,
    /// Cluster pairs merged for sitting closer than the min distance.
    pub merged: usize,
}

/// Collect the opaque pixels of a palette sample.
#[must_use]
pub fn sample_population(sample: &RgbaImage, alpha_floor: u8) -> Vec<Color> {
    let floor = alpha_floor.max(1);
    sample
        .pixels()
        .filter(|px| px.0[3] >= floor)
        .map(|px| Color::from(*px))
        .collect()
}

/// Cluster `population` into at most `config.max_colors` entries.
#[must_use]
pub fn extract_palette<R: Rng + ?Sized>(
    population: &[Color],
    config: &PipelineConfig,
    rng: &mut R,
) -> PaletteExtraction {
    let distinct_colors = population.iter().collect::<HashSet<_>>().len();
    let degenerate = |palette: Palette, source: PaletteSource| PaletteExtraction {
        palette,
        source,
        sample_count: population.len(),
        distinct_colors,
        iterations: 0,
        converged: true,
        reseeded: 0,
        merged: 0,
    };

    if population.len() < MIN_POPULATION {
        return degenerate(Palette::contrast_fallback(), PaletteSource::ContrastFallback);
    }

    let points: Vec<[f64; 3]> = population.iter().map(|c| c.to_f64()).collect();
    let mean = centroid(&points);
    let spread = points
        .iter()
        .map(|p| perceptual_distance_sq(*p, mean))
        .fold(0.0_f64, f64::max)
        .sqrt();

    if distinct_colors < 2 || spread <= config.min_palette_distance / 2.0 {
        let mut entries = vec![(Color::from_f64(mean), 1.0, false)];
        if config.force_contrast {
            add_contrast_entry(&mut entries, population, config);
        }
        return degenerate(Palette::from_weighted(entries), PaletteSource::Uniform);
    }

    let k = config.max_colors.min(distinct_colors).max(1);
    let mut centers = seed_plus_plus(&points, k, rng);
    let mut assignments = vec![0usize; points.len()];
    let mut iterations = 0;
    let mut converged = false;
    let mut reseeded = 0;

    for _ in 0..config.kmeans_max_iterations {
        iterations += 1;
        assign(&points, &centers, &mut assignments);
        let (movement, empty) = update_centers(&points, &assignments, &mut centers, rng);
        reseeded += empty;

        if movement < config.kmeans_convergence {
            converged = true;
            break;
        }
    }

    if centers.iter().flatten().any(|v| !v.is_finite()) {
        tracing::warn!("k-means produced non-finite centroids, using contrast fallback");
        return degenerate(Palette::contrast_fallback(), PaletteSource::ContrastFallback);
    }

    assign(&points, &centers, &mut assignments);
    let (_, counts) = accumulate(&points, &assignments, centers.len());

    #[allow(clippy::cast_precision_loss)]
    let total = points.len() as f64;
    #[allow(clippy::cast_precision_loss)]
    let mut clusters: Vec<(Color, f64)> = centers
        .iter()
        .zip(&counts)
        .filter(|&(_, &count)| count > 0)
        .map(|(center, &count)| (Color::from_f64(*center), count as f64 / total))
        .collect();

    let merged = merge_close(&mut clusters, config.min_palette_distance);

    let mut entries: Vec<(Color, f64, bool)> =
        clusters.into_iter().map(|(c, w)| (c, w, false)).collect();
    if config.force_contrast {
        add_contrast_entry(&mut entries, population, config);
    }

    PaletteExtraction {
        palette: Palette::from_weighted(entries),
        source: PaletteSource::Clustered,
        sample_count: population.len(),
        distinct_colors,
        iterations,
        converged,
        reseeded,
        merged,
    }
}

/// k-means++ seeding: the first center is uniform-random, each further
/// center is drawn with probability proportional to its squared distance
/// from the nearest center chosen so far.
fn seed_plus_plus<R: Rng + ?Sized>(points: &[[f64; 3]], k: usize, rng: &mut R) -> Vec<[f64; 3]> {
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..points.len())]);

    let mut nearest: Vec<f64> = points
        .iter()
        .map(|p| perceptual_distance_sq(*p, centers[0]))
        .collect();

    while centers.len() < k {
        let total: f64 = nearest.iter().sum();
        if total <= 0.0 {
            break;
        }
        let mut target = rng.r#gen::<f64>() * total;
        let mut chosen = points.len() - 1;
        for (i, d) in nearest.iter().enumerate() {
            if target < *d {
                chosen = i;
                break;
            }
            target -= d;
        }
        let center = points[chosen];
        centers.push(center);
        for (slot, p) in nearest.iter_mut().zip(points) {
            *slot = slot.min(perceptual_distance_sq(*p, center));
        }
    }

    centers
}

/// One Lloyd update. Each center moves to the mean of its members; a
/// center with no members is reseeded from a random sample point.
/// Returns the total movement and the number of reseeded centers.
fn update_centers<R: Rng + ?Sized>(
    points: &[[f64; 3]],
    assignments: &[usize],
    centers: &mut [[f64; 3]],
    rng: &mut R,
) -> (f64, usize) {
    let (sums, counts) = accumulate(points, assignments, centers.len());
    let mut movement = 0.0;
    let mut reseeded = 0;
    for (c, center) in centers.iter_mut().enumerate() {
        let updated = if counts[c] == 0 {
            reseeded += 1;
            points[rng.gen_range(0..points.len())]
        } else {
            #[allow(clippy::cast_precision_loss)]
            let n = counts[c] as f64;
            [sums[c][0] / n, sums[c][1] / n, sums[c][2] / n]
        };
        movement += perceptual_distance_sq(*center, updated).sqrt();
        *center = updated;
    }
    (movement, reseeded)
}

/// Assign every point to its perceptually nearest center.
fn assign(points: &[[f64; 3]], centers: &[[f64; 3]], assignments: &mut [usize]) {
    for (slot, p) in assignments.iter_mut().zip(points) {
        *slot = nearest_center(*p, centers);
    }
}

fn nearest_center(p: [f64; 3], centers: &[[f64; 3]]) -> usize {
    centers
        .iter()
        .enumerate()
        .map(|(i, c)| (i, perceptual_distance_sq(p, *c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i)
}

/// Per-cluster channel sums and member counts.
fn accumulate(points: &[[f64; 3]], assignments: &[usize], k: usize) -> (Vec<[f64; 3]>, Vec<usize>) {
    let mut sums = vec![[0.0; 3]; k];
    let mut counts = vec![0usize; k];
    for (p, &a) in points.iter().zip(assignments) {
        sums[a][0] += p[0];
        sums[a][1] += p[1];
        sums[a][2] += p[2];
        counts[a] += 1;
    }
    (sums, counts)
}

fn centroid(points: &[[f64; 3]]) -> [f64; 3] {
    #[allow(clippy::cast_precision_loss)]
    let n = points.len().max(1) as f64;
    let mut sum = [0.0; 3];
    for p in points {
        sum[0] += p[0];
        sum[1] += p[1];
        sum[2] += p[2];
    }
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

/// Repeatedly merge the closest pair of clusters while any pair sits
/// closer than `min_distance`. Returns the number of merges.
fn merge_close(clusters: &mut Vec<(Color, f64)>, min_distance: f64) -> usize {
    let mut merges = 0;
    loop {
        let mut closest: Option<(usize, usize, f64)> = None;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let d = perceptual_distance(clusters[i].0, clusters[j].0);
                if d < min_distance && closest.is_none_or(|(_, _, best)| d < best) {
                    closest = Some((i, j, d));
                }
            }
        }
        let Some((i, j, _)) = closest else {
            return merges;
        };

        let (ci, wi) = clusters[i];
        let (cj, wj) = clusters.swap_remove(j);
        let w = wi + wj;
        let [ri, gi, bi] = ci.to_f64();
        let [rj, gj, bj] = cj.to_f64();
        let blended = Color::from_f64([
            ri.mul_add(wi, rj * wj) / w,
            gi.mul_add(wi, gj * wj) / w,
            bi.mul_add(wi, bj * wj) / w,
        ]);
        clusters[i] = (blended, w);
        merges += 1;
    }
}

/// Append a reserved black or white entry, whichever contrasts more with
/// the heaviest color, unless the palette is full or already holds a
/// color within the min distance of that extreme.
fn add_contrast_entry(
    entries: &mut Vec<(Color, f64, bool)>,
    population: &[Color],
    config: &PipelineConfig,
) {
    let Some(dominant) = entries
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|e| e.0)
    else {
        return;
    };
    if entries.len() >= config.max_colors {
        tracing::debug!("palette full, skipping forced contrast entry");
        return;
    }

    let extreme = if perceptual_distance(dominant, Color::BLACK)
        >= perceptual_distance(dominant, Color::WHITE)
    {
        Color::BLACK
    } else {
        Color::WHITE
    };
    if entries
        .iter()
        .any(|(c, _, _)| perceptual_distance(*c, extreme) < config.min_palette_distance)
    {
        return;
    }

    let near = population
        .iter()
        .filter(|c| perceptual_distance(**c, extreme) < config.min_palette_distance)
        .count();
    #[allow(clippy::cast_precision_loss)]
    let weight = (near.max(1) as f64) / (population.len().max(1) as f64);
    entries.push((extreme, weight, true));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn two_tone(a: Color, a_count: usize, b: Color, b_count: usize) -> Vec<Color> {
        let mut pop = vec![a; a_count];
        pop.extend(std::iter::repeat_n(b, b_count));
        pop
    }

    fn config(max_colors: usize) -> PipelineConfig {
        PipelineConfig {
            max_colors,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn two_clear_clusters_are_found_heaviest_first() {
        let red = Color::new(250, 10, 10);
        let white = Color::WHITE;
        let pop = two_tone(white, 300, red, 100);
        let mut rng = StdRng::seed_from_u64(1);
        let result = extract_palette(&pop, &config(2), &mut rng);

        assert_eq!(result.source, PaletteSource::Clustered);
        let entries = result.palette.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].color, white);
        assert_eq!(entries[1].color, red);
        assert!((entries[0].weight - 0.75).abs() < 1e-9);
        assert!((entries[1].weight - 0.25).abs() < 1e-9);
        assert_eq!(entries[0].index, 0);
        assert_eq!(entries[1].index, 1);
    }

    #[test]
    fn palette_never_exceeds_max_colors() {
        let mut rng = StdRng::seed_from_u64(9);
        let pop: Vec<Color> = (0..2000)
            .map(|_| Color::new(rng.r#gen(), rng.r#gen(), rng.r#gen()))
            .collect();
        for k in 2..=6 {
            let mut rng = StdRng::seed_from_u64(3);
            let result = extract_palette(&pop, &config(k), &mut rng);
            assert!(!result.palette.is_empty());
            assert!(result.palette.len() <= k, "k={k} got {}", result.palette.len());
        }
    }

    #[test]
    fn entries_respect_min_distance() {
        let mut rng = StdRng::seed_from_u64(11);
        let pop: Vec<Color> = (0..3000)
            .map(|_| {
                let v: u8 = rng.gen_range(90..=140);
                Color::new(v, v.saturating_add(rng.gen_range(0..10)), v)
            })
            .chain(std::iter::repeat_n(Color::new(20, 20, 200), 500))
            .collect();
        let cfg = config(8);
        let mut rng = StdRng::seed_from_u64(5);
        let result = extract_palette(&pop, &cfg, &mut rng);
        let entries = result.palette.entries();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                if a.reserved || b.reserved {
                    continue;
                }
                let d = perceptual_distance(a.color, b.color);
                assert!(
                    d >= cfg.min_palette_distance,
                    "{} and {} only {d} apart",
                    a.color,
                    b.color
                );
            }
        }
    }

    #[test]
    fn weights_are_positive_sorted_and_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(21);
        let pop: Vec<Color> = (0..1000)
            .map(|i| match i % 3 {
                0 => Color::new(240, 240, 240),
                1 => Color::new(30, 90, 200),
                _ => Color::new(rng.gen_range(180..=220), 40, 40),
            })
            .collect();
        let mut rng = StdRng::seed_from_u64(2);
        let result = extract_palette(&pop, &config(4), &mut rng);
        let entries = result.palette.entries();
        let sum: f64 = entries.iter().map(|e| e.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for pair in entries.windows(2) {
            assert!(pair[0].weight >= pair[1].weight);
        }
        assert!(entries.iter().all(|e| e.weight > 0.0 && e.weight <= 1.0));
    }

    #[test]
    fn empty_cluster_is_reseeded_from_a_sample_point() {
        let points = vec![
            [10.0, 10.0, 10.0],
            [12.0, 10.0, 10.0],
            [240.0, 240.0, 240.0],
            [238.0, 240.0, 240.0],
        ];
        // The third center sits far from every point and attracts none.
        let mut centers = vec![[11.0, 10.0, 10.0], [239.0, 240.0, 240.0], [128.0, 0.0, 255.0]];
        let mut assignments = vec![0; points.len()];
        assign(&points, &centers, &mut assignments);
        assert!(!assignments.contains(&2));

        let mut rng = StdRng::seed_from_u64(9);
        let (movement, reseeded) = update_centers(&points, &assignments, &mut centers, &mut rng);
        assert_eq!(reseeded, 1);
        assert!(movement > 0.0);
        assert!(points.contains(&centers[2]));
        assert!(centers.iter().flatten().all(|v| v.is_finite()));

        assign(&points, &centers, &mut assignments);
        let (_, counts) = accumulate(&points, &assignments, centers.len());
        assert!(counts[2] > 0, "the reseeded center now owns its sample point");
    }

    #[test]
    fn same_seed_same_palette() {
        let mut rng = StdRng::seed_from_u64(77);
        let pop: Vec<Color> = (0..1500)
            .map(|_| Color::new(rng.r#gen(), rng.r#gen(), rng.r#gen()))
            .collect();
        let a = extract_palette(&pop, &config(5), &mut StdRng::seed_from_u64(42));
        let b = extract_palette(&pop, &config(5), &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn uniform_population_yields_single_entry() {
        let pop = vec![Color::new(128, 128, 128); 64];
        let result = extract_palette(&pop, &config(4), &mut StdRng::seed_from_u64(0));
        assert_eq!(result.source, PaletteSource::Uniform);
        assert_eq!(result.palette.len(), 1);
        assert_eq!(result.palette.entries()[0].color, Color::new(128, 128, 128));
        assert!((result.palette.entries()[0].weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn near_uniform_noise_still_counts_as_uniform() {
        let pop: Vec<Color> = (0..100u8)
            .map(|i| Color::new(120 + i % 4, 121, 119 + i % 3))
            .collect();
        let result = extract_palette(&pop, &config(6), &mut StdRng::seed_from_u64(0));
        assert_eq!(result.source, PaletteSource::Uniform);
        assert_eq!(result.palette.len(), 1);
    }

    #[test]
    fn forced_contrast_adds_reserved_extreme() {
        let pop = vec![Color::new(128, 128, 128); 64];
        let cfg = PipelineConfig {
            force_contrast: true,
            ..config(4)
        };
        let result = extract_palette(&pop, &cfg, &mut StdRng::seed_from_u64(0));
        assert_eq!(result.palette.len(), 2);
        let reserved: Vec<_> = result
            .palette
            .entries()
            .iter()
            .filter(|e| e.reserved)
            .collect();
        assert_eq!(reserved.len(), 1);
        assert!(reserved[0].color.is_extreme());
        assert!(reserved[0].weight > 0.0);
    }

    #[test]
    fn too_few_pixels_use_contrast_fallback() {
        let pop = vec![Color::new(10, 200, 30), Color::new(200, 10, 30)];
        let result = extract_palette(&pop, &config(4), &mut StdRng::seed_from_u64(0));
        assert_eq!(result.source, PaletteSource::ContrastFallback);
        assert_eq!(result.palette, Palette::contrast_fallback());
    }

    #[test]
    fn empty_population_uses_contrast_fallback() {
        let result = extract_palette(&[], &config(4), &mut StdRng::seed_from_u64(0));
        assert_eq!(result.source, PaletteSource::ContrastFallback);
        assert_eq!(result.palette.len(), 2);
    }

    #[test]
    fn k_is_capped_by_distinct_colors() {
        let pop = two_tone(Color::BLACK, 50, Color::WHITE, 50);
        let result = extract_palette(&pop, &config(8), &mut StdRng::seed_from_u64(4));
        assert_eq!(result.distinct_colors, 2);
        assert_eq!(result.palette.len(), 2);
    }

    #[test]
    fn merge_close_collapses_near_duplicates() {
        let mut clusters = vec![
            (Color::new(100, 100, 100), 0.5),
            (Color::new(104, 100, 100), 0.25),
            (Color::new(250, 0, 0), 0.25),
        ];
        let merges = merge_close(&mut clusters, 24.0);
        assert_eq!(merges, 1);
        assert_eq!(clusters.len(), 2);
        let gray = clusters.iter().find(|c| c.0.g == 100).unwrap();
        assert!((gray.1 - 0.75).abs() < 1e-12);
    }

    #[test]
    fn sample_population_skips_transparent_pixels() {
        let img = RgbaImage::from_fn(4, 1, |x, _| {
            if x < 2 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 255, 0, 10])
            }
        });
        let pop = sample_population(&img, 128);
        assert_eq!(pop, vec![Color::new(255, 0, 0); 2]);
    }

    #[test]
    fn from_weighted_drops_zero_weights_and_sorts() {
        let palette = Palette::from_weighted(vec![
            (Color::new(1, 1, 1), 0.2, false),
            (Color::new(2, 2, 2), 0.0, false),
            (Color::new(3, 3, 3), 0.8, false),
        ]);
        assert_eq!(palette.len(), 2);
        assert_eq!(palette.entries()[0].color, Color::new(3, 3, 3));
        assert_eq!(palette.entries()[1].index, 1);
    }
}
