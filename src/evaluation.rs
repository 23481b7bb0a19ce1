use ndarray::{ArrayBase, Data, Dimension};
use rayon::prelude::*;
use serde::Serialize;

use crate::volume_stats::{
    self, VolumeStatsError, check_volumes, dice3d, jaccard3d, sensitivity, specificity,
};

/// The four agreement statistics of one (prediction, reference) pair.
///
/// Each field is either a score or [`volume_stats::UNDEFINED_METRIC`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgreementResult {
    pub dice: f64,
    pub jaccard: f64,
    pub sensitivity: f64,
    pub specificity: f64,
}

impl AgreementResult {
    pub fn compute<A, S1, S2, D1, D2>(
        a: &ArrayBase<S1, D1>,
        b: &ArrayBase<S2, D2>,
    ) -> Result<Self, VolumeStatsError>
    where
        A: Copy + Into<f64>,
        S1: Data<Elem = A>,
        S2: Data<Elem = A>,
        D1: Dimension,
        D2: Dimension,
    {
        check_volumes("agreement", a, b)?;
        Ok(Self {
            dice: dice3d(a, b)?,
            jaccard: jaccard3d(a, b)?,
            sensitivity: sensitivity(a, b)?,
            specificity: specificity(a, b)?,
        })
    }

    pub fn dice_score(&self) -> Option<f64> {
        defined(self.dice)
    }

    pub fn jaccard_score(&self) -> Option<f64> {
        defined(self.jaccard)
    }

    pub fn sensitivity_score(&self) -> Option<f64> {
        defined(self.sensitivity)
    }

    pub fn specificity_score(&self) -> Option<f64> {
        defined(self.specificity)
    }
}

fn defined(score: f64) -> Option<f64> {
    volume_stats::is_defined(score).then_some(score)
}

/// Evaluates every pair independently on the rayon pool.
///
/// Results keep the input order. A rank or shape error only affects the
/// pair it came from.
pub fn evaluate_pairs<A, S1, S2, D1, D2>(
    pairs: &[(ArrayBase<S1, D1>, ArrayBase<S2, D2>)],
) -> Vec<Result<AgreementResult, VolumeStatsError>>
where
    A: Copy + Into<f64>,
    S1: Data<Elem = A> + Sync,
    S2: Data<Elem = A> + Sync,
    D1: Dimension,
    D2: Dimension,
{
    pairs
        .par_iter()
        .map(|(prediction, reference)| AgreementResult::compute(prediction, reference))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeEntry {
    pub name: String,
    #[serde(flatten)]
    pub scores: AgreementResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedEntry {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallScores {
    pub mean_dice: Option<f64>,
    pub mean_jaccard: Option<f64>,
    pub evaluated: usize,
    pub failed: usize,
}

/// Per-volume scores plus dataset-wide means, as written after a test run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub volume_stats: Vec<VolumeEntry>,
    pub failures: Vec<FailedEntry>,
    pub overall: OverallScores,
}

impl EvaluationReport {
    /// Builds a report from named results. Means only include defined scores.
    pub fn from_results<I, N>(results: I) -> Self
    where
        I: IntoIterator<Item = (N, Result<AgreementResult, VolumeStatsError>)>,
        N: Into<String>,
    {
        let mut volume_stats = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(scores) => volume_stats.push(VolumeEntry {
                    name: name.into(),
                    scores,
                }),
                Err(err) => {
                    log::warn!("evaluation failed: {err}");
                    failures.push(FailedEntry {
                        name: name.into(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let overall = OverallScores {
            mean_dice: mean(volume_stats.iter().filter_map(|v| v.scores.dice_score())),
            mean_jaccard: mean(volume_stats.iter().filter_map(|v| v.scores.jaccard_score())),
            evaluated: volume_stats.len(),
            failed: failures.len(),
        };

        Self {
            volume_stats,
            failures,
            overall,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::SortBy;
    use crate::volume_loader::VolumeLoader;
    use crate::volume_loader::fixtures::{SliceFixture, write_slice};
    use crate::volume_stats::UNDEFINED_METRIC;
    use ndarray::{Array3, ArrayD, IxDyn};
    use std::path::Path;

    fn cube(shape: (usize, usize, usize), fill: &[(usize, usize, usize)]) -> ArrayD<u8> {
        let mut v = Array3::<u8>::zeros(shape);
        for &(z, y, x) in fill {
            v[[z, y, x]] = 1;
        }
        v.into_dyn()
    }

    #[test]
    fn compute_bundles_all_four_scores() {
        let a = cube((3, 3, 3), &[(0, 0, 0), (1, 1, 1)]);
        let b = cube((3, 3, 3), &[(0, 0, 0)]);
        let result = AgreementResult::compute(&a, &b).unwrap();
        assert!((result.dice - 2.0 / 3.0).abs() < 1e-12);
        assert!((result.jaccard - 0.5).abs() < 1e-12);
        assert!((result.sensitivity - 0.5).abs() < 1e-12);
        assert!((result.specificity - 25.0 / 26.0).abs() < 1e-12);
    }

    #[test]
    fn sentinel_maps_to_none() {
        let a = cube((2, 2, 2), &[]);
        let result = AgreementResult::compute(&a, &a).unwrap();
        assert_eq!(result.dice, UNDEFINED_METRIC);
        assert_eq!(result.dice_score(), None);
        assert_eq!(result.jaccard_score(), None);
        assert_eq!(result.sensitivity_score(), None);
        assert_eq!(result.specificity_score(), Some(1.0));
    }

    #[test]
    fn batch_keeps_order_and_isolates_failures() {
        let pairs = vec![
            (cube((2, 2, 2), &[(0, 0, 0)]), cube((2, 2, 2), &[(0, 0, 0)])),
            (cube((3, 3, 3), &[]), cube((4, 3, 3), &[])),
            (
                ArrayD::<u8>::zeros(IxDyn(&[2, 2])),
                cube((2, 2, 2), &[(1, 1, 1)]),
            ),
            (cube((2, 2, 2), &[(0, 0, 0)]), cube((2, 2, 2), &[(1, 1, 1)])),
        ];
        let results = evaluate_pairs(&pairs);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().dice, 1.0);
        assert!(matches!(
            results[1],
            Err(VolumeStatsError::ShapeMismatch { .. })
        ));
        assert!(matches!(results[2], Err(VolumeStatsError::Rank { .. })));
        assert_eq!(results[3].as_ref().unwrap().dice, 0.0);
    }

    #[test]
    fn report_means_skip_undefined_and_failed_pairs() {
        let pairs = vec![
            (cube((2, 2, 2), &[(0, 0, 0)]), cube((2, 2, 2), &[(0, 0, 0)])),
            (cube((2, 2, 2), &[(0, 0, 0)]), cube((2, 2, 2), &[(1, 1, 1)])),
            (cube((2, 2, 2), &[]), cube((2, 2, 2), &[])),
            (cube((2, 2, 2), &[]), cube((3, 2, 2), &[])),
        ];
        let names = ["a.dcm", "b.dcm", "c.dcm", "d.dcm"];
        let report = EvaluationReport::from_results(names.into_iter().zip(evaluate_pairs(&pairs)));

        assert_eq!(report.overall.evaluated, 3);
        assert_eq!(report.overall.failed, 1);
        assert_eq!(report.overall.mean_dice, Some(0.5));
        assert_eq!(report.overall.mean_jaccard, Some(0.5));
        assert_eq!(report.failures[0].name, "d.dcm");

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["volume_stats"][0]["name"], "a.dcm");
        assert_eq!(json["volume_stats"][0]["dice"], 1.0);
        assert_eq!(json["volume_stats"][2]["dice"], -1.0);
        assert_eq!(json["overall"]["failed"], 1);
    }

    fn write_label_series(dir: &Path, series_uid: &str, slices: &[[u16; 6]]) {
        for (i, pixels) in slices.iter().enumerate() {
            let instance = i as i32 + 1;
            let fixture = SliceFixture {
                series_uid,
                description: "HippoLabels",
                instance,
                rows: 2,
                columns: 3,
                pixels: pixels.to_vec(),
            };
            write_slice(&dir.join(format!("{instance}.dcm")), &fixture);
        }
    }

    #[test]
    fn scores_label_series_loaded_from_dicom() {
        let dir = tempfile::tempdir().unwrap();
        let prediction_dir = dir.path().join("prediction");
        let reference_dir = dir.path().join("reference");
        let short_dir = dir.path().join("short");
        for d in [&prediction_dir, &reference_dir, &short_dir] {
            std::fs::create_dir_all(d).unwrap();
        }
        let prediction = [[0, 1, 1, 2, 2, 0], [0, 0, 1, 2, 0, 0]];
        let reference = [[0, 1, 0, 2, 2, 0], [0, 0, 1, 2, 2, 0]];
        write_label_series(&prediction_dir, "1.2.3.10", &prediction);
        write_label_series(&reference_dir, "1.2.3.20", &reference);
        write_label_series(&short_dir, "1.2.3.30", &reference[..1]);

        let load = |d: &Path| {
            VolumeLoader::load_from_directory(d, SortBy::InstanceNumber)
                .unwrap()
                .data
        };
        let predicted = load(&prediction_dir);
        let expected: Vec<u16> = prediction.iter().flatten().copied().collect();
        assert_eq!(predicted.iter().copied().collect::<Vec<_>>(), expected);

        let pairs = vec![
            (predicted.clone(), load(&reference_dir)),
            (predicted, load(&short_dir)),
        ];
        let report = EvaluationReport::from_results(
            ["patient-a", "patient-b"].into_iter().zip(evaluate_pairs(&pairs)),
        );

        // 6 foreground voxels on each side, 5 shared
        let scores = &report.volume_stats[0].scores;
        assert!((scores.dice - 5.0 / 6.0).abs() < 1e-12);
        assert!((scores.jaccard - 5.0 / 7.0).abs() < 1e-12);
        assert_eq!(report.overall.evaluated, 1);
        assert_eq!(report.overall.failed, 1);
        assert_eq!(report.failures[0].name, "patient-b");
    }

    #[test]
    fn report_without_defined_scores_has_no_means() {
        let report = EvaluationReport::from_results(Vec::<(
            String,
            Result<AgreementResult, VolumeStatsError>,
        )>::new());
        assert_eq!(report.overall.mean_dice, None);
        assert_eq!(report.overall.evaluated, 0);
    }
}
