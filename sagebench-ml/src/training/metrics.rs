//! Classification metrics and per-epoch training history.

use crate::data::graph::NodeLabels;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pooled true positive / false positive / false negative counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionCounts {
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }

    pub fn support(&self) -> usize {
        self.tp + self.fn_
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Per-class counts for `num_classes` classes. Multi-label predictions and
/// targets are 0/1 indicator matrices.
pub fn class_counts(
    truth: &NodeLabels,
    pred: &NodeLabels,
    num_classes: usize,
) -> Result<Vec<ConfusionCounts>, MlError> {
    if truth.len() != pred.len() {
        return Err(MlError::training(format!(
            "{} predictions for {} targets",
            pred.len(),
            truth.len()
        )));
    }
    let mut counts = vec![ConfusionCounts::default(); num_classes];
    match (truth, pred) {
        (NodeLabels::Single(t), NodeLabels::Single(p)) => {
            for (&t, &p) in t.iter().zip(p) {
                if t >= num_classes || p >= num_classes {
                    return Err(MlError::training(format!(
                        "class index out of range for {num_classes} classes"
                    )));
                }
                if t == p {
                    counts[t].tp += 1;
                } else {
                    counts[p].fp += 1;
                    counts[t].fn_ += 1;
                }
            }
        }
        (NodeLabels::Multi(t), NodeLabels::Multi(p)) => {
            if t.shape() != p.shape() || t.ncols() != num_classes {
                return Err(MlError::training("indicator matrices disagree in shape"));
            }
            for ((idx, &tv), &pv) in t.indexed_iter().zip(p.iter()) {
                let c = &mut counts[idx.1];
                match (tv > 0.5, pv > 0.5) {
                    (true, true) => c.tp += 1,
                    (false, true) => c.fp += 1,
                    (true, false) => c.fn_ += 1,
                    (false, false) => {}
                }
            }
        }
        _ => return Err(MlError::training("mixed single- and multi-label metrics")),
    }
    Ok(counts)
}

fn pooled(counts: &[ConfusionCounts]) -> ConfusionCounts {
    counts.iter().fold(ConfusionCounts::default(), |acc, c| ConfusionCounts {
        tp: acc.tp + c.tp,
        fp: acc.fp + c.fp,
        fn_: acc.fn_ + c.fn_,
    })
}

fn num_classes_of(truth: &NodeLabels, pred: &NodeLabels) -> usize {
    match (truth, pred) {
        (NodeLabels::Single(t), NodeLabels::Single(p)) => {
            t.iter().chain(p).max().map_or(0, |&m| m + 1)
        }
        (NodeLabels::Multi(t), _) => t.ncols(),
        (_, NodeLabels::Multi(p)) => p.ncols(),
    }
}

/// Micro-averaged F1 over pooled counts. Equals accuracy for single-label
/// tasks; 0 when there is nothing to count.
pub fn micro_f1(truth: &NodeLabels, pred: &NodeLabels) -> Result<f64, MlError> {
    let counts = class_counts(truth, pred, num_classes_of(truth, pred))?;
    Ok(pooled(&counts).f1())
}

/// One row of a [`ClassificationReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Text classification report: per-class precision, recall, F1 and support
/// followed by averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ReportRow>,
    /// Accuracy for single-label tasks.
    pub accuracy: Option<f64>,
    pub averages: Vec<ReportRow>,
}

impl ClassificationReport {
    pub fn new(truth: &NodeLabels, pred: &NodeLabels, num_classes: usize) -> Result<Self, MlError> {
        let counts = class_counts(truth, pred, num_classes)?;
        let classes: Vec<ReportRow> = counts
            .iter()
            .enumerate()
            .map(|(i, c)| ReportRow {
                label: i.to_string(),
                precision: c.precision(),
                recall: c.recall(),
                f1: c.f1(),
                support: c.support(),
            })
            .collect();
        let total: usize = classes.iter().map(|r| r.support).sum();
        let k = classes.len().max(1) as f64;
        let macro_avg = ReportRow {
            label: "macro avg".to_string(),
            precision: classes.iter().map(|r| r.precision).sum::<f64>() / k,
            recall: classes.iter().map(|r| r.recall).sum::<f64>() / k,
            f1: classes.iter().map(|r| r.f1).sum::<f64>() / k,
            support: total,
        };
        let weight = |f: fn(&ReportRow) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|r| f(r) * r.support as f64).sum::<f64>() / total as f64
            }
        };
        let weighted_avg = ReportRow {
            label: "weighted avg".to_string(),
            precision: weight(|r| r.precision),
            recall: weight(|r| r.recall),
            f1: weight(|r| r.f1),
            support: total,
        };

        let micro = pooled(&counts);
        let (accuracy, mut averages) = match truth {
            NodeLabels::Single(_) => (Some(micro.f1()), Vec::new()),
            NodeLabels::Multi(_) => (
                None,
                vec![ReportRow {
                    label: "micro avg".to_string(),
                    precision: micro.precision(),
                    recall: micro.recall(),
                    f1: micro.f1(),
                    support: total,
                }],
            ),
        };
        averages.push(macro_avg);
        averages.push(weighted_avg);

        Ok(Self {
            classes,
            accuracy,
            averages,
        })
    }

    pub fn total_support(&self) -> usize {
        self.classes.iter().map(|r| r.support).sum()
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .chain(&self.averages)
            .map(|r| r.label.len())
            .max()
            .unwrap_or(0)
            .max("weighted avg".len());

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for r in &self.classes {
            write_row(f, r, width)?;
        }
        writeln!(f)?;
        if let Some(accuracy) = self.accuracy {
            writeln!(
                f,
                "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
                "accuracy",
                "",
                "",
                accuracy,
                self.total_support()
            )?;
        }
        for r in &self.averages {
            write_row(f, r, width)?;
        }
        Ok(())
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, r: &ReportRow, width: usize) -> fmt::Result {
    writeln!(
        f,
        "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
        r.label, r.precision, r.recall, r.f1, r.support
    )
}

/// Metrics of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_f1: f64,
    pub val_loss: f64,
    pub val_f1: f64,
    pub test_f1: f64,
    pub improved: bool,
}

/// Per-epoch metrics of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn record(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs.len()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn improved_epochs(&self) -> impl Iterator<Item = usize> + '_ {
        self.epochs.iter().filter(|r| r.improved).map(|r| r.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_micro_f1_single_label_is_accuracy() {
        let truth = NodeLabels::Single(vec![0, 1, 1, 2]);
        let pred = NodeLabels::Single(vec![0, 1, 0, 2]);
        assert!((micro_f1(&truth, &pred).unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_micro_f1_multi_label() {
        let truth = NodeLabels::Multi(array![[1.0f32, 0.0, 1.0], [0.0, 1.0, 0.0]]);
        let pred = NodeLabels::Multi(array![[1.0f32, 1.0, 0.0], [0.0, 1.0, 0.0]]);
        // tp = 2, fp = 1, fn = 1
        assert!((micro_f1(&truth, &pred).unwrap() - 4.0 / 6.0).abs() < 1e-12);

        let empty = NodeLabels::Multi(array![[0.0f32, 0.0]]);
        assert_eq!(micro_f1(&empty, &empty).unwrap(), 0.0);
    }

    #[test]
    fn test_mismatched_inputs() {
        let truth = NodeLabels::Single(vec![0, 1]);
        assert!(micro_f1(&truth, &NodeLabels::Single(vec![0])).is_err());
        assert!(micro_f1(&truth, &NodeLabels::Multi(array![[1.0f32], [0.0]])).is_err());
    }

    #[test]
    fn test_report_text() {
        let truth = NodeLabels::Single(vec![0, 0, 1, 1]);
        let pred = NodeLabels::Single(vec![0, 1, 1, 1]);
        let report = ClassificationReport::new(&truth, &pred, 2).unwrap();

        assert_eq!(report.accuracy, Some(0.75));
        assert_eq!(report.classes[0].precision, 1.0);
        assert_eq!(report.classes[0].recall, 0.5);
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "             precision    recall  f1-score   support"
        );
        assert_eq!(
            lines[2],
            "           0      1.00      0.50      0.67         2"
        );
        assert_eq!(
            lines[5],
            "    accuracy                          0.75         4"
        );
        assert!(lines[6].starts_with("   macro avg"));
        assert!(lines[7].starts_with("weighted avg"));
    }

    #[test]
    fn test_report_multilabel_has_micro_row() {
        let truth = NodeLabels::Multi(array![[1.0f32, 0.0], [0.0, 1.0]]);
        let pred = NodeLabels::Multi(array![[1.0f32, 0.0], [1.0, 1.0]]);
        let report = ClassificationReport::new(&truth, &pred, 2).unwrap();
        assert_eq!(report.accuracy, None);
        assert_eq!(report.averages[0].label, "micro avg");
        assert_eq!(report.total_support(), 2);
    }

    #[test]
    fn test_history() {
        let mut history = TrainingHistory::default();
        for (epoch, improved) in [(1, true), (2, false), (3, true)] {
            history.record(EpochRecord {
                epoch,
                train_loss: 1.0,
                train_f1: 0.5,
                val_loss: 1.0,
                val_f1: 0.5,
                test_f1: 0.5,
                improved,
            });
        }
        assert_eq!(history.epochs_completed(), 3);
        assert_eq!(history.improved_epochs().collect::<Vec<_>>(), vec![1, 3]);
    }
}
