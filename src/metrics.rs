// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Masked training metrics the U-Net was compiled with.
//!
//! None of these run during inference. A trained model records the names of
//! the losses and metrics it was compiled with, and loading it requires every
//! recorded name to resolve to an implementation. [`TrainingMetrics`] is the
//! static registry the loader checks those names against.
//!
//! Label value `2` marks voxels excluded from training.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, ArrayViewD, Axis, Zip, arr0};

use crate::error::{Result, SegmentationError};

/// Label value ignored by the masked loss and accuracy.
pub const IGNORE_LABEL: f32 = 2.0;

/// Fuzz factor used for clipping and log stability.
pub const EPSILON: f32 = 1e-7;

/// Metric reduced over the last axis.
pub type ReducedMetric = fn(ArrayViewD<'_, f32>, ArrayViewD<'_, f32>) -> ArrayD<f32>;

/// Metric reduced to a single value.
pub type ScalarMetric = fn(ArrayViewD<'_, f32>, ArrayViewD<'_, f32>) -> f32;

/// Names a model may declare as custom training objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomObject {
    /// `masked_binary_crossentropy`
    MaskedBinaryCrossentropy,
    /// `masked_accuracy`
    MaskedAccuracy,
    /// `masked_error_pos`
    MaskedErrorPos,
    /// `masked_error_neg`
    MaskedErrorNeg,
}

impl CustomObject {
    /// Every known custom object.
    pub const ALL: [Self; 4] = [
        Self::MaskedBinaryCrossentropy,
        Self::MaskedAccuracy,
        Self::MaskedErrorPos,
        Self::MaskedErrorNeg,
    ];

    /// Name as recorded in the model file.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MaskedBinaryCrossentropy => "masked_binary_crossentropy",
            Self::MaskedAccuracy => "masked_accuracy",
            Self::MaskedErrorPos => "masked_error_pos",
            Self::MaskedErrorNeg => "masked_error_neg",
        }
    }
}

impl fmt::Display for CustomObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CustomObject {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|object| object.name() == s)
            .ok_or_else(|| format!("Unknown custom object: {s}"))
    }
}

/// A metric implementation.
#[derive(Clone, Copy)]
pub enum Metric {
    /// Reduced over the last axis.
    Reduced(ReducedMetric),
    /// Reduced to a single value.
    Scalar(ScalarMetric),
}

impl Metric {
    /// Apply the metric. Scalar metrics come back as 0-d arrays.
    ///
    /// # Panics
    ///
    /// Panics if `y_true` and `y_pred` differ in shape.
    #[must_use]
    pub fn apply(self, y_true: ArrayViewD<'_, f32>, y_pred: ArrayViewD<'_, f32>) -> ArrayD<f32> {
        match self {
            Self::Reduced(metric) => metric(y_true, y_pred),
            Self::Scalar(metric) => arr0(metric(y_true, y_pred)).into_dyn(),
        }
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reduced(_) => f.write_str("Reduced"),
            Self::Scalar(_) => f.write_str("Scalar"),
        }
    }
}

/// Registry of metric implementations handed to the model loader.
///
/// The default registry holds all four masked metrics.
#[derive(Clone)]
pub struct TrainingMetrics {
    metrics: HashMap<CustomObject, Metric>,
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::empty()
            .with(
                CustomObject::MaskedBinaryCrossentropy,
                Metric::Reduced(masked_binary_crossentropy),
            )
            .with(CustomObject::MaskedAccuracy, Metric::Reduced(masked_accuracy))
            .with(CustomObject::MaskedErrorPos, Metric::Scalar(masked_error_pos))
            .with(CustomObject::MaskedErrorNeg, Metric::Scalar(masked_error_neg))
    }
}

impl fmt::Debug for TrainingMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                CustomObject::ALL
                    .iter()
                    .filter(|o| self.metrics.contains_key(*o))
                    .map(|o| o.name()),
            )
            .finish()
    }
}

impl TrainingMetrics {
    /// A registry with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            metrics: HashMap::new(),
        }
    }

    /// Register (or replace) the implementation of `object`.
    #[must_use]
    pub fn with(mut self, object: CustomObject, metric: Metric) -> Self {
        self.metrics.insert(object, metric);
        self
    }

    /// Implementation registered for `object`.
    #[must_use]
    pub fn get(&self, object: CustomObject) -> Option<Metric> {
        self.metrics.get(&object).copied()
    }

    /// Resolve a custom object name recorded in a model against this registry.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::ModelLoadError`] for unknown names and
    /// for known names with no registered implementation.
    pub fn resolve(&self, name: &str) -> Result<CustomObject> {
        let object: CustomObject = name
            .trim()
            .parse()
            .map_err(SegmentationError::ModelLoadError)?;
        if self.metrics.contains_key(&object) {
            Ok(object)
        } else {
            Err(SegmentationError::ModelLoadError(format!(
                "No implementation registered for custom object: {object}"
            )))
        }
    }

    /// Evaluate one registered metric.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::ModelLoadError`] if `object` is not registered.
    ///
    /// # Panics
    ///
    /// Panics if `y_true` and `y_pred` differ in shape.
    pub fn evaluate(
        &self,
        object: CustomObject,
        y_true: ArrayViewD<'_, f32>,
        y_pred: ArrayViewD<'_, f32>,
    ) -> Result<ArrayD<f32>> {
        let metric = self.get(object).ok_or_else(|| {
            SegmentationError::ModelLoadError(format!(
                "No implementation registered for custom object: {object}"
            ))
        })?;
        Ok(metric.apply(y_true, y_pred))
    }
}

fn mean_last_axis(values: &ArrayD<f32>) -> ArrayD<f32> {
    let Some(last) = values.ndim().checked_sub(1) else {
        return values.clone();
    };
    values.mean_axis(Axis(last)).unwrap_or_else(|| {
        let mut shape = values.shape().to_vec();
        shape.pop();
        ArrayD::from_elem(shape, f32::NAN)
    })
}

/// Binary cross-entropy with label-2 voxels masked out.
///
/// Masked predictions are the target and masked labels the (clipped) output,
/// matching the argument order the model was trained with.
///
/// # Panics
///
/// Panics if `y_true` and `y_pred` differ in shape.
#[must_use]
pub fn masked_binary_crossentropy(
    y_true: ArrayViewD<'_, f32>,
    y_pred: ArrayViewD<'_, f32>,
) -> ArrayD<f32> {
    let mut loss = ArrayD::<f32>::zeros(y_true.raw_dim());
    Zip::from(&mut loss)
        .and(&y_true)
        .and(&y_pred)
        .for_each(|l, &t, &p| {
            let mask = if t == IGNORE_LABEL { 0.0 } else { 1.0 };
            let target = p * mask;
            let output = (t * mask).clamp(EPSILON, 1.0 - EPSILON);
            *l = -(target * (output + EPSILON).ln()
                + (1.0 - target) * (1.0 - output + EPSILON).ln());
        });
    mean_last_axis(&loss)
}

/// Fraction of voxels whose rounded prediction equals the label, label-2
/// voxels counted as zero on both sides. Rounds half to even.
///
/// # Panics
///
/// Panics if `y_true` and `y_pred` differ in shape.
#[must_use]
pub fn masked_accuracy(y_true: ArrayViewD<'_, f32>, y_pred: ArrayViewD<'_, f32>) -> ArrayD<f32> {
    let mut hits = ArrayD::<f32>::zeros(y_true.raw_dim());
    Zip::from(&mut hits)
        .and(&y_true)
        .and(&y_pred)
        .for_each(|h, &t, &p| {
            let mask = if t == IGNORE_LABEL { 0.0 } else { 1.0 };
            *h = if (t * mask) == (p * mask).round_ties_even() {
                1.0
            } else {
                0.0
            };
        });
    mean_last_axis(&hits)
}

/// Mean `1 - p` over voxels labelled 1.
///
/// # Panics
///
/// Panics if `y_true` and `y_pred` differ in shape.
#[must_use]
pub fn masked_error_pos(y_true: ArrayViewD<'_, f32>, y_pred: ArrayViewD<'_, f32>) -> f32 {
    let (error, count) = Zip::from(&y_true)
        .and(&y_pred)
        .fold((0.0_f32, 0.0_f32), |(error, count), &t, &p| {
            if t == 1.0 {
                (error + (1.0 - p), count + 1.0)
            } else {
                (error, count)
            }
        });
    error / count.max(1.0)
}

/// Mean `p` over voxels labelled 0.
///
/// # Panics
///
/// Panics if `y_true` and `y_pred` differ in shape.
#[must_use]
pub fn masked_error_neg(y_true: ArrayViewD<'_, f32>, y_pred: ArrayViewD<'_, f32>) -> f32 {
    let (error, count) = Zip::from(&y_true)
        .and(&y_pred)
        .fold((0.0_f32, 0.0_f32), |(error, count), &t, &p| {
            if t == 0.0 {
                (error + p, count + 1.0)
            } else {
                (error, count)
            }
        });
    error / count.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn arr(shape: &[usize], values: Vec<f32>) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    #[test]
    fn test_custom_object_names() {
        for object in CustomObject::ALL {
            assert_eq!(object.name().parse::<CustomObject>().unwrap(), object);
        }
        assert!("dice_loss".parse::<CustomObject>().is_err());
    }

    #[test]
    fn test_resolve_unknown_name_fails_load() {
        let metrics = TrainingMetrics::default();
        assert_eq!(
            metrics.resolve(" masked_accuracy").unwrap(),
            CustomObject::MaskedAccuracy
        );
        assert!(matches!(
            metrics.resolve("focal_loss"),
            Err(SegmentationError::ModelLoadError(_))
        ));
    }

    #[test]
    fn test_masked_error_pos() {
        let y_true = arr(&[4], vec![1.0, 1.0, 0.0, 2.0]);
        let y_pred = arr(&[4], vec![0.8, 0.4, 0.3, 0.9]);
        let score = masked_error_pos(y_true.view(), y_pred.view());
        assert!((score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_masked_error_neg() {
        let y_true = arr(&[4], vec![1.0, 1.0, 0.0, 2.0]);
        let y_pred = arr(&[4], vec![0.8, 0.4, 0.3, 0.9]);
        let score = masked_error_neg(y_true.view(), y_pred.view());
        assert!((score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_error_without_matching_labels_is_zero() {
        let y_true = arr(&[3], vec![2.0, 2.0, 2.0]);
        let y_pred = arr(&[3], vec![0.5, 0.5, 0.5]);
        assert_eq!(masked_error_pos(y_true.view(), y_pred.view()), 0.0);
        assert_eq!(masked_error_neg(y_true.view(), y_pred.view()), 0.0);
    }

    #[test]
    fn test_masked_accuracy_rounds_half_to_even() {
        let y_true = arr(&[1, 4], vec![1.0, 0.0, 2.0, 1.0]);
        let y_pred = arr(&[1, 4], vec![0.7, 0.6, 0.9, 0.5]);
        let score = masked_accuracy(y_true.view(), y_pred.view());
        assert_eq!(score.shape(), &[1]);
        assert!((score.as_slice().unwrap()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_masked_binary_crossentropy() {
        let y_true = arr(&[2, 1], vec![1.0, 0.0]);
        let y_pred = arr(&[2, 1], vec![1.0, 1.0]);
        let loss = masked_binary_crossentropy(y_true.view(), y_pred.view());
        assert_eq!(loss.shape(), &[2]);
        let loss = loss.as_slice().unwrap();
        assert!(loss[0].abs() < 1e-5);
        // target 1 against a clipped output of 1e-7
        assert!(loss[1] > 15.0 && loss[1] < 16.0);
    }

    #[test]
    fn test_masked_binary_crossentropy_ignores_label_two() {
        let y_true = arr(&[1, 2], vec![2.0, 2.0]);
        let y_pred = arr(&[1, 2], vec![0.0, 0.0]);
        let loss = masked_binary_crossentropy(y_true.view(), y_pred.view());
        assert!(loss.iter().all(|l| l.abs() < 1e-5));
    }

    #[test]
    fn test_evaluate_dispatch() {
        let metrics = TrainingMetrics::default();
        let y_true = arr(&[2], vec![1.0, 0.0]);
        let y_pred = arr(&[2], vec![0.75, 0.25]);
        let pos = metrics
            .evaluate(CustomObject::MaskedErrorPos, y_true.view(), y_pred.view())
            .unwrap();
        assert_eq!(pos.ndim(), 0);
        assert!((pos.first().unwrap() - 0.25).abs() < 1e-6);
        let acc = metrics
            .evaluate(CustomObject::MaskedAccuracy, y_true.view(), y_pred.view())
            .unwrap();
        assert!((acc.first().unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_resolve_depends_on_registry() {
        let metrics = TrainingMetrics::empty()
            .with(CustomObject::MaskedErrorNeg, Metric::Scalar(masked_error_neg));

        assert_eq!(
            metrics.resolve("masked_error_neg").unwrap(),
            CustomObject::MaskedErrorNeg
        );
        // a known name with nothing registered fails like an unknown one
        assert!(matches!(
            metrics.resolve("masked_accuracy"),
            Err(SegmentationError::ModelLoadError(_))
        ));
        assert!(TrainingMetrics::empty().resolve("masked_error_neg").is_err());
    }

    #[test]
    fn test_registered_implementation_is_used() {
        // swap in a metric that ignores its inputs
        fn always_one(_: ArrayViewD<'_, f32>, _: ArrayViewD<'_, f32>) -> f32 {
            1.0
        }
        let metrics = TrainingMetrics::default()
            .with(CustomObject::MaskedErrorPos, Metric::Scalar(always_one));
        let y = arr(&[2], vec![1.0, 1.0]);

        let score = metrics
            .evaluate(CustomObject::MaskedErrorPos, y.view(), y.view())
            .unwrap();
        assert!((score.first().unwrap() - 1.0).abs() < 1e-6);
        assert!(
            TrainingMetrics::empty()
                .evaluate(CustomObject::MaskedErrorPos, y.view(), y.view())
                .is_err()
        );
    }
}
