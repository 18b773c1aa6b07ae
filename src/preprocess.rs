//! Reusable feature preprocessing: impute + scale numerics, impute + one-hot
//! encode categoricals. Fit once on training data, applied unchanged at
//! evaluation and inference time.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use crate::features::CustomerFeatureVector;

/// Zero-mean unit-variance scaler fitted per column.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    means: Array1<f64>,
    stds: Array1<f64>,
}

impl StandardScaler {
    /// Fit column means and population standard deviations.
    /// Constant columns keep a unit divisor so transform stays finite.
    pub fn fit(x: &Array2<f64>) -> Self {
        let n_cols = x.ncols();
        let mut means = Array1::zeros(n_cols);
        let mut stds = Array1::ones(n_cols);
        for j in 0..n_cols {
            let col = x.column(j);
            means[j] = col.mean().unwrap_or(0.0);
            let std = col.std(0.0);
            if std.is_finite() && std > 0.0 {
                stds[j] = std;
            }
        }
        Self { means, stds }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for j in 0..out.ncols() {
            let mean = self.means[j];
            let std = self.stds[j];
            out.column_mut(j).mapv_inplace(|v| (v - mean) / std);
        }
        out
    }
}

/// A numeric model feature and whether it is `ln(1+x)`-compressed before
/// scaling. The log transform lives inside the fitted pipeline so the same
/// compression applies at inference.
#[derive(Debug, Clone)]
pub struct NumericColumn {
    pub name: String,
    pub log_transform: bool,
}

impl NumericColumn {
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log_transform: false,
        }
    }

    pub fn log1p(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log_transform: true,
        }
    }
}

/// The fixed feature schema fed into candidate models.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    pub numeric: Vec<NumericColumn>,
    pub categorical: Vec<String>,
}

impl FeatureSchema {
    /// Credit-risk schema: RFM numerics (monetary log-compressed for its
    /// heavy right skew), average transaction value, and the dominant
    /// categorical attributes.
    pub fn credit_risk() -> Self {
        Self {
            numeric: vec![
                NumericColumn::plain("recency_days"),
                NumericColumn::plain("frequency"),
                NumericColumn::log1p("monetary"),
                NumericColumn::plain("avg_value"),
            ],
            categorical: vec![
                "ProductCategory".to_string(),
                "ChannelId".to_string(),
                "PricingStrategy".to_string(),
            ],
        }
    }
}

/// Raw (pre-transform) feature values for a set of rows, aligned to a
/// [`FeatureSchema`]. `NaN` marks a missing numeric; `None` a missing
/// categorical. Categorical storage is column-major.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    pub n_rows: usize,
    pub numeric: Array2<f64>,
    pub categorical: Vec<Vec<Option<String>>>,
}

impl FeatureFrame {
    /// Build a frame from aggregated customers following `schema`.
    pub fn from_customers(
        customers: &[CustomerFeatureVector],
        schema: &FeatureSchema,
    ) -> crate::Result<Self> {
        let n_rows = customers.len();
        let mut numeric = Array2::from_elem((n_rows, schema.numeric.len()), f64::NAN);
        for (j, column) in schema.numeric.iter().enumerate() {
            for (i, customer) in customers.iter().enumerate() {
                match customer.numeric_value(&column.name) {
                    Some(v) => numeric[[i, j]] = v,
                    None => anyhow::bail!("unknown numeric feature column: {}", column.name),
                }
            }
        }

        let mut categorical = Vec::with_capacity(schema.categorical.len());
        for name in &schema.categorical {
            let column: Vec<Option<String>> = customers
                .iter()
                .map(|c| c.categorical_value(name).map(str::to_string))
                .collect();
            categorical.push(column);
        }

        Ok(Self {
            n_rows,
            numeric,
            categorical,
        })
    }

    /// Row subset in the given index order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let n_cols = self.numeric.ncols();
        let mut numeric = Array2::zeros((indices.len(), n_cols));
        for (out_i, &i) in indices.iter().enumerate() {
            for j in 0..n_cols {
                numeric[[out_i, j]] = self.numeric[[i, j]];
            }
        }
        let categorical = self
            .categorical
            .iter()
            .map(|column| indices.iter().map(|&i| column[i].clone()).collect())
            .collect();
        Self {
            n_rows: indices.len(),
            numeric,
            categorical,
        }
    }
}

/// Fitted column transformer.
///
/// Numerics: median imputation, optional `ln(1+x)`, standardization.
/// Categoricals: most-frequent imputation, one-hot encoding where categories
/// unseen at fit time encode as all zeros instead of failing.
#[derive(Debug, Clone)]
pub struct FeaturePreprocessor {
    schema: FeatureSchema,
    medians: Array1<f64>,
    scaler: StandardScaler,
    /// Most frequent value per categorical column, used as imputation fill.
    fill_values: Vec<String>,
    /// Sorted categories seen at fit time, per categorical column.
    categories: Vec<Vec<String>>,
}

impl FeaturePreprocessor {
    /// Fit imputation statistics, the scaler, and the category vocabulary on
    /// the training frame only.
    pub fn fit(schema: &FeatureSchema, frame: &FeatureFrame) -> crate::Result<Self> {
        if frame.n_rows == 0 {
            anyhow::bail!("cannot fit preprocessor on an empty frame");
        }
        if frame.numeric.ncols() != schema.numeric.len()
            || frame.categorical.len() != schema.categorical.len()
        {
            anyhow::bail!("feature frame does not match schema shape");
        }

        let mut medians = Array1::zeros(schema.numeric.len());
        for j in 0..schema.numeric.len() {
            let mut present: Vec<f64> = frame
                .numeric
                .column(j)
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .collect();
            medians[j] = median(&mut present).unwrap_or(0.0);
        }

        let mut fill_values = Vec::with_capacity(schema.categorical.len());
        let mut categories = Vec::with_capacity(schema.categorical.len());
        for column in &frame.categorical {
            let fill = most_frequent(column).unwrap_or_default();
            let mut seen: Vec<String> = column
                .iter()
                .map(|v| v.clone().unwrap_or_else(|| fill.clone()))
                .collect();
            seen.sort();
            seen.dedup();
            fill_values.push(fill);
            categories.push(seen);
        }

        // Impute and log-compress first; the scaler is fitted on the values
        // it will actually see at transform time.
        let staged = stage_numeric(schema, &frame.numeric, &medians);
        let scaler = StandardScaler::fit(&staged);

        Ok(Self {
            schema: schema.clone(),
            medians,
            scaler,
            fill_values,
            categories,
        })
    }

    /// Transform a frame into the flat model matrix. Fitted state is never
    /// updated here, keeping train/test statistics leak-free.
    pub fn transform(&self, frame: &FeatureFrame) -> crate::Result<Array2<f64>> {
        if frame.numeric.ncols() != self.schema.numeric.len()
            || frame.categorical.len() != self.schema.categorical.len()
        {
            anyhow::bail!("feature frame does not match fitted schema");
        }

        let staged = stage_numeric(&self.schema, &frame.numeric, &self.medians);
        let scaled = self.scaler.transform(&staged);

        let n_numeric = self.schema.numeric.len();
        let width = n_numeric + self.categories.iter().map(Vec::len).sum::<usize>();
        let mut out = Array2::zeros((frame.n_rows, width));

        for i in 0..frame.n_rows {
            for j in 0..n_numeric {
                out[[i, j]] = scaled[[i, j]];
            }
        }

        let mut offset = n_numeric;
        for (c, column) in frame.categorical.iter().enumerate() {
            let vocabulary = &self.categories[c];
            for (i, value) in column.iter().enumerate() {
                let value = value.as_deref().unwrap_or(self.fill_values[c].as_str());
                // Unseen categories stay all-zero.
                if let Ok(pos) = vocabulary.binary_search_by(|v| v.as_str().cmp(value)) {
                    out[[i, offset + pos]] = 1.0;
                }
            }
            offset += vocabulary.len();
        }

        Ok(out)
    }

    /// Flat output feature names, paired one-to-one with transform columns.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .schema
            .numeric
            .iter()
            .map(|c| c.name.clone())
            .collect();
        for (c, name) in self.schema.categorical.iter().enumerate() {
            for category in &self.categories[c] {
                names.push(format!("{}_{}", name, category));
            }
        }
        names
    }
}

/// Impute missing numerics with the fitted medians and apply the per-column
/// log compression.
fn stage_numeric(schema: &FeatureSchema, numeric: &Array2<f64>, medians: &Array1<f64>) -> Array2<f64> {
    let mut staged = numeric.clone();
    for (j, column) in schema.numeric.iter().enumerate() {
        let fill = medians[j];
        staged.column_mut(j).mapv_inplace(|v| {
            let v = if v.is_finite() { v } else { fill };
            if column.log_transform {
                // ln(1+x) is undefined at or below -1; such totals collapse
                // to the transform's zero point rather than poisoning the
                // matrix with NaN.
                if v > -1.0 {
                    v.ln_1p()
                } else {
                    0.0
                }
            } else {
                v
            }
        });
    }
    staged
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).expect("finite values"));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Most frequent present value; ties resolve lexicographically.
fn most_frequent(column: &[Option<String>]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in column.iter().flatten() {
        *counts.entry(value.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_val, a_count), (b_val, b_count)| a_count.cmp(b_count).then(b_val.cmp(a_val)))
        .map(|(value, _)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn frame(numeric: Array2<f64>, categorical: Vec<Vec<Option<String>>>) -> FeatureFrame {
        FeatureFrame {
            n_rows: numeric.nrows(),
            numeric,
            categorical,
        }
    }

    fn small_schema() -> FeatureSchema {
        FeatureSchema {
            numeric: vec![NumericColumn::plain("recency_days"), NumericColumn::log1p("monetary")],
            categorical: vec!["ProductCategory".to_string()],
        }
    }

    fn cat(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_scaler_standardizes() {
        let x = array![[1.0, 10.0], [3.0, 30.0], [5.0, 50.0]];
        let scaler = StandardScaler::fit(&x);
        let scaled = scaler.transform(&x);
        for j in 0..2 {
            let col = scaled.column(j);
            assert!(col.mean().unwrap().abs() < 1e-9);
            assert!((col.std(0.0) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scaler_constant_column_stays_finite() {
        let x = array![[2.0], [2.0], [2.0]];
        let scaler = StandardScaler::fit(&x);
        let scaled = scaler.transform(&x);
        assert!(scaled.iter().all(|v| v.is_finite()));
        assert!(scaled.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_transform_has_no_missing_values() {
        let schema = small_schema();
        let train = frame(
            array![[1.0, 100.0], [f64::NAN, 200.0], [9.0, f64::NAN], [3.0, 50.0]],
            vec![vec![
                Some("a".to_string()),
                None,
                Some("b".to_string()),
                Some("a".to_string()),
            ]],
        );
        let preprocessor = FeaturePreprocessor::fit(&schema, &train).unwrap();
        let out = preprocessor.transform(&train).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
        assert_eq!(out.ncols(), 2 + 2); // two numerics + {a, b}
    }

    #[test]
    fn test_unseen_category_encodes_as_zeros() {
        let schema = small_schema();
        let train = frame(array![[1.0, 10.0], [2.0, 20.0]], vec![cat(&["a", "b"])]);
        let preprocessor = FeaturePreprocessor::fit(&schema, &train).unwrap();

        let test = frame(array![[1.5, 15.0]], vec![cat(&["zzz-new"])]);
        let out = preprocessor.transform(&test).unwrap();
        // One-hot block (columns 2..) is entirely zero for the unseen value.
        assert_eq!(out[[0, 2]], 0.0);
        assert_eq!(out[[0, 3]], 0.0);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_median_imputation_uses_fitted_median() {
        let schema = FeatureSchema {
            numeric: vec![NumericColumn::plain("recency_days")],
            categorical: vec![],
        };
        let train = frame(array![[1.0], [3.0], [100.0]], vec![]);
        let preprocessor = FeaturePreprocessor::fit(&schema, &train).unwrap();

        // A missing value at transform time lands exactly on the median (3.0),
        // i.e. matches the transform of an explicit 3.0.
        let with_missing = frame(array![[f64::NAN]], vec![]);
        let explicit = frame(array![[3.0]], vec![]);
        let a = preprocessor.transform(&with_missing).unwrap();
        let b = preprocessor.transform(&explicit).unwrap();
        assert!((a[[0, 0]] - b[[0, 0]]).abs() < 1e-12);
    }

    #[test]
    fn test_log_transform_inside_pipeline() {
        let schema = FeatureSchema {
            numeric: vec![NumericColumn::log1p("monetary")],
            categorical: vec![],
        };
        let train = frame(array![[0.0], [(10f64).exp() - 1.0]], vec![]);
        let preprocessor = FeaturePreprocessor::fit(&schema, &train).unwrap();
        let out = preprocessor.transform(&train).unwrap();
        // After ln(1+x) the two staged values are 0 and 10; standardized
        // they are symmetric around zero.
        assert!((out[[0, 0]] + out[[1, 0]]).abs() < 1e-9);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_feature_names_align_with_columns() {
        let schema = small_schema();
        let train = frame(array![[1.0, 10.0], [2.0, 20.0]], vec![cat(&["b", "a"])]);
        let preprocessor = FeaturePreprocessor::fit(&schema, &train).unwrap();
        let names = preprocessor.feature_names();
        assert_eq!(
            names,
            vec![
                "recency_days".to_string(),
                "monetary".to_string(),
                "ProductCategory_a".to_string(),
                "ProductCategory_b".to_string(),
            ]
        );
        let out = preprocessor.transform(&train).unwrap();
        assert_eq!(out.ncols(), names.len());
    }
}
