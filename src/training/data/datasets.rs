//! In-memory datasets and their CSV loaders

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use candle_core::{Device, Tensor};
use tracing::{debug, info};

use super::{DataError, Dataset, DatasetMetadata};

/// Number of MNIST pixels per row
pub const MNIST_PIXELS: usize = 784;

/// Number of MNIST digit classes
pub const MNIST_CLASSES: usize = 10;

/// Dataset held as a feature tensor and optional one-hot labels
#[derive(Debug, Clone)]
pub struct TensorDataset {
    features: Tensor,
    labels: Option<Tensor>,
    metadata: DatasetMetadata,
}

impl TensorDataset {
    /// Create a dataset from `[n, d]` features and `[n, c]` labels
    pub fn new(name: impl Into<String>, features: Tensor, labels: Option<Tensor>) -> Result<Self> {
        let name = name.into();
        let (num_samples, feature_dim) = features.dims2()?;
        let num_classes = match &labels {
            Some(labels) => {
                let (rows, cols) = labels.dims2()?;
                if rows != num_samples {
                    return Err(DataError::ShapeMismatch {
                        reason: format!(
                            "'{}' has {} feature rows and {} label rows",
                            name, num_samples, rows
                        ),
                    }
                    .into());
                }
                Some(cols)
            }
            None => None,
        };

        Ok(Self {
            features,
            labels,
            metadata: DatasetMetadata {
                name,
                num_samples,
                feature_dim,
                num_classes,
            },
        })
    }
}

impl Dataset for TensorDataset {
    fn len(&self) -> usize {
        self.metadata.num_samples
    }

    fn features(&self) -> &Tensor {
        &self.features
    }

    fn labels(&self) -> Option<&Tensor> {
        self.labels.as_ref()
    }

    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }
}

/// Which classes to keep and how to code them
///
/// Labeled classes get codes `0..k` in listed order; every unknown class
/// shares code `k`. Rows of other classes are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassFilter {
    /// Classes keeping their own code
    pub labeled: Vec<usize>,
    /// Classes merged into one "unknown" code
    pub unknown: Vec<usize>,
    /// Keep a column for the unknown code even when no unknown rows are kept
    pub reserve_unknown: bool,
}

impl ClassFilter {
    /// Create a filter
    pub fn new(labeled: Vec<usize>, unknown: Vec<usize>) -> Self {
        let reserve_unknown = !unknown.is_empty();
        Self {
            labeled,
            unknown,
            reserve_unknown,
        }
    }

    /// Keep the unknown column, so labeled-only data match `y_dim`
    pub fn with_unknown_code(mut self) -> Self {
        self.reserve_unknown = true;
        self
    }

    /// Width of the one-hot code
    pub fn num_codes(&self) -> usize {
        self.labeled.len() + usize::from(self.reserve_unknown)
    }

    /// Select rows and assign codes
    ///
    /// `portion` keeps the first fraction of each class. Output order is the
    /// labeled classes followed by the unknown classes.
    pub fn apply(&self, labels: &[usize], portion: f64) -> Vec<(usize, usize)> {
        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &label) in labels.iter().enumerate() {
            by_class.entry(label).or_default().push(row);
        }

        let take = |class: usize| -> Vec<usize> {
            by_class
                .get(&class)
                .map(|rows| {
                    let k = (rows.len() as f64 * portion) as usize;
                    rows[..k].to_vec()
                })
                .unwrap_or_default()
        };

        let mut selected = Vec::new();
        for (code, &class) in self.labeled.iter().enumerate() {
            selected.extend(take(class).into_iter().map(|row| (row, code)));
        }
        let unknown_code = self.labeled.len();
        for &class in &self.unknown {
            selected.extend(take(class).into_iter().map(|row| (row, unknown_code)));
        }
        selected
    }
}

/// One-hot rows; `None` codes become all-zero rows
fn one_hot(codes: &[Option<usize>], width: usize, device: &Device) -> Result<Tensor> {
    let mut values = vec![0.0f32; codes.len() * width];
    for (row, code) in codes.iter().enumerate() {
        if let Some(code) = code {
            values[row * width + code] = 1.0;
        }
    }
    Ok(Tensor::from_vec(values, (codes.len(), width), device)?)
}

/// Rows to keep, their codes and the one-hot width
///
/// Without a filter every row is kept, and rows past the kept fraction or
/// with a label outside `width` lose their label.
fn code_labels(
    labels: &[usize],
    filter: Option<&ClassFilter>,
    portion: f64,
    width: usize,
) -> (Vec<usize>, Vec<Option<usize>>, usize) {
    match filter {
        Some(filter) => {
            let (rows, codes): (Vec<usize>, Vec<Option<usize>>) = filter
                .apply(labels, portion)
                .into_iter()
                .map(|(row, code)| (row, Some(code)))
                .unzip();
            (rows, codes, filter.num_codes())
        }
        None => {
            let keep = (labels.len() as f64 * portion) as usize;
            let codes = labels
                .iter()
                .enumerate()
                .map(|(row, &label)| (row < keep && label < width).then_some(label))
                .collect();
            ((0..labels.len()).collect(), codes, width)
        }
    }
}

fn open_csv(path: &Path, has_headers: bool) -> Result<csv::Reader<std::fs::File>> {
    if !path.exists() {
        return Err(DataError::DatasetNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(DataError::from)?)
}

fn parse_row(record: &csv::StringRecord, row: usize) -> Result<Vec<f32>> {
    record
        .iter()
        .map(|field| {
            field.parse::<f32>().map_err(|e| {
                anyhow::Error::from(DataError::MalformedData {
                    row,
                    reason: format!("'{}': {}", field, e),
                })
            })
        })
        .collect()
}

/// MNIST in CSV form: a header line, then `label, p0, ..., p783` per row
///
/// Pixels are mapped from [0, 255] to [-1, 1].
#[derive(Debug, Clone)]
pub struct MnistCsv {
    path: PathBuf,
    filter: Option<ClassFilter>,
    portion: f64,
}

impl MnistCsv {
    /// Loader for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filter: None,
            portion: 1.0,
        }
    }

    /// Keep and relabel only some classes
    pub fn with_filter(mut self, filter: Option<ClassFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Fraction of each class to keep (with a filter) or to keep labeled (without)
    pub fn with_portion(mut self, portion: f64) -> Self {
        self.portion = portion;
        self
    }

    /// Read the file into memory
    pub fn load(&self, device: &Device) -> Result<TensorDataset> {
        let mut reader = open_csv(&self.path, true)?;

        let mut labels = Vec::new();
        let mut pixels: Vec<Vec<f32>> = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(DataError::from)?;
            let values = parse_row(&record, row)?;
            if values.len() != MNIST_PIXELS + 1 {
                return Err(DataError::MalformedData {
                    row,
                    reason: format!("expected {} columns, got {}", MNIST_PIXELS + 1, values.len()),
                }
                .into());
            }
            labels.push(values[0] as usize);
            pixels.push(values[1..].iter().map(|p| 2.0 * (p / 255.0) - 1.0).collect());
        }

        let name = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mnist".to_string());

        let (rows, codes, width) =
            code_labels(&labels, self.filter.as_ref(), self.portion, MNIST_CLASSES);

        if rows.is_empty() {
            return Err(DataError::EmptyDataset { name }.into());
        }

        let mut flat = Vec::with_capacity(rows.len() * MNIST_PIXELS);
        for &row in &rows {
            flat.extend_from_slice(&pixels[row]);
        }
        let features = Tensor::from_vec(flat, (rows.len(), MNIST_PIXELS), device)?;
        let labels = one_hot(&codes, width, device)?;

        info!("Loaded {} rows from {}", rows.len(), self.path.display());
        debug!("Label width {}", width);
        TensorDataset::new(name, features, Some(labels))
    }
}

/// Numeric CSV without header; with labels the first column is a class index
#[derive(Debug, Clone)]
pub struct ToyCsv {
    path: PathBuf,
    labeled: bool,
    num_classes: Option<usize>,
    filter: Option<ClassFilter>,
    portion: f64,
}

impl ToyCsv {
    /// Loader for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            labeled: false,
            num_classes: None,
            filter: None,
            portion: 1.0,
        }
    }

    /// Treat the first column as a class index
    pub fn with_labels(mut self, labeled: bool) -> Self {
        self.labeled = labeled;
        self
    }

    /// One-hot width without a filter; defaults to the largest label plus one
    pub fn with_num_classes(mut self, num_classes: Option<usize>) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Keep and relabel only some classes
    pub fn with_filter(mut self, filter: Option<ClassFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Fraction of each class to keep (with a filter) or to keep labeled (without)
    pub fn with_portion(mut self, portion: f64) -> Self {
        self.portion = portion;
        self
    }

    /// Read the file into memory
    pub fn load(&self, device: &Device) -> Result<TensorDataset> {
        let mut reader = open_csv(&self.path, false)?;

        let mut rows: Vec<Vec<f32>> = Vec::new();
        let mut labels = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(DataError::from)?;
            let mut values = parse_row(&record, row)?;
            if self.labeled {
                if values.is_empty() {
                    return Err(DataError::MalformedData {
                        row,
                        reason: "missing label column".to_string(),
                    }
                    .into());
                }
                labels.push(values.remove(0) as usize);
            }
            if let Some(first) = rows.first() {
                if first.len() != values.len() {
                    return Err(DataError::MalformedData {
                        row,
                        reason: format!("expected {} features, got {}", first.len(), values.len()),
                    }
                    .into());
                }
            }
            rows.push(values);
        }

        let name = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "toy".to_string());
        let width = match rows.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return Err(DataError::EmptyDataset { name }.into()),
        };

        let (kept, codes) = if self.labeled {
            let classes = match self.num_classes {
                Some(classes) => classes,
                None => labels.iter().max().map_or(0, |m| m + 1),
            };
            if self.filter.is_none() {
                if let Some((row, label)) = labels.iter().enumerate().find(|&(_, &l)| l >= classes) {
                    return Err(DataError::MalformedData {
                        row,
                        reason: format!("label {} outside {} classes", label, classes),
                    }
                    .into());
                }
            }
            let (kept, codes, classes) =
                code_labels(&labels, self.filter.as_ref(), self.portion, classes);
            (kept, Some((codes, classes)))
        } else {
            ((0..rows.len()).collect(), None)
        };

        if kept.is_empty() {
            return Err(DataError::EmptyDataset { name }.into());
        }

        let mut flat = Vec::with_capacity(kept.len() * width);
        for &row in &kept {
            flat.extend_from_slice(&rows[row]);
        }
        let features = Tensor::from_vec(flat, (kept.len(), width), device)?;
        let labels = match codes {
            Some((codes, classes)) => Some(one_hot(&codes, classes, device)?),
            None => None,
        };

        info!("Loaded {} rows from {}", kept.len(), self.path.display());
        TensorDataset::new(name, features, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_mnist(rows: &[(usize, f32)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let header: Vec<String> = std::iter::once("label".to_string())
            .chain((0..MNIST_PIXELS).map(|i| format!("p{}", i)))
            .collect();
        writeln!(file, "{}", header.join(",")).unwrap();
        for (label, pixel) in rows {
            let mut line = vec![label.to_string()];
            line.extend((0..MNIST_PIXELS).map(|_| pixel.to_string()));
            writeln!(file, "{}", line.join(",")).unwrap();
        }
        file
    }

    #[test]
    fn test_class_filter_relabels_and_merges_unknown() {
        let labels = vec![3, 5, 3, 7, 5, 9, 3];
        let filter = ClassFilter::new(vec![5, 3], vec![7, 9]);
        let selected = filter.apply(&labels, 1.0);
        assert_eq!(
            selected,
            vec![(1, 0), (4, 0), (0, 1), (2, 1), (6, 1), (3, 2), (5, 2)]
        );
        assert_eq!(filter.num_codes(), 3);
    }

    #[test]
    fn test_class_filter_portion_per_class() {
        let labels = vec![0, 0, 0, 0, 1, 1];
        let filter = ClassFilter::new(vec![0, 1], vec![]);
        let selected = filter.apply(&labels, 0.5);
        assert_eq!(selected, vec![(0, 0), (1, 0), (4, 1)]);
        assert_eq!(filter.num_codes(), 2);
    }

    #[test]
    fn test_labeled_only_filter_keeps_unknown_column() {
        let filter = ClassFilter::new(vec![4, 2], vec![]).with_unknown_code();
        assert_eq!(filter.num_codes(), 3);
        assert_eq!(filter.apply(&[2, 4, 7], 1.0), vec![(1, 0), (0, 1)]);
    }

    #[test]
    fn test_mnist_scaling_and_one_hot() {
        let file = write_mnist(&[(2, 0.0), (7, 255.0)]);
        let dataset = MnistCsv::new(file.path()).load(&Device::Cpu).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.metadata().num_classes, Some(10));

        let x = dataset.features().to_vec2::<f32>().unwrap();
        assert_eq!(x[0][0], -1.0);
        assert_eq!(x[1][783], 1.0);

        let y = dataset.labels().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(y[0][2], 1.0);
        assert_eq!(y[1][7], 1.0);
    }

    #[test]
    fn test_mnist_with_filter() {
        let file = write_mnist(&[(1, 0.0), (4, 0.0), (1, 0.0), (8, 0.0)]);
        let dataset = MnistCsv::new(file.path())
            .with_filter(Some(ClassFilter::new(vec![1], vec![4])))
            .load(&Device::Cpu)
            .unwrap();
        assert_eq!(dataset.len(), 3);
        let y = dataset.labels().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(y, vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_mnist_portion_without_filter_zeroes_tail_labels() {
        let file = write_mnist(&[(1, 0.0), (2, 0.0), (3, 0.0), (4, 0.0)]);
        let dataset = MnistCsv::new(file.path())
            .with_portion(0.5)
            .load(&Device::Cpu)
            .unwrap();
        let y = dataset.labels().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(y[1].iter().sum::<f32>(), 1.0);
        assert_eq!(y[2].iter().sum::<f32>(), 0.0);
        assert_eq!(y[3].iter().sum::<f32>(), 0.0);
    }

    #[test]
    fn test_missing_file() {
        let err = MnistCsv::new("/nonexistent/mnist_train.csv")
            .load(&Device::Cpu)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_toy_csv_with_labels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0, 0.5, 1.5").unwrap();
        writeln!(file, "2, -0.5, 2.5").unwrap();

        let dataset = ToyCsv::new(file.path())
            .with_labels(true)
            .load(&Device::Cpu)
            .unwrap();
        assert_eq!(dataset.metadata().feature_dim, 2);
        assert_eq!(dataset.metadata().num_classes, Some(3));
        assert_eq!(
            dataset.features().to_vec2::<f32>().unwrap(),
            vec![vec![0.5, 1.5], vec![-0.5, 2.5]]
        );
    }

    #[test]
    fn test_toy_csv_width_from_num_classes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0, 0.5").unwrap();
        writeln!(file, "1, 0.25").unwrap();

        let dataset = ToyCsv::new(file.path())
            .with_labels(true)
            .with_num_classes(Some(4))
            .load(&Device::Cpu)
            .unwrap();
        assert_eq!(dataset.metadata().num_classes, Some(4));

        let err = ToyCsv::new(file.path())
            .with_labels(true)
            .with_num_classes(Some(1))
            .load(&Device::Cpu)
            .unwrap_err();
        assert!(err.to_string().contains("outside 1 classes"));
    }

    #[test]
    fn test_toy_csv_with_filter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (label, value) in [(3, 0.0), (1, 1.0), (3, 2.0), (0, 3.0)] {
            writeln!(file, "{}, {}", label, value).unwrap();
        }

        let dataset = ToyCsv::new(file.path())
            .with_labels(true)
            .with_num_classes(Some(10))
            .with_filter(Some(ClassFilter::new(vec![3], Vec::new()).with_unknown_code()))
            .load(&Device::Cpu)
            .unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.features().to_vec2::<f32>().unwrap(), vec![vec![0.0], vec![2.0]]);
        let y = dataset.labels().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(y, vec![vec![1.0, 0.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn test_toy_csv_rejects_ragged_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0.5,1.5").unwrap();
        writeln!(file, "0.5").unwrap();
        // csv's own length check fires first
        assert!(ToyCsv::new(file.path()).load(&Device::Cpu).is_err());
    }
}
