use anyhow::{bail, ensure, Context, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{fmt, io, str::FromStr};

const IRIS_CSV: &str = include_str!("../data/iris.csv");

pub const NUM_FEATURES: usize = 4;
pub const NUM_CLASSES: usize = 3;

pub type Sample = [f64; NUM_FEATURES];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Setosa,
    Versicolor,
    Virginica,
}

impl Species {
    pub const ALL: [Species; NUM_CLASSES] = [Species::Setosa, Species::Versicolor, Species::Virginica];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Species::Setosa => "setosa",
            Species::Versicolor => "versicolor",
            Species::Virginica => "virginica",
        }
    }

    pub fn image_path(self) -> &'static str {
        match self {
            Species::Setosa => "images/setosa.jpg",
            Species::Versicolor => "images/versicolor.jpg",
            Species::Virginica => "images/virginica.jpg",
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Species {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let s = s.strip_prefix("iris-").unwrap_or(&s);
        Self::ALL
            .into_iter()
            .find(|species| species.name() == s)
            .with_context(|| format!("unknown species '{}'", s))
    }
}

pub fn class_names() -> [&'static str; NUM_CLASSES] {
    Species::ALL.map(Species::name)
}

/// Natural range of one measurement, along with the value the controls start at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureBounds {
    pub key: &'static str,
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl FeatureBounds {
    pub fn check(&self, value: f64) -> Result<f64> {
        ensure!(
            value.is_finite() && (self.min..=self.max).contains(&value),
            "{} must be between {} and {}, got {}",
            self.name,
            self.min,
            self.max,
            value
        );
        Ok(value)
    }
}

pub const FEATURES: [FeatureBounds; NUM_FEATURES] = [
    FeatureBounds {
        key: "sepal_length",
        name: "sepal length (cm)",
        min: 4.0,
        max: 8.0,
        default: 5.1,
    },
    FeatureBounds {
        key: "sepal_width",
        name: "sepal width (cm)",
        min: 2.0,
        max: 4.5,
        default: 3.5,
    },
    FeatureBounds {
        key: "petal_length",
        name: "petal length (cm)",
        min: 1.0,
        max: 7.0,
        default: 1.4,
    },
    FeatureBounds {
        key: "petal_width",
        name: "petal width (cm)",
        min: 0.1,
        max: 2.5,
        default: 0.2,
    },
];

pub fn feature_names() -> [&'static str; NUM_FEATURES] {
    FEATURES.map(|feature| feature.name)
}

/// Looks a feature up by its key ("petal_width") or display name ("petal width (cm)").
pub fn feature_index(name: &str) -> Option<usize> {
    let name = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    FEATURES.iter().position(|feature| {
        feature.key == name || feature.name.replace(' ', "_") == name
    })
}

pub fn default_sample() -> Sample {
    FEATURES.map(|feature| feature.default)
}

pub fn check_sample(sample: &Sample) -> Result<()> {
    for (feature, &value) in FEATURES.iter().zip(sample.iter()) {
        feature.check(value)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub samples: Vec<Sample>,
    pub labels: Vec<Species>,
}

pub struct Split {
    pub train: Dataset,
    pub test: Dataset,
}

impl Dataset {
    /// The bundled 150-row iris dataset.
    pub fn iris() -> Result<Self> {
        Self::from_csv(IRIS_CSV.as_bytes()).context("bundled iris dataset is malformed")
    }

    pub fn from_csv<R: io::Read>(rdr: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(rdr);

        let mut dataset = Dataset::default();
        for record in reader.records() {
            let record = record?;

            let mut sample = [0.0; NUM_FEATURES];
            for (i, value) in sample.iter_mut().enumerate() {
                let field = record
                    .get(i)
                    .with_context(|| format!("csv record missing {} entry.", FEATURES[i].key))?;
                *value = field
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid {} '{}'", FEATURES[i].key, field))?;
            }
            let species = record
                .get(NUM_FEATURES)
                .context("csv record missing species entry.")?
                .parse()?;

            dataset.samples.push(sample);
            dataset.labels.push(species);
        }

        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for label in &self.labels {
            counts[label.index()] += 1;
        }
        counts
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.is_empty(), "dataset is empty");
        ensure!(
            self.samples.len() == self.labels.len(),
            "dataset has {} samples but {} labels",
            self.samples.len(),
            self.labels.len()
        );
        ensure!(
            self.samples.iter().flatten().all(|value| value.is_finite()),
            "dataset contains non-finite measurements"
        );
        Ok(())
    }

    fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            samples: indices.iter().map(|&i| self.samples[i]).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// Shuffles each class separately with a seeded RNG and moves that class's
    /// proportional share of `ceil(len * test_fraction)` rows to the test side.
    /// Returns `(train_indices, test_indices)`.
    pub fn stratified_split_indices(
        &self,
        test_fraction: f64,
        seed: u64,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        self.validate()?;
        ensure!(
            test_fraction > 0.0 && test_fraction < 1.0,
            "test fraction must be in (0, 1), got {}",
            test_fraction
        );

        let n = self.len();
        let counts = self.class_counts();
        let n_classes = counts.iter().filter(|&&count| count > 0).count();
        let n_test = (n as f64 * test_fraction - 1e-9).ceil() as usize;
        if n_test < n_classes || n - n_test < n_classes {
            bail!(
                "a {} / {} split cannot hold every one of the {} classes",
                n - n_test,
                n_test,
                n_classes
            );
        }

        let per_class = Self::allocate_test_counts(&counts, n_test);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::with_capacity(n - n_test);
        let mut test = Vec::with_capacity(n_test);
        for species in Species::ALL {
            let mut indices: Vec<usize> = self
                .labels
                .iter()
                .enumerate()
                .filter(|&(_, &label)| label == species)
                .map(|(i, _)| i)
                .collect();
            indices.shuffle(&mut rng);

            let (class_test, class_train) = indices.split_at(per_class[species.index()]);
            test.extend_from_slice(class_test);
            train.extend_from_slice(class_train);
        }

        // Don't leave the partitions grouped by class:
        train.shuffle(&mut rng);
        test.shuffle(&mut rng);

        Ok((train, test))
    }

    pub fn stratified_split(&self, test_fraction: f64, seed: u64) -> Result<Split> {
        let (train, test) = self.stratified_split_indices(test_fraction, seed)?;
        Ok(Split {
            train: self.subset(&train),
            test: self.subset(&test),
        })
    }

    // Proportional allocation, the leftover rows going to the classes with
    // the largest fractional share (lowest class index on ties).
    fn allocate_test_counts(counts: &[usize; NUM_CLASSES], n_test: usize) -> [usize; NUM_CLASSES] {
        let total: usize = counts.iter().sum();
        let mut allocated = [0; NUM_CLASSES];
        let mut remainders = Vec::with_capacity(NUM_CLASSES);
        for (class, &count) in counts.iter().enumerate() {
            let exact = count as f64 * n_test as f64 / total as f64;
            allocated[class] = exact.floor() as usize;
            remainders.push((exact - exact.floor(), class));
        }

        remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut left = n_test - allocated.iter().sum::<usize>();
        for (_, class) in remainders {
            if left == 0 {
                break;
            }
            if allocated[class] < counts[class] {
                allocated[class] += 1;
                left -= 1;
            }
        }

        allocated
    }
}
