use rand::Rng;
use rv::misc::ln_pflip;

/// Prevent the inner value from being verbosely / pretty printed during a debug.
pub(crate) struct NoPrettyPrint<T: std::fmt::Debug>(pub T);

impl<T: std::fmt::Debug> NoPrettyPrint<T> {
    pub const fn new(t: T) -> Self {
        Self(t)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for NoPrettyPrint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Prevent "{:#?}" from being used.
        write!(f, "{:?}", self.0)
    }
}

/// Draw an index with probability proportional to `exp(ln_weights[i])`.
pub fn draw_category<R: Rng>(ln_weights: &[f64], rng: &mut R) -> usize {
    ln_pflip(ln_weights, false, rng)
}

/// `ln(exp(a) + exp(b))` without overflow, exact when either side is `-inf`.
#[must_use]
pub fn ln_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    special::Gamma::ln_gamma(x).0
}

/// `ln S2(m, k)` for `m = 0..=n` and `k = 0..=n`, Stirling numbers of the
/// second kind; entries with `k > m` are `-inf`.
#[must_use]
pub fn ln_stirling2_table(n: usize) -> Vec<Vec<f64>> {
    let mut table = Vec::with_capacity(n + 1);
    let mut row = vec![f64::NEG_INFINITY; n + 1];
    row[0] = 0.0;
    table.push(row.clone());
    for m in 1..=n {
        // S(m, k) = k S(m - 1, k) + S(m - 1, k - 1), updated in place from the top
        for k in (1..=m).rev() {
            #[allow(clippy::cast_precision_loss)]
            let stay = (k as f64).ln() + row[k];
            row[k] = ln_add_exp(stay, row[k - 1]);
        }
        row[0] = f64::NEG_INFINITY;
        table.push(row.clone());
    }
    table
}

/// `ln S2(n, k)` for `k = 0..=n`.
#[must_use]
pub fn ln_stirling2_row(n: usize) -> Vec<f64> {
    ln_stirling2_table(n).swap_remove(n)
}

/// `ln Bell(n)`, the log number of set partitions of `n` items.
#[must_use]
pub fn ln_bell(n: usize) -> f64 {
    ln_stirling2_row(n)
        .into_iter()
        .fold(f64::NEG_INFINITY, ln_add_exp)
}

/// Online Mean and Variance
#[derive(Default, Clone, Copy, Debug)]
pub struct MeanAndVariance {
    count: usize,
    mean: f64,
    m2: f64,
}

impl MeanAndVariance {
    #[must_use]
    pub fn update(self, new_value: f64) -> Self {
        let count = self.count + 1;
        let delta = new_value - self.mean;
        #[allow(clippy::cast_precision_loss)]
        let mean = self.mean + delta / (count as f64);
        let delta2 = new_value - mean;
        let m2 = delta.mul_add(delta2, self.m2);

        Self { count, mean, m2 }
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn mean(&self) -> f64 {
        self.mean
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn sample_variance(&self) -> f64 {
        if self.count < 2 {
            return f64::NAN;
        }
        self.m2 / ((self.count - 1) as f64)
    }
}

impl FromIterator<f64> for MeanAndVariance {
    fn from_iter<T: IntoIterator<Item = f64>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::default(), |acc, x| acc.update(x))
    }
}
