//! Null-skipping folds shared by every rollup tier.
//!
//! Inputs are folded in the order given; callers sort first so results are
//! bit-identical across runs.

pub(crate) fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

pub(crate) fn sum<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values.into_iter().flatten().reduce(|acc, v| acc + v)
}

pub(crate) fn max<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values.into_iter().flatten().reduce(f64::max)
}

pub(crate) fn min<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values.into_iter().flatten().reduce(f64::min)
}
