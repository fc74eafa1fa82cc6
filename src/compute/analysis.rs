//! The analysis function contract.
//!
//! An [`Analysis`] is a pure, CPU-bound computation run once per slice. It
//! consumes a lazily-produced [`RowSequence`] and returns one or more named
//! result series, each holding one value per row consumed.

use std::fmt;
use std::marker::PhantomData;

/// Name given to the series built by [`ResultSeries::single`].
pub const DEFAULT_SERIES: &str = "value";

/// A per-slice analysis function.
///
/// Implementations must be side-effect free: the executor runs the same
/// analysis concurrently on several threads, each over a disjoint slice.
pub trait Analysis: Send + Sync + 'static {
    /// One input row.
    type Row: Send + Sync + 'static;
    /// Caller-supplied extra parameters, shared read-only by every worker.
    type Params: Send + Sync + 'static;
    /// One output value.
    type Output: Send + 'static;
    /// Failure raised by the analysis; propagated to the caller unchanged.
    type Error: std::error::Error + Send + 'static;

    /// Runs the analysis over one slice of rows.
    fn analyze(
        &self,
        rows: RowSequence<'_, Self::Row>,
        params: &Self::Params,
    ) -> Result<ResultSeries<Self::Output>, Self::Error>;
}

/// Adapter turning a closure into an [`Analysis`]. Built by [`analysis_fn`].
pub struct FnAnalysis<F, R, P, O, E> {
    f: F,
    _marker: PhantomData<fn(&R, &P) -> Result<O, E>>,
}

/// Wraps a closure as an [`Analysis`].
///
/// ```ignore
/// let identity = analysis_fn(|rows: RowSequence<'_, u32>, _: &()| {
///     Ok::<_, std::io::Error>(ResultSeries::single(rows.copied().collect()))
/// });
/// ```
pub fn analysis_fn<F, R, P, O, E>(f: F) -> FnAnalysis<F, R, P, O, E>
where
    F: Fn(RowSequence<'_, R>, &P) -> Result<ResultSeries<O>, E> + Send + Sync + 'static,
{
    FnAnalysis {
        f,
        _marker: PhantomData,
    }
}

impl<F, R, P, O, E> Analysis for FnAnalysis<F, R, P, O, E>
where
    F: Fn(RowSequence<'_, R>, &P) -> Result<ResultSeries<O>, E> + Send + Sync + 'static,
    R: Send + Sync + 'static,
    P: Send + Sync + 'static,
    O: Send + 'static,
    E: std::error::Error + Send + 'static,
{
    type Row = R;
    type Params = P;
    type Output = O;
    type Error = E;

    fn analyze(&self, rows: RowSequence<'_, R>, params: &P) -> Result<ResultSeries<O>, E> {
        (self.f)(rows, params)
    }
}

/// Single-pass iterator over the rows of one slice.
///
/// Every `step` rows it hands the running count to its reporter. A reporter
/// returning `false` means nobody is listening any more; the sequence then
/// ends early so an abandoned worker stops burning CPU.
pub struct RowSequence<'a, R> {
    rows: &'a [R],
    position: usize,
    step: usize,
    reporter: Option<&'a dyn Fn(usize) -> bool>,
    abandoned: bool,
}

impl<'a, R> RowSequence<'a, R> {
    pub(crate) fn reporting(rows: &'a [R], step: usize, reporter: &'a dyn Fn(usize) -> bool) -> Self {
        Self {
            rows,
            position: 0,
            step: step.max(1),
            reporter: Some(reporter),
            abandoned: false,
        }
    }

    /// A sequence with no progress reporting, for running an analysis inline.
    pub fn detached(rows: &'a [R]) -> Self {
        Self {
            rows,
            position: 0,
            step: 1,
            reporter: None,
            abandoned: false,
        }
    }

    /// Rows yielded so far.
    pub fn consumed(&self) -> usize {
        self.position
    }

    /// Total rows in the underlying slice.
    pub fn slice_len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the sequence was cut short because its listener went away.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }
}

impl<'a, R> Iterator for RowSequence<'a, R> {
    type Item = &'a R;

    fn next(&mut self) -> Option<Self::Item> {
        if self.abandoned {
            return None;
        }
        let row = self.rows.get(self.position)?;
        self.position += 1;

        if self.position % self.step == 0 {
            if let Some(report) = self.reporter {
                if !report(self.position) {
                    self.abandoned = true;
                }
            }
        }

        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.abandoned {
            return (0, Some(0));
        }
        let remaining = self.rows.len() - self.position;
        let lower = if self.reporter.is_some() { 0 } else { remaining };
        (lower, Some(remaining))
    }
}

impl<R> fmt::Debug for RowSequence<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSequence")
            .field("len", &self.rows.len())
            .field("position", &self.position)
            .field("step", &self.step)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}

/// One or more named, ordered output series.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSeries<O> {
    series: Vec<(String, Vec<O>)>,
}

impl<O> Default for ResultSeries<O> {
    fn default() -> Self {
        Self { series: Vec::new() }
    }
}

impl<O> ResultSeries<O> {
    /// An empty result with no series.
    pub fn new() -> Self {
        Self::default()
    }

    /// A result with a single series named [`DEFAULT_SERIES`].
    pub fn single(values: Vec<O>) -> Self {
        Self::new().with_series(DEFAULT_SERIES, values)
    }

    /// Appends a named series.
    pub fn with_series(mut self, name: impl Into<String>, values: Vec<O>) -> Self {
        self.series.push((name.into(), values));
        self
    }

    /// Looks up a series by name.
    pub fn get(&self, name: &str) -> Option<&[O]> {
        self.series
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Series names in order.
    pub fn names(&self) -> Vec<&str> {
        self.series.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of series.
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Iterates `(name, values)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[O])> {
        self.series.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Consumes the result, returning its first series.
    pub fn into_single(self) -> Option<Vec<O>> {
        self.series.into_iter().next().map(|(_, values)| values)
    }

    /// Consumes the result, returning every `(name, values)` pair.
    pub fn into_inner(self) -> Vec<(String, Vec<O>)> {
        self.series
    }

    /// Name and length of the first series whose length is not `expected`.
    pub(crate) fn length_mismatch(&self, expected: usize) -> Option<(&str, usize)> {
        self.series
            .iter()
            .find(|(_, values)| values.len() != expected)
            .map(|(name, values)| (name.as_str(), values.len()))
    }

    /// Whether `other` has the same series names in the same order.
    pub(crate) fn same_layout(&self, other: &Self) -> bool {
        self.series.len() == other.series.len()
            && self
                .series
                .iter()
                .zip(&other.series)
                .all(|((a, _), (b, _))| a == b)
    }

    /// Appends every series of `other` onto the matching series of `self`.
    /// Callers check [`Self::same_layout`] first.
    pub(crate) fn append(&mut self, other: Self) {
        for ((_, into), (_, values)) in self.series.iter_mut().zip(other.series) {
            into.extend(values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_detached_sequence_yields_all_rows() {
        let rows = [1, 2, 3, 4];
        let seq = RowSequence::detached(&rows);
        assert_eq!(seq.size_hint(), (4, Some(4)));
        assert_eq!(seq.copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_reporting_sequence_reports_every_step() {
        let rows: Vec<u32> = (0..10).collect();
        let reports = RefCell::new(Vec::new());
        let reporter = |n: usize| {
            reports.borrow_mut().push(n);
            true
        };

        let seq = RowSequence::reporting(&rows, 3, &reporter);
        assert_eq!(seq.count(), 10);
        assert_eq!(*reports.borrow(), vec![3, 6, 9]);
    }

    #[test]
    fn test_reporting_sequence_stops_when_abandoned() {
        let rows: Vec<u32> = (0..100).collect();
        let reporter = |n: usize| n < 20;

        let mut seq = RowSequence::reporting(&rows, 10, &reporter);
        let taken: Vec<u32> = seq.by_ref().copied().collect();

        // The row that triggered the refused report is still yielded.
        assert_eq!(taken.len(), 20);
        assert!(seq.is_abandoned());
        assert_eq!(seq.consumed(), 20);
    }

    #[test]
    fn test_fn_analysis_adapter() {
        let doubled = analysis_fn(|rows: RowSequence<'_, i64>, factor: &i64| {
            Ok::<_, std::fmt::Error>(ResultSeries::single(rows.map(|r| r * factor).collect()))
        });

        let rows = [1, 2, 3];
        let result = doubled
            .analyze(RowSequence::detached(&rows), &2)
            .expect("analysis should succeed");
        assert_eq!(result.into_single(), Some(vec![2, 4, 6]));
    }

    #[test]
    fn test_result_series_layout_and_append() {
        let mut first = ResultSeries::new()
            .with_series("p", vec![0.1, 0.2])
            .with_series("amplitude", vec![1.0, 2.0]);
        let second = ResultSeries::new()
            .with_series("p", vec![0.3])
            .with_series("amplitude", vec![3.0]);
        let swapped = ResultSeries::new()
            .with_series("amplitude", vec![3.0])
            .with_series("p", vec![0.3]);

        assert!(first.same_layout(&second));
        assert!(!first.same_layout(&swapped));

        first.append(second);
        assert_eq!(first.get("p"), Some(&[0.1, 0.2, 0.3][..]));
        assert_eq!(first.get("amplitude"), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(first.names(), vec!["p", "amplitude"]);
    }

    #[test]
    fn test_result_series_length_mismatch() {
        let result = ResultSeries::new()
            .with_series("a", vec![1, 2])
            .with_series("b", vec![1]);
        assert_eq!(result.length_mismatch(2), Some(("b", 1)));
        assert_eq!(ResultSeries::single(vec![1, 2]).length_mismatch(2), None);
    }
}
