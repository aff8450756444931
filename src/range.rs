// Buffer range arithmetic
//
// A "simple range" is a half-open span [start, end) with start < end.
// A "complex range" is a sorted list of disjoint simple ranges. The loader uses
// these to track which parts of the log are already buffered and to compute
// what still has to be requested.

use serde::{Deserialize, Serialize};

/// Half-open time span `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleRange {
    pub start: f64,
    pub end: f64,
}

impl SimpleRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// A range is valid only if `start < end` (NaN bounds are never valid)
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn contains(&self, timestamp: f64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    pub fn duration(&self) -> f64 {
        if self.is_valid() {
            self.end - self.start
        } else {
            0.0
        }
    }
}

/// Sorted, non-overlapping list of simple ranges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplexRange(Vec<SimpleRange>);

impl ComplexRange {
    /// Build from `(start, end)` pairs, keeping only valid entries.
    ///
    /// The pairs are folded through [`add`] so the result always satisfies the
    /// ordering invariant, whatever order the input was in.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        pairs.into_iter().fold(empty(), |acc, (start, end)| {
            add(SimpleRange::new(start, end), &acc)
        })
    }

    pub fn ranges(&self) -> &[SimpleRange] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&SimpleRange> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&SimpleRange> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SimpleRange> {
        self.0.iter()
    }

    pub fn contains(&self, timestamp: f64) -> bool {
        self.0.iter().any(|r| r.contains(timestamp))
    }

    /// Total covered duration
    pub fn duration(&self) -> f64 {
        self.0.iter().map(SimpleRange::duration).sum()
    }

    pub fn to_pairs(&self) -> Vec<(f64, f64)> {
        self.0.iter().map(|r| (r.start, r.end)).collect()
    }
}

impl<'a> IntoIterator for &'a ComplexRange {
    type Item = &'a SimpleRange;
    type IntoIter = std::slice::Iter<'a, SimpleRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Create an empty range
pub fn empty() -> ComplexRange {
    ComplexRange(Vec::new())
}

/// Join a simple range into a complex range.
///
/// Entries that overlap or merely touch `simple` are merged with it. An invalid
/// `simple` covers nothing, so `complex` comes back unchanged.
pub fn add(simple: SimpleRange, complex: &ComplexRange) -> ComplexRange {
    if !simple.is_valid() {
        return complex.clone();
    }

    let mut result = Vec::with_capacity(complex.len() + 1);
    let mut pending = simple;

    for &existing in complex.iter() {
        if existing.start > pending.end {
            // [  ]
            //     [   ]
            result.push(pending);
            pending = existing;
        } else if pending.start > existing.end {
            //      [  ]
            // [   ]
            result.push(existing);
        } else {
            // touching or overlapping
            pending = SimpleRange::new(
                pending.start.min(existing.start),
                pending.end.max(existing.end),
            );
        }
    }
    result.push(pending);

    ComplexRange(result)
}

/// Portions of `complex` that fall inside `simple`, clipped to its bounds
pub fn intersect(simple: SimpleRange, complex: &ComplexRange) -> ComplexRange {
    if !simple.is_valid() {
        return empty();
    }

    let result = complex
        .iter()
        .filter(|existing| existing.start < simple.end && simple.start < existing.end)
        .map(|existing| {
            SimpleRange::new(
                simple.start.max(existing.start),
                simple.end.min(existing.end),
            )
        })
        .collect();

    ComplexRange(result)
}

/// Portions of `simple` not covered by `complex`
pub fn subtract(simple: SimpleRange, complex: &ComplexRange) -> ComplexRange {
    if !simple.is_valid() {
        return empty();
    }

    let mut result = Vec::new();
    let mut remaining = Some(simple);

    for &existing in complex.iter() {
        let Some(current) = remaining else {
            break;
        };

        if current.start >= existing.end {
            //    [   ]
            // [ ]
            continue;
        }
        if existing.start >= current.end {
            // [   ]
            //      [ ]
            break;
        }
        if existing.start > current.start {
            result.push(SimpleRange::new(current.start, existing.start));
        }
        remaining = if existing.end < current.end {
            Some(SimpleRange::new(existing.end, current.end))
        } else {
            None
        };
    }

    if let Some(rest) = remaining {
        result.push(rest);
    }

    ComplexRange(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: f64, end: f64) -> SimpleRange {
        SimpleRange::new(start, end)
    }

    fn c(pairs: &[(f64, f64)]) -> ComplexRange {
        ComplexRange(pairs.iter().map(|&(s, e)| r(s, e)).collect())
    }

    fn assert_well_formed(range: &ComplexRange) {
        for entry in range.iter() {
            assert!(entry.is_valid(), "invalid entry {:?} in {:?}", entry, range);
        }
        for pair in range.ranges().windows(2) {
            assert!(
                pair[0].end <= pair[1].start,
                "entries out of order or overlapping in {:?}",
                range
            );
        }
    }

    #[test]
    fn test_add_merges_touching_boundaries() {
        let held = c(&[(0.0, 10.0), (20.0, 30.0)]);
        assert_eq!(add(r(10.0, 20.0), &held), c(&[(0.0, 30.0)]));
    }

    #[test]
    fn test_add_inserts_disjoint_in_order() {
        let held = c(&[(0.0, 10.0), (40.0, 50.0)]);
        assert_eq!(
            add(r(20.0, 30.0), &held),
            c(&[(0.0, 10.0), (20.0, 30.0), (40.0, 50.0)])
        );
        assert_eq!(add(r(60.0, 70.0), &held).last(), Some(&r(60.0, 70.0)));
        assert_eq!(add(r(-10.0, -5.0), &held).first(), Some(&r(-10.0, -5.0)));
    }

    #[test]
    fn test_add_swallows_several_entries() {
        let held = c(&[(0.0, 5.0), (10.0, 15.0), (20.0, 25.0), (40.0, 45.0)]);
        assert_eq!(
            add(r(3.0, 22.0), &held),
            c(&[(0.0, 25.0), (40.0, 45.0)])
        );
    }

    #[test]
    fn test_add_invalid_range_is_noop() {
        let held = c(&[(0.0, 10.0)]);
        assert_eq!(add(r(5.0, 5.0), &held), held);
        assert_eq!(add(r(8.0, 2.0), &held), held);
        assert_eq!(add(r(f64::NAN, 2.0), &held), held);
    }

    #[test]
    fn test_add_is_idempotent() {
        let cases = [
            (r(10.0, 20.0), c(&[(0.0, 10.0), (20.0, 30.0)])),
            (r(5.0, 7.0), c(&[(0.0, 10.0)])),
            (r(50.0, 60.0), c(&[(0.0, 10.0), (20.0, 30.0)])),
            (r(-5.0, 100.0), c(&[(0.0, 10.0), (20.0, 30.0)])),
            (r(1.0, 2.0), empty()),
        ];
        for (range, held) in cases {
            let once = add(range, &held);
            assert_eq!(add(range, &once), once);
            assert_well_formed(&once);
        }
    }

    #[test]
    fn test_intersect_clips_to_bounds() {
        let held = c(&[(0.0, 10.0), (20.0, 30.0)]);
        assert_eq!(
            intersect(r(5.0, 25.0), &held),
            c(&[(5.0, 10.0), (20.0, 25.0)])
        );
        assert!(intersect(r(10.0, 20.0), &held).is_empty());
        assert!(intersect(r(3.0, 1.0), &held).is_empty());
    }

    #[test]
    fn test_subtract_returns_missing_parts() {
        let held = c(&[(0.0, 10.0), (20.0, 30.0)]);
        assert_eq!(subtract(r(5.0, 25.0), &held), c(&[(10.0, 20.0)]));
        assert_eq!(
            subtract(r(-5.0, 35.0), &held),
            c(&[(-5.0, 0.0), (10.0, 20.0), (30.0, 35.0)])
        );
        assert!(subtract(r(2.0, 8.0), &held).is_empty());
        assert_eq!(subtract(r(40.0, 50.0), &held), c(&[(40.0, 50.0)]));
        assert!(subtract(r(4.0, 4.0), &held).is_empty());
    }

    #[test]
    fn test_intersect_and_subtract_partition_range() {
        let helds = [
            empty(),
            c(&[(0.0, 10.0), (20.0, 30.0)]),
            c(&[(-100.0, 100.0)]),
            c(&[(1.0, 2.0), (3.0, 4.0), (5.0, 6.0), (7.0, 8.0)]),
            c(&[(12.0, 18.0)]),
        ];
        let probes = [
            r(5.0, 25.0),
            r(0.0, 10.0),
            r(-50.0, 50.0),
            r(2.5, 7.5),
            r(10.0, 20.0),
            r(29.0, 31.0),
        ];

        for held in &helds {
            for &probe in &probes {
                let inside = intersect(probe, held);
                let outside = subtract(probe, held);
                assert_well_formed(&inside);
                assert_well_formed(&outside);

                // Together they cover the probe exactly, without overlap
                let total = inside.duration() + outside.duration();
                assert!((total - probe.duration()).abs() < 1e-9);

                let mut union = inside.clone();
                for piece in outside.iter() {
                    assert!(intersect(*piece, &inside).is_empty());
                    union = add(*piece, &union);
                }
                assert_eq!(union, c(&[(probe.start, probe.end)]));
            }
        }
    }

    #[test]
    fn test_from_pairs_normalizes_input() {
        let range = ComplexRange::from_pairs([(20.0, 30.0), (0.0, 10.0), (5.0, 12.0), (9.0, 9.0)]);
        assert_eq!(range, c(&[(0.0, 12.0), (20.0, 30.0)]));
        assert!(range.contains(11.0));
        assert!(!range.contains(12.0));
    }
}
