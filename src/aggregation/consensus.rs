use std::collections::BTreeMap;

/// Positional plurality vote over variable-length sequences.
///
/// At each position the most frequent element among the still-eligible
/// sequences is appended, and only sequences carrying that element stay
/// eligible. Ties go to the smallest element. Stops when no eligible
/// sequence is long enough.
pub fn plurality_consensus<T, S>(sequences: &[S]) -> Vec<T>
where
    T: Ord + Clone,
    S: AsRef<[T]>,
{
    let mut eligible: Vec<&[T]> = sequences.iter().map(AsRef::as_ref).collect();
    let mut out = Vec::new();

    for i in 0.. {
        eligible.retain(|s| s.len() > i);
        let Some(choice) = plurality(eligible.iter().map(|s| &s[i])) else {
            break;
        };
        eligible.retain(|s| s[i] == choice);
        out.push(choice);
    }
    out
}

fn plurality<'a, T, I>(values: I) -> Option<T>
where
    T: Ord + Clone + 'a,
    I: Iterator<Item = &'a T>,
{
    let mut counts: BTreeMap<&T, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    // ascending iteration + strict `>` keeps the smallest value on ties
    let mut best: Option<(&T, usize)> = None;
    for (v, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((v, n));
        }
    }
    best.map(|(v, _)| v.clone())
}
