//! Set similarity over sorted index slices.

/// Size of the intersection of two ascending, deduplicated slices.
pub fn intersection_len(a: &[u32], b: &[u32]) -> usize {
    let (mut i, mut j, mut common) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                common += 1;
                i += 1;
                j += 1;
            }
        }
    }
    common
}

/// Jaccard similarity `|a ∩ b| / |a ∪ b|`; zero when either set is empty.
pub fn jaccard(a: &[u32], b: &[u32]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let common = intersection_len(a, b);
    if common == 0 {
        return 0.0;
    }
    common as f64 / (a.len() + b.len() - common) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_len() {
        assert_eq!(intersection_len(&[1, 3, 5, 7], &[3, 4, 5]), 2);
        assert_eq!(intersection_len(&[], &[1]), 0);
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&[0, 1, 2, 3], &[0, 1, 2, 3, 4]), 0.8);
        assert_eq!(jaccard(&[1, 2], &[1, 2]), 1.0);
        assert_eq!(jaccard(&[1], &[2]), 0.0);
        assert_eq!(jaccard(&[], &[]), 0.0);
    }
}
