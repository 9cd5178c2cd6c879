//! Text similarity used to rank tools against a query.

/// Scores `query` against `target`, case-insensitively.
///
/// An empty query scores `0.0`, a query contained in the target scores
/// `1.0`, anything else gets the Ratcliff/Obershelp ratio in `[0, 1]`.
#[must_use]
pub fn similarity(query: &str, target: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let query = query.to_lowercase();
    let target = target.to_lowercase();
    if target.contains(&query) {
        return 1.0;
    }
    ratio(&query, &target)
}

/// Ratcliff/Obershelp similarity: `2 * matches / (len(a) + len(b))`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    (2 * matching_chars(&a, &b)) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, k) = longest_match(a, b);
    if k == 0 {
        return 0;
    }
    k + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + k..], &b[j + k..])
}

/// Longest common block as `(start_a, start_b, len)`; ties go to the
/// earliest block in `a`, then in `b`.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            let k = row[j + 1];
            if k > best.2 {
                best = (i + 1 - k, j + 1 - k, k);
            }
        }
        std::mem::swap(&mut prev, &mut row);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_query_scores_zero() {
        assert!(close(similarity("", "anything"), 0.0));
    }

    #[test]
    fn substring_scores_one() {
        assert!(close(similarity("WEATHER", "get current weather"), 1.0));
    }

    #[test]
    fn ratio_matches_known_values() {
        assert!(close(ratio("abcd", "bcde"), 0.75));
        assert!(close(ratio("abc", "xyz"), 0.0));
        assert!(close(ratio("", ""), 1.0));
        assert!(close(ratio("kitten", "sitting"), 8.0 / 13.0));
    }

    #[test]
    fn closer_strings_score_higher() {
        let near = similarity("wether", "weather lookup");
        let far = similarity("wether", "currency converter");
        assert!(near > far);
        assert!(near < 1.0);
    }
}
