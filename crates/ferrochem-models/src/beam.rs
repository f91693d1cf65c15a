/// Most likely token sequence under independent per-position probabilities.
///
/// `probs[i][j]` is the probability of token `j` at position `i`. A beam that emits `end` stops
/// and keeps its score. The returned sequence excludes `end`. A width of 1 is greedy decoding.
pub fn beam_search(probs: &[Vec<f32>], beam_width: usize, end: usize) -> Vec<usize> {
    let width = beam_width.max(1);
    let mut beams: Vec<(Vec<usize>, f64)> = vec![(Vec::new(), 0.0)];
    for position in probs {
        let mut candidates = Vec::with_capacity(beams.len() * position.len());
        for (tokens, score) in &beams {
            if tokens.last() == Some(&end) {
                candidates.push((tokens.clone(), *score));
                continue;
            }
            for (token, &p) in position.iter().enumerate() {
                let mut next = tokens.clone();
                next.push(token);
                candidates.push((next, score + (p as f64).max(f64::MIN_POSITIVE).ln()));
            }
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(width);
        beams = candidates;
    }
    let mut best = beams.into_iter().next().map(|(tokens, _)| tokens).unwrap_or_default();
    if let Some(stop) = best.iter().position(|&t| t == end) {
        best.truncate(stop);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const END: usize = 2;

    fn table() -> Vec<Vec<f32>> {
        vec![
            vec![0.55, 0.05, 0.40],
            vec![0.30, 0.30, 0.40],
            vec![0.00, 0.00, 1.00],
        ]
    }

    #[test]
    fn test_greedy() {
        assert_eq!(beam_search(&table(), 1, END), vec![0]);
    }

    #[test]
    fn test_wider_beam_prefers_early_end() {
        // ending at once (0.40) beats 0 then end (0.55 * 0.40)
        assert_eq!(beam_search(&table(), 2, END), Vec::<usize>::new());
    }

    #[test]
    fn test_runs_to_length_without_end() {
        let probs = vec![vec![0.1, 0.9, 0.0], vec![0.8, 0.2, 0.0]];
        assert_eq!(beam_search(&probs, 3, END), vec![1, 0]);
    }
}
