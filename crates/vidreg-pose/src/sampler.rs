use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::homography::{solve_minimal, HomographyType, Transfer};

/// Seeded source of random samples and hypotheses.
///
/// The same seed and the same calls produce the same samples.
#[derive(Clone, Debug)]
pub struct SampleGenerator {
    rng: StdRng,
}

impl SampleGenerator {
    /// Create a generator from a seed, or from the thread rng when `seed` is `None`.
    pub fn new(random_seed: Option<u64>) -> Self {
        let rng = match random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => {
                let mut tr = rand::rng();
                StdRng::from_rng(&mut tr)
            }
        };
        Self { rng }
    }

    /// Draw `k` distinct indices out of `0..n`.
    ///
    /// # Panics
    ///
    /// Panics if `k > n`.
    pub fn draw(&mut self, n: usize, k: usize) -> Vec<usize> {
        rand::seq::index::sample(&mut self.rng, n, k).into_vec()
    }

    /// A random permutation of `0..n`.
    pub fn permutation(&mut self, n: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut self.rng);
        indices
    }

    /// Solve up to `count` random minimal samples for hypotheses of the given type.
    ///
    /// Degenerate samples are skipped, so fewer than `count` hypotheses may be returned. When
    /// the correspondences form a single minimal sample exactly one hypothesis is solved.
    pub fn hypotheses(
        &mut self,
        kind: HomographyType,
        x1: &[[f64; 2]],
        x2: &[[f64; 2]],
        count: usize,
    ) -> Vec<Transfer> {
        let n = x1.len().min(x2.len());
        let k = kind.min_points();
        if n < k || count == 0 {
            return Vec::new();
        }
        let draws = if n == k { 1 } else { count };

        let mut s1 = vec![[0.0; 2]; k];
        let mut s2 = vec![[0.0; 2]; k];
        let mut hypotheses = Vec::with_capacity(draws);
        for _ in 0..draws {
            for (slot, idx) in self.draw(n, k).into_iter().enumerate() {
                s1[slot] = x1[idx];
                s2[slot] = x2[idx];
            }
            match solve_minimal(kind, &s1, &s2) {
                Ok(h) => hypotheses.push(Transfer::new(h)),
                Err(e) => log::trace!("Skipping sample: {e}"),
            }
        }

        log::debug!(
            "Generated {} of {} {:?} hypotheses",
            hypotheses.len(),
            draws,
            kind
        );
        hypotheses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_distinct() {
        let mut generator = SampleGenerator::new(Some(7));
        for _ in 0..100 {
            let mut sample = generator.draw(10, 4);
            assert_eq!(sample.len(), 4);
            assert!(sample.iter().all(|&i| i < 10));
            sample.sort_unstable();
            sample.dedup();
            assert_eq!(sample.len(), 4);
        }
    }

    #[test]
    fn test_seeded_determinism() {
        let mut a = SampleGenerator::new(Some(3));
        let mut b = SampleGenerator::new(Some(3));
        assert_eq!(a.permutation(50), b.permutation(50));
        assert_eq!(a.draw(50, 5), b.draw(50, 5));

        let mut perm = a.permutation(50);
        perm.sort_unstable();
        assert_eq!(perm, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_hypotheses() {
        let x1: Vec<[f64; 2]> = (0..20)
            .map(|i| [0.05 * i as f64, 0.3 * ((i * 7) % 11) as f64 / 11.0])
            .collect();
        let x2: Vec<[f64; 2]> = x1.iter().map(|p| [p[0] + 0.1, p[1] - 0.05]).collect();

        let mut generator = SampleGenerator::new(Some(0));
        let pool = generator.hypotheses(HomographyType::Translation, &x1, &x2, 30);
        assert_eq!(pool.len(), 30);
        for t in &pool {
            assert!((t.homography[0][2] - 0.1).abs() < 1e-12);
            assert!((t.homography[1][2] + 0.05).abs() < 1e-12);
        }

        assert!(generator
            .hypotheses(HomographyType::Projective, &x1[..3], &x2[..3], 30)
            .is_empty());
        assert_eq!(
            generator
                .hypotheses(HomographyType::Affine, &x1[..3], &x2[..3], 30)
                .len(),
            1
        );
    }

    #[test]
    fn test_hypotheses_skip_degenerate() {
        // every sample of coincident points is degenerate for a similarity
        let x1 = vec![[0.2, 0.2]; 8];
        let mut generator = SampleGenerator::new(Some(0));
        assert!(generator
            .hypotheses(HomographyType::Similarity, &x1, &x1, 10)
            .is_empty());
    }
}
