use rand::Rng;

/// Uniform random selection over a mount's backend pool.
///
/// Stateless by design: no weighting, no failure memory, no sticky state.
/// The generators are thread-local, seeded lazily per worker, so request
/// handlers never contend on a shared random source. Returns `None` on an
/// empty pool; table validation rejects those before a pool ever reaches
/// a request.
pub fn pick<T>(pool: &[T]) -> Option<&T> {
    match pool.len() {
        0 => None,
        1 => Some(&pool[0]),
        n => Some(&pool[rand::thread_rng().gen_range(0..n)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_pool() {
        let pool: Vec<&str> = Vec::new();
        assert!(pick(&pool).is_none());
    }

    #[test]
    fn test_single_backend() {
        let pool = vec!["a"];
        for _ in 0..100 {
            assert_eq!(*pick(&pool).unwrap(), "a");
        }
    }

    #[test]
    fn test_uniform_distribution() {
        let pool = vec!["b", "c", "d"];
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for _ in 0..3_000 {
            *counts.entry(pick(&pool).unwrap()).or_insert(0) += 1;
        }
        for backend in &pool {
            let n = *counts.get(backend).unwrap_or(&0);
            assert!((900..=1100).contains(&n), "backend {}: {}", backend, n);
        }
    }
}
