/// A bounded set of the highest-scored keys seen so far, kept sorted by
/// descending score.
pub struct Beam<K> {
    capacity: usize,
    entries: Vec<(K, f64)>,
}

impl<K> Beam<K> {
    pub fn new(capacity: usize) -> Beam<K> {
        Beam {
            capacity,
            entries: Vec::with_capacity(capacity + 1),
        }
    }

    pub fn add(&mut self, key: K, score: f64) {
        if self.entries.len() == self.capacity
            && self.entries.last().is_some_and(|(_, s)| *s >= score)
        {
            return;
        }
        let position = self.entries.partition_point(|(_, s)| *s >= score);
        self.entries.insert(position, (key, score));
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> &[(K, f64)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_top_entries_sorted() {
        let mut beam = Beam::new(3);
        for (key, score) in [("a", 1.0), ("b", 5.0), ("c", 3.0), ("d", 4.0), ("e", 0.5)] {
            beam.add(key, score);
        }
        let keys: Vec<&str> = beam.entries().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["b", "d", "c"]);
    }

    #[test]
    fn equal_scores_keep_arrival_order() {
        let mut beam = Beam::new(4);
        beam.add("first", 2.0);
        beam.add("second", 2.0);
        let keys: Vec<&str> = beam.entries().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["first", "second"]);
    }
}
