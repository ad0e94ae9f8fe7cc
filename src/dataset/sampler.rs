//! Batch samplers
//!
//! A [`BatchSampler`] only sees the label array and hands out row indices;
//! the training loop gathers the rows itself. This keeps the sampler
//! independent of how the dataset is stored.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// How the rows of an epoch are ordered into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrder {
    /// Every batch interleaves the present classes round-robin.
    Balanced,
    /// Uniform shuffle per epoch.
    Shuffled,
    /// Dataset order (validation and test).
    Sequential,
}

/// Produces one epoch of row-index batches at a time.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    len: usize,
    batch_size: usize,
    order: BatchOrder,
    rng: StdRng,
    // Per present class: all its rows and the rows not yet handed out.
    classes: Vec<(Vec<usize>, Vec<usize>)>,
}

impl BatchSampler {
    /// Create a sampler over `labels`.
    ///
    /// A `batch_size` of 0 is treated as 1.
    #[must_use]
    pub fn new(labels: &[u32], batch_size: usize, order: BatchOrder, seed: u64) -> Self {
        let mut classes: Vec<(u32, Vec<usize>)> = Vec::new();
        if order == BatchOrder::Balanced {
            for (row, &label) in labels.iter().enumerate() {
                match classes.iter_mut().find(|(c, _)| *c == label) {
                    Some((_, rows)) => rows.push(row),
                    None => classes.push((label, vec![row])),
                }
            }
            classes.sort_by_key(|(c, _)| *c);
        }
        Self {
            len: labels.len(),
            batch_size: batch_size.max(1),
            order,
            rng: StdRng::seed_from_u64(seed),
            classes: classes
                .into_iter()
                .map(|(_, rows)| (rows, Vec::new()))
                .collect(),
        }
    }

    /// Batches per epoch: `ceil(len / batch_size)`.
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.len.div_ceil(self.batch_size)
    }

    /// Number of classes present in the labels (balanced order only).
    #[must_use]
    pub fn num_present_classes(&self) -> usize {
        self.classes.len()
    }

    /// Row indices of the next epoch, batch by batch.
    pub fn epoch(&mut self) -> Vec<Vec<usize>> {
        match self.order {
            BatchOrder::Sequential => (0..self.len)
                .collect::<Vec<_>>()
                .chunks(self.batch_size)
                .map(<[usize]>::to_vec)
                .collect(),
            BatchOrder::Shuffled => {
                let mut rows: Vec<usize> = (0..self.len).collect();
                rows.shuffle(&mut self.rng);
                rows.chunks(self.batch_size).map(<[usize]>::to_vec).collect()
            }
            BatchOrder::Balanced => (0..self.num_batches())
                .map(|batch| {
                    let size = self.batch_size.min(self.len - batch * self.batch_size);
                    self.balanced_batch(batch * self.batch_size, size)
                })
                .collect(),
        }
    }

    // Round-robin over classes, starting where the previous batch stopped so
    // that partial batches do not always favor the low classes.
    fn balanced_batch(&mut self, start: usize, size: usize) -> Vec<usize> {
        let num_classes = self.classes.len();
        (0..size)
            .map(|i| {
                let (all, queue) = &mut self.classes[(start + i) % num_classes];
                if queue.is_empty() {
                    queue.clone_from(all);
                    queue.shuffle(&mut self.rng);
                }
                queue.pop().unwrap_or_default()
            })
            .collect()
    }
}
