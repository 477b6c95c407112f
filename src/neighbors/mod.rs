//! # Neighbor Engine
//!
//! Top-K similarity search over one side of a [`Dataset`].
//!
//! - `Related` scores two entities by the Jaccard similarity of the
//!   counterparts that gave them positive feedback.
//! - `Similar` scores them by the Jaccard similarity of their label sets.
//!
//! Search is exact by default. An approximate [`ivf::IvfIndex`] can be fitted
//! per similarity; fitting retrains until a sampled recall target is met or
//! the epoch budget runs out. The engine computes only; persisting results is
//! the orchestrator's job.

pub mod ivf;
pub mod similarity;

use crate::config::NeighborType;
use crate::dataset::{Dataset, EntitySet};
use crate::error::{RecError, Result};
use crate::model::{EntityType, Scored};
use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};
use ivf::{IvfIndex, IvfParams};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use similarity::jaccard;
use tracing::{debug, info, instrument};

/// Centroid refinement rounds per index build.
const IVF_ITERATIONS: usize = 5;

/// Resolved similarity measure for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Similarity {
    Related,
    Similar,
}

impl Similarity {
    /// The sparse vector this similarity compares.
    pub fn vector<'a>(&self, set: &'a EntitySet, index: u32) -> &'a [u32] {
        match self {
            Similarity::Related => set.feedback(index),
            Similarity::Similar => set.labels(index),
        }
    }
}

/// Resolve the similarity for one entity.
///
/// Under `Auto`, an entity uses `Similar` only when it has labels and its
/// label-modification time is newer than `baseline`. A missing baseline means
/// no earlier run exists, so any recorded modification counts as newer.
pub fn resolve_similarity(
    neighbor_type: NeighborType,
    has_labels: bool,
    modified: Option<DateTime<Utc>>,
    baseline: Option<DateTime<Utc>>,
    similar_on_tie: bool,
) -> Similarity {
    match neighbor_type {
        NeighborType::Similar => Similarity::Similar,
        NeighborType::Related => Similarity::Related,
        NeighborType::Auto => {
            let fresh = match (modified, baseline) {
                (Some(modified), Some(baseline)) => {
                    modified > baseline || (similar_on_tie && modified == baseline)
                }
                (Some(_), None) => true,
                (None, _) => false,
            };
            if has_labels && fresh {
                Similarity::Similar
            } else {
                Similarity::Related
            }
        }
    }
}

/// Approximate-index settings for a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub recall_target: f64,
    pub fit_epochs: usize,
    pub sample_size: usize,
    pub seed: u64,
}

/// Top-K neighbor search over one entity set.
#[derive(Debug)]
pub struct NeighborEngine<'a> {
    set: &'a EntitySet,
    k: usize,
    indexes: HashMap<Similarity, IvfIndex>,
}

impl<'a> NeighborEngine<'a> {
    pub fn new(dataset: &'a Dataset, entity_type: EntityType, k: usize) -> Self {
        Self {
            set: dataset.entities(entity_type),
            k,
            indexes: HashMap::new(),
        }
    }

    pub fn entities(&self) -> &'a EntitySet {
        self.set
    }

    pub fn is_approximate(&self, similarity: Similarity) -> bool {
        self.indexes.contains_key(&similarity)
    }

    /// Neighbors of `target` in the `category` scope (`""` for global), using
    /// the fitted index for `similarity` when one exists.
    pub fn find(&self, target: u32, similarity: Similarity, category: &str) -> Vec<Scored> {
        match self.indexes.get(&similarity) {
            Some(index) => self.approximate(index, target, similarity, category),
            None => self.brute_force(target, similarity, category),
        }
    }

    /// Exact search: score every candidate in scope, excluding the target and hidden entities.
    pub fn brute_force(&self, target: u32, similarity: Similarity, category: &str) -> Vec<Scored> {
        let vector = similarity.vector(self.set, target);
        let mut scored = Vec::new();
        let mut consider = |candidate: u32| {
            if let Some(score) = self.score(vector, target, candidate, similarity, "") {
                scored.push((candidate, score));
            }
        };
        if category.is_empty() {
            (0..self.set.len() as u32).for_each(&mut consider);
        } else {
            self.set.category_members(category).iter().copied().for_each(&mut consider);
        }
        self.top_k(scored)
    }

    fn approximate(
        &self,
        index: &IvfIndex,
        target: u32,
        similarity: Similarity,
        category: &str,
    ) -> Vec<Scored> {
        let vector = similarity.vector(self.set, target);
        let scored = index
            .probe(vector)
            .filter_map(|candidate| {
                self.score(vector, target, candidate, similarity, category)
                    .map(|score| (candidate, score))
            })
            .collect();
        self.top_k(scored)
    }

    fn score(
        &self,
        vector: &[u32],
        target: u32,
        candidate: u32,
        similarity: Similarity,
        category: &str,
    ) -> Option<f64> {
        if candidate == target || self.set.is_hidden(candidate) {
            return None;
        }
        if !category.is_empty() && !self.set.categories(candidate).iter().any(|c| c == category) {
            return None;
        }
        let score = jaccard(vector, similarity.vector(self.set, candidate));
        (score > 0.0).then_some(score)
    }

    /// Keep the best `k`: descending score, ties by ascending id.
    fn top_k(&self, mut scored: Vec<(u32, f64)>) -> Vec<Scored> {
        let set = self.set;
        let order = |a: &(u32, f64), b: &(u32, f64)| {
            b.1.total_cmp(&a.1).then_with(|| set.id(a.0).cmp(set.id(b.0)))
        };
        if self.k == 0 {
            return Vec::new();
        }
        if scored.len() > self.k {
            scored.select_nth_unstable_by(self.k - 1, order);
            scored.truncate(self.k);
        }
        scored.sort_by(order);
        scored
            .into_iter()
            .map(|(index, score)| Scored::new(set.id(index), score))
            .collect()
    }

    /// Fit an approximate index for `similarity` and return the recall it
    /// achieved. Each retrain probes twice as many clusters; the best index
    /// seen is kept even when the target is never met. The first build is not
    /// a retrain, so up to `fit_epochs + 1` indexes are built.
    #[instrument(skip(self), fields(entities = self.set.len()))]
    pub fn fit(&mut self, similarity: Similarity, options: FitOptions) -> f64 {
        let n = self.set.len();
        if n == 0 {
            return 1.0;
        }
        let queries = self.sample_queries(options.sample_size, options.seed);
        let truth: Vec<Vec<Scored>> = queries
            .par_iter()
            .map(|(target, category)| self.brute_force(*target, similarity, category))
            .collect();

        let n_clusters = ((n as f64).sqrt().ceil() as usize).max(1);
        let mut nprobe = 1;
        let mut best: Option<(IvfIndex, f64)> = None;
        for epoch in 0..=options.fit_epochs {
            let index = IvfIndex::build(
                self.set,
                similarity,
                IvfParams {
                    n_clusters,
                    nprobe,
                    iterations: IVF_ITERATIONS,
                    seed: options.seed.wrapping_add(epoch as u64),
                },
            );
            let recall = self.measure_recall(&index, similarity, &queries, &truth);
            debug!(epoch, nprobe = index.nprobe(), clusters = index.n_clusters(), recall, "index fitted");
            let exhaustive = index.nprobe() >= index.n_clusters();
            let next_nprobe = (index.nprobe() * 2).min(index.n_clusters());
            if best.as_ref().map_or(true, |(_, r)| recall > *r) {
                best = Some((index, recall));
            }
            if recall >= options.recall_target || exhaustive {
                break;
            }
            nprobe = next_nprobe;
        }

        let Some((index, recall)) = best else {
            return 1.0;
        };
        info!(?similarity, recall, target = options.recall_target, "neighbor index ready");
        self.indexes.insert(similarity, index);
        recall
    }

    fn sample_queries(&self, sample_size: usize, seed: u64) -> Vec<(u32, String)> {
        let n = self.set.len();
        let targets: Vec<u32> = if sample_size >= n {
            (0..n as u32).collect()
        } else {
            let mut rng = StdRng::seed_from_u64(seed);
            rand::seq::index::sample(&mut rng, n, sample_size)
                .into_iter()
                .map(|i| i as u32)
                .collect()
        };
        targets
            .into_iter()
            .flat_map(|target| {
                std::iter::once((target, String::new())).chain(
                    self.set
                        .categories(target)
                        .iter()
                        .map(move |category| (target, category.clone())),
                )
            })
            .collect()
    }

    fn measure_recall(
        &self,
        index: &IvfIndex,
        similarity: Similarity,
        queries: &[(u32, String)],
        truth: &[Vec<Scored>],
    ) -> f64 {
        let (hits, total) = queries
            .par_iter()
            .zip(truth.par_iter())
            .filter(|(_, expected)| !expected.is_empty())
            .map(|((target, category), expected)| {
                let found: HashSet<String> = self
                    .approximate(index, *target, similarity, category)
                    .into_iter()
                    .map(|s| s.id)
                    .collect();
                let hit = expected.iter().filter(|s| found.contains(&s.id)).count();
                (hit as f64 / expected.len() as f64, 1usize)
            })
            .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
        if total == 0 {
            1.0
        } else {
            hits / total as f64
        }
    }
}

/// Neighbors of one target plus the recall of the path that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborOutput {
    pub neighbors: Vec<Scored>,
    pub recall: f64,
}

/// One-shot neighbor search for a single target in the global scope.
///
/// The exact path reports a recall of 1. The approximate path fits an index
/// first and reports the recall that fit achieved; a shortfall is not an error.
pub fn find_neighbors(
    dataset: &Dataset,
    entity_type: EntityType,
    target_id: &str,
    similarity: Similarity,
    k: usize,
    approximate: Option<FitOptions>,
) -> Result<NeighborOutput> {
    let mut engine = NeighborEngine::new(dataset, entity_type, k);
    let target = engine
        .entities()
        .index(target_id)
        .ok_or_else(|| RecError::not_found(entity_type.as_str(), target_id))?;
    let recall = match approximate {
        Some(options) => engine.fit(similarity, options),
        None => 1.0,
    };
    Ok(NeighborOutput {
        neighbors: engine.find(target, similarity, ""),
        recall,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetBuilder;
    use crate::model::{remove_scores, Feedback, Item, User};
    use chrono::Duration;

    /// Item i is liked by users 0..=i; item 10 is hidden and liked by everyone.
    fn scenario() -> Dataset {
        let labels = |ls: &[&str]| ls.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let items = vec![
            Item::new("0", labels(&["a", "b", "c", "d"])).with_categories(labels(&["*"])),
            Item::new("1", labels(&["b", "c", "d"])),
            Item::new("2", labels(&["b", "c"])).with_categories(labels(&["*"])),
            Item::new("3", labels(&["c"])).with_categories(labels(&["*"])),
            Item::new("4", vec![]).with_categories(labels(&["*"])),
            Item::new("5", vec![]),
            Item::new("6", vec![]).with_categories(labels(&["*"])),
            Item::new("7", vec![]),
            Item::new("8", labels(&["a", "b", "c", "d", "e"])).with_categories(labels(&["*"])),
            Item::new("9", vec![]),
            Item::new("10", labels(&["a", "b", "c", "d", "e"])).hidden(),
        ];
        let users: Vec<User> = (0..=10).map(|u| User::new(u.to_string(), vec![])).collect();
        let mut feedback = Vec::new();
        for i in 0..10 {
            for u in 0..=i {
                feedback.push(Feedback::new("like", u.to_string(), i.to_string(), Utc::now()));
            }
        }
        for u in 0..=10 {
            feedback.push(Feedback::new("like", u.to_string(), "10", Utc::now()));
        }
        DatasetBuilder::new(vec!["like".to_string()], vec![])
            .build(&users, &items, &feedback)
            .unwrap()
    }

    fn exhaustive_fit() -> FitOptions {
        FitOptions { recall_target: 1.0, fit_epochs: 10, sample_size: 1000, seed: 42 }
    }

    #[test]
    fn test_related_brute_force() {
        let dataset = scenario();
        let engine = NeighborEngine::new(&dataset, EntityType::Item, 3);
        let nine = dataset.items.index("9").unwrap();
        let found = engine.brute_force(nine, Similarity::Related, "");
        assert_eq!(remove_scores(&found), ["8", "7", "6"]);
        assert_eq!(found[0].score, 0.9);
    }

    #[test]
    fn test_similar_brute_force_with_category() {
        let dataset = scenario();
        let engine = NeighborEngine::new(&dataset, EntityType::Item, 3);
        let eight = dataset.items.index("8").unwrap();
        assert_eq!(remove_scores(&engine.brute_force(eight, Similarity::Similar, "")), ["0", "1", "2"]);
        assert_eq!(remove_scores(&engine.brute_force(eight, Similarity::Similar, "*")), ["0", "2", "3"]);
        assert_eq!(remove_scores(&engine.brute_force(eight, Similarity::Related, "*")), ["6", "4", "3"]);
    }

    #[test]
    fn test_hidden_target_gets_results_but_is_never_a_neighbor() {
        let dataset = scenario();
        let engine = NeighborEngine::new(&dataset, EntityType::Item, 20);
        let hidden = dataset.items.index("10").unwrap();
        let found = engine.brute_force(hidden, Similarity::Related, "");
        assert_eq!(found.first().map(|s| s.id.as_str()), Some("9"));
        for target in 0..dataset.items.len() as u32 {
            for similarity in [Similarity::Related, Similarity::Similar] {
                let ids = remove_scores(&engine.brute_force(target, similarity, ""));
                assert!(!ids.contains(&"10".to_string()));
                assert!(!ids.contains(&dataset.items.id(target).to_string()));
            }
        }
    }

    #[test]
    fn test_unlabeled_target_has_no_similar_neighbors() {
        let dataset = scenario();
        let engine = NeighborEngine::new(&dataset, EntityType::Item, 3);
        let nine = dataset.items.index("9").unwrap();
        assert!(engine.brute_force(nine, Similarity::Similar, "").is_empty());
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let items: Vec<Item> = ["b", "c", "a", "t"]
            .iter()
            .map(|id| Item::new(*id, vec!["x".to_string()]))
            .collect();
        let dataset = DatasetBuilder::new(vec![], vec![]).build(&[], &items, &[]).unwrap();
        let engine = NeighborEngine::new(&dataset, EntityType::Item, 2);
        let t = dataset.items.index("t").unwrap();
        assert_eq!(remove_scores(&engine.brute_force(t, Similarity::Similar, "")), ["a", "b"]);
    }

    #[test]
    fn test_approximate_converges_to_exact() {
        let dataset = scenario();
        for similarity in [Similarity::Related, Similarity::Similar] {
            let exact = NeighborEngine::new(&dataset, EntityType::Item, 3);
            let mut approx = NeighborEngine::new(&dataset, EntityType::Item, 3);
            let recall = approx.fit(similarity, exhaustive_fit());
            assert_eq!(recall, 1.0);
            assert!(approx.is_approximate(similarity));
            for target in 0..dataset.items.len() as u32 {
                let scopes = std::iter::once("")
                    .chain(dataset.items.categories(target).iter().map(String::as_str));
                for category in scopes {
                    assert_eq!(
                        approx.find(target, similarity, category),
                        exact.brute_force(target, similarity, category)
                    );
                }
            }
        }
    }

    #[test]
    fn test_zero_fit_epochs_still_builds_an_index() {
        let dataset = scenario();
        let mut engine = NeighborEngine::new(&dataset, EntityType::Item, 3);
        let options = FitOptions { fit_epochs: 0, ..exhaustive_fit() };
        let recall = engine.fit(Similarity::Related, options);
        assert!((0.0..=1.0).contains(&recall));
        assert!(engine.is_approximate(Similarity::Related));
        assert!(!engine.is_approximate(Similarity::Similar));
    }

    #[test]
    fn test_find_neighbors_contract() {
        let dataset = scenario();
        let exact = find_neighbors(&dataset, EntityType::Item, "9", Similarity::Related, 3, None).unwrap();
        assert_eq!(remove_scores(&exact.neighbors), ["8", "7", "6"]);
        assert_eq!(exact.recall, 1.0);

        let approx = find_neighbors(
            &dataset,
            EntityType::Item,
            "9",
            Similarity::Related,
            3,
            Some(exhaustive_fit()),
        )
        .unwrap();
        assert_eq!(approx.neighbors, exact.neighbors);

        let missing = find_neighbors(&dataset, EntityType::Item, "404", Similarity::Related, 3, None);
        assert!(missing.unwrap_err().is_not_found());
    }

    #[test]
    fn test_resolve_similarity() {
        let base = Utc::now();
        let later = base + Duration::seconds(5);
        let earlier = base - Duration::seconds(5);
        let auto = NeighborType::Auto;
        assert_eq!(resolve_similarity(auto, true, Some(later), Some(base), false), Similarity::Similar);
        assert_eq!(resolve_similarity(auto, true, Some(earlier), Some(base), false), Similarity::Related);
        assert_eq!(resolve_similarity(auto, false, Some(later), Some(base), false), Similarity::Related);
        assert_eq!(resolve_similarity(auto, true, None, Some(base), false), Similarity::Related);
        assert_eq!(resolve_similarity(auto, true, Some(base), Some(base), false), Similarity::Related);
        assert_eq!(resolve_similarity(auto, true, Some(base), Some(base), true), Similarity::Similar);
        assert_eq!(resolve_similarity(auto, true, Some(base), None, false), Similarity::Similar);
        assert_eq!(
            resolve_similarity(NeighborType::Similar, false, None, None, false),
            Similarity::Similar
        );
    }
}
