//! Inverted-file index over sparse set vectors.
//!
//! Entities are clustered around set-valued centroids (majority vote of the
//! members' elements). A query scans only the members of the `nprobe`
//! clusters whose centroids are most similar to the query vector. Probing
//! every cluster degenerates to an exhaustive scan.

use super::similarity::jaccard;
use super::Similarity;
use crate::dataset::EntitySet;
use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Knobs of a single index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfParams {
    pub n_clusters: usize,
    pub nprobe: usize,
    pub iterations: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct IvfIndex {
    centroids: Vec<Vec<u32>>,
    members: Vec<Vec<u32>>,
    nprobe: usize,
}

impl IvfIndex {
    pub fn build(set: &EntitySet, similarity: Similarity, params: IvfParams) -> Self {
        let n = set.len();
        let non_empty: Vec<u32> = (0..n as u32)
            .filter(|&i| !similarity.vector(set, i).is_empty())
            .collect();
        let n_clusters = params.n_clusters.clamp(1, non_empty.len().max(1));

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut centroids: Vec<Vec<u32>> = if non_empty.is_empty() {
            vec![Vec::new()]
        } else {
            rand::seq::index::sample(&mut rng, non_empty.len(), n_clusters)
                .into_iter()
                .map(|pick| similarity.vector(set, non_empty[pick]).to_vec())
                .collect()
        };

        let iterations = params.iterations.max(1);
        let mut members = assign(set, similarity, &centroids);
        for _ in 1..iterations {
            update_centroids(set, similarity, &members, &mut centroids);
            members = assign(set, similarity, &centroids);
        }

        let nprobe = params.nprobe.clamp(1, centroids.len());
        Self {
            centroids,
            members,
            nprobe,
        }
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Members of the clusters closest to `vector`, best cluster first.
    pub fn probe<'a>(&'a self, vector: &[u32]) -> impl Iterator<Item = u32> + 'a {
        let mut ranked: Vec<(usize, f64)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(cluster, centroid)| (cluster, jaccard(vector, centroid)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(self.nprobe)
            .flat_map(move |(cluster, _)| self.members[cluster].iter().copied())
    }
}

fn nearest(vector: &[u32], centroids: &[Vec<u32>]) -> usize {
    let mut best = (0, f64::MIN);
    for (cluster, centroid) in centroids.iter().enumerate() {
        let score = jaccard(vector, centroid);
        if score > best.1 {
            best = (cluster, score);
        }
    }
    best.0
}

fn assign(set: &EntitySet, similarity: Similarity, centroids: &[Vec<u32>]) -> Vec<Vec<u32>> {
    let mut members = vec![Vec::new(); centroids.len()];
    for entity in 0..set.len() as u32 {
        members[nearest(similarity.vector(set, entity), centroids)].push(entity);
    }
    members
}

fn update_centroids(
    set: &EntitySet,
    similarity: Similarity,
    members: &[Vec<u32>],
    centroids: &mut [Vec<u32>],
) {
    for (cluster, entities) in members.iter().enumerate() {
        if entities.is_empty() {
            continue;
        }
        let mut votes: HashMap<u32, usize> = HashMap::new();
        for &entity in entities {
            for &element in similarity.vector(set, entity) {
                *votes.entry(element).or_default() += 1;
            }
        }
        let mut centroid: Vec<u32> = votes
            .into_iter()
            .filter(|&(_, count)| count * 2 >= entities.len())
            .map(|(element, _)| element)
            .collect();
        if centroid.is_empty() {
            continue;
        }
        centroid.sort_unstable();
        centroids[cluster] = centroid;
    }
}
