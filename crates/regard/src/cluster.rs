//! DBSCAN clustering of fixations into regions of interest.
//!
//! Plain density-based clustering over fixation centres with Euclidean
//! distance. Fixations in sparse areas stay unclustered (noise); every other
//! fixation belongs to exactly one cluster.

use regard_utils::num::TotalF64;

use crate::fixation::Fixation;

/// A spatially compact group of fixations.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RoiCluster {
    /// Rank by total duration; 0 is the most dwelled-on region.
    pub id: usize,
    pub center_x: f64,
    pub center_y: f64,
    pub total_duration_ms: f64,
    pub fixation_count: usize,
    /// Maximum member distance from the centre plus half the clustering
    /// radius, so the circle visually covers the member fixations.
    pub radius: f64,
}

#[derive(Clone, Copy, PartialEq)]
enum Label {
    Unvisited,
    Noise,
    Cluster(usize),
}

/// Runs DBSCAN over the fixation centres and returns the clusters ordered by
/// descending total fixation duration (ids reassigned to match the order).
pub fn cluster_fixations(fixations: &[Fixation], eps: f64, min_pts: usize) -> Vec<RoiCluster> {
    let mut labels = vec![Label::Unvisited; fixations.len()];
    let mut cluster_count = 0;

    for i in 0..fixations.len() {
        if labels[i] != Label::Unvisited {
            continue;
        }
        let neighbors = region_query(fixations, i, eps);
        if neighbors.len() < min_pts {
            labels[i] = Label::Noise;
            continue;
        }

        let cluster = cluster_count;
        cluster_count += 1;
        labels[i] = Label::Cluster(cluster);

        // expand the cluster; the seed list grows as new core points appear
        let mut seeds = neighbors;
        let mut cursor = 0;
        while cursor < seeds.len() {
            let j = seeds[cursor];
            cursor += 1;
            match labels[j] {
                Label::Noise => labels[j] = Label::Cluster(cluster),
                Label::Unvisited => {
                    labels[j] = Label::Cluster(cluster);
                    let extended = region_query(fixations, j, eps);
                    if extended.len() >= min_pts {
                        seeds.extend(extended);
                    }
                }
                Label::Cluster(_) => {}
            }
        }
    }

    let mut clusters: Vec<RoiCluster> = (0..cluster_count)
        .map(|c| {
            let members: Vec<&Fixation> = fixations
                .iter()
                .zip(&labels)
                .filter(|(_, label)| **label == Label::Cluster(c))
                .map(|(f, _)| f)
                .collect();
            summarize(c, &members, eps)
        })
        .collect();

    clusters.sort_by_key(|c| std::cmp::Reverse(TotalF64(c.total_duration_ms)));
    for (rank, cluster) in clusters.iter_mut().enumerate() {
        cluster.id = rank;
    }
    clusters
}

/// Indices of all fixations within `eps` of `center` (including itself).
fn region_query(fixations: &[Fixation], center: usize, eps: f64) -> Vec<usize> {
    let c = &fixations[center];
    fixations
        .iter()
        .enumerate()
        .filter(|(_, f)| ((f.x - c.x).powi(2) + (f.y - c.y).powi(2)).sqrt() <= eps)
        .map(|(i, _)| i)
        .collect()
}

fn summarize(id: usize, members: &[&Fixation], eps: f64) -> RoiCluster {
    let n = members.len() as f64;
    let center_x = members.iter().map(|f| f.x).sum::<f64>() / n;
    let center_y = members.iter().map(|f| f.y).sum::<f64>() / n;
    let max_dist = members
        .iter()
        .map(|f| ((f.x - center_x).powi(2) + (f.y - center_y).powi(2)).sqrt())
        .max_by_key(|d| TotalF64(*d))
        .unwrap_or(0.0);
    RoiCluster {
        id,
        center_x,
        center_y,
        total_duration_ms: members.iter().map(|f| f.duration_ms).sum(),
        fixation_count: members.len(),
        radius: max_dist + eps / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixation(x: f64, y: f64, duration_ms: f64) -> Fixation {
        Fixation {
            x,
            y,
            start_time_ms: 0.0,
            end_time_ms: duration_ms,
            duration_ms,
            point_count: 5,
            avg_confidence: 0.9,
        }
    }

    #[test]
    fn clusters_rank_by_total_duration() {
        let mut fixations = Vec::new();
        for _ in 0..5 {
            fixations.push(fixation(100.0, 100.0, 200.0)); // 1000ms total
        }
        for _ in 0..5 {
            fixations.push(fixation(400.0, 400.0, 300.0)); // 1500ms total
        }

        let clusters = cluster_fixations(&fixations, 35.0, 5);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].id, 0);
        assert_eq!(clusters[0].center_x, 400.0);
        assert_eq!(clusters[0].center_y, 400.0);
        assert_eq!(clusters[0].total_duration_ms, 1500.0);
        assert_eq!(clusters[1].center_x, 100.0);
        assert_eq!(clusters[1].fixation_count, 5);
    }

    #[test]
    fn sparse_fixations_stay_noise() {
        let fixations: Vec<Fixation> = (0..4)
            .map(|i| fixation(i as f64 * 500.0, 0.0, 100.0))
            .collect();
        let clusters = cluster_fixations(&fixations, 35.0, 5);
        assert!(clusters.is_empty());
    }

    #[test]
    fn every_fixation_is_in_at_most_one_cluster() {
        let mut fixations = Vec::new();
        for i in 0..8 {
            fixations.push(fixation(100.0 + i as f64 * 10.0, 100.0, 100.0));
        }
        for i in 0..6 {
            fixations.push(fixation(800.0 + i as f64 * 5.0, 500.0, 150.0));
        }
        fixations.push(fixation(1800.0, 900.0, 400.0)); // lone outlier

        let clusters = cluster_fixations(&fixations, 35.0, 5);
        let clustered: usize = clusters.iter().map(|c| c.fixation_count).sum();
        assert!(clustered <= fixations.len());
        assert_eq!(clusters.len(), 2);
        // the outlier is in neither cluster
        assert_eq!(clustered, fixations.len() - 1);
        // ids are the rank order
        for (rank, cluster) in clusters.iter().enumerate() {
            assert_eq!(cluster.id, rank);
            assert!(cluster.radius >= 35.0 / 2.0);
        }
        assert!(clusters[0].total_duration_ms >= clusters[1].total_duration_ms);
    }

    #[test]
    fn chained_points_merge_into_one_cluster() {
        // a chain where consecutive points are within eps links into one
        // cluster through density reachability
        let fixations: Vec<Fixation> = (0..10)
            .map(|i| fixation(100.0 + i as f64 * 20.0, 100.0, 100.0))
            .collect();
        let clusters = cluster_fixations(&fixations, 35.0, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].fixation_count, 10);
    }
}
