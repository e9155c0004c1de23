//! Greedy proximity clustering for dense marker sets.
//!
//! Each not-yet-claimed bus, in input order, anchors a new cluster and claims
//! every other unclaimed bus within `threshold` degrees (planar Euclidean
//! distance on latitude/longitude). The result depends on input order and is
//! not a globally optimal grouping. Cost is O(n²), which is fine at the
//! densities where clustering activates.

use super::filter::ActiveBus;

/// Default clustering radius in degrees.
pub const DEFAULT_CLUSTER_THRESHOLD_DEG: f64 = 0.01;

/// Default active-bus count above which clustering is used.
pub const DEFAULT_CLUSTER_ACTIVATION_COUNT: usize = 20;

/// Clustering parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Radius in degrees around an anchor.
    pub threshold_deg: f64,
    /// Clustering applies only when more buses than this are active.
    pub activation_count: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold_deg: DEFAULT_CLUSTER_THRESHOLD_DEG,
            activation_count: DEFAULT_CLUSTER_ACTIVATION_COUNT,
        }
    }
}

impl ClusterConfig {
    pub fn with_threshold(mut self, threshold_deg: f64) -> Self {
        self.threshold_deg = threshold_deg;
        self
    }

    pub fn with_activation_count(mut self, count: usize) -> Self {
        self.activation_count = count;
        self
    }

    /// Whether `active_count` buses should be clustered.
    pub fn should_cluster(&self, active_count: usize) -> bool {
        active_count > self.activation_count
    }
}

/// A group of nearby buses.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// The anchor, which is also the cluster's position.
    pub representative: ActiveBus,
    /// All members, anchor first.
    pub members: Vec<ActiveBus>,
}

impl Cluster {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn latitude(&self) -> f64 {
        self.representative.latitude()
    }

    pub fn longitude(&self) -> f64 {
        self.representative.longitude()
    }
}

/// Group `buses` greedily around first-seen anchors.
pub fn cluster_buses(buses: &[ActiveBus], threshold_deg: f64) -> Vec<Cluster> {
    let mut claimed = vec![false; buses.len()];
    let mut clusters = Vec::new();

    for (i, anchor) in buses.iter().enumerate() {
        if claimed[i] {
            continue;
        }
        claimed[i] = true;

        let mut members = vec![anchor.clone()];
        for (j, other) in buses.iter().enumerate() {
            if claimed[j] {
                continue;
            }
            if distance_deg(anchor, other) < threshold_deg {
                claimed[j] = true;
                members.push(other.clone());
            }
        }

        clusters.push(Cluster {
            representative: anchor.clone(),
            members,
        });
    }

    clusters
}

fn distance_deg(a: &ActiveBus, b: &ActiveBus) -> f64 {
    let dlat = a.latitude() - b.latitude();
    let dlng = a.longitude() - b.longitude();
    (dlat * dlat + dlng * dlng).sqrt()
}
