//! Locate the last build of the same pull request for incremental checkout.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::collaborators::BuildHistory;
use crate::domain::{BuildRecord, Job, ParameterValue, PreviousBuildLink};
use crate::params::PULL_ID;

/// Finds the prior build whose parameters name the same pull request.
#[derive(Clone)]
pub struct PreviousBuildResolver {
    history: Arc<dyn BuildHistory>,
}

impl PreviousBuildResolver {
    pub fn new(history: Arc<dyn BuildHistory>) -> Self {
        Self { history }
    }

    /// The snapshot to carry into the next build of `pull_id`, if any.
    ///
    /// A history that cannot be read yields `None`: the build then does a full
    /// checkout, which costs a changelog but never a build.
    pub async fn find_previous(&self, job: &Job, pull_id: u64) -> Option<PreviousBuildLink> {
        let builds = match self.history.builds(&job.full_name).await {
            Ok(builds) => builds,
            Err(err) => {
                warn!(job = %job.full_name, pull_id, error = %err, "build history unavailable; no previous build");
                return None;
            }
        };

        let marker = ParameterValue::new(PULL_ID, pull_id.to_string());
        let link = find_in(&builds, &marker);
        debug!(
            job = %job.full_name,
            pull_id,
            previous = ?link.as_ref().map(|l| l.build_number),
            "previous build resolved"
        );
        link
    }
}

/// First snapshot of the first build (in the given order) carrying `marker`.
///
/// `builds` must be newest first. The scan stops at the first build that has
/// both the marker and a snapshot; a match without snapshots is passed over.
/// Only the first snapshot of the winning build is used, even for
/// multi-repository checkouts.
pub fn find_in(builds: &[BuildRecord], marker: &ParameterValue) -> Option<PreviousBuildLink> {
    builds
        .iter()
        .filter(|build| {
            build
                .parameters
                .as_ref()
                .is_some_and(|params| params.contains(marker))
        })
        .find_map(|build| {
            build.scm_snapshots.first().map(|snapshot| PreviousBuildLink {
                build_number: build.number,
                snapshot: snapshot.clone(),
            })
        })
}
