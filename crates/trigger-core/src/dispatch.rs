//! Turn an approved cause into a scheduled build.

use crate::collaborators::Scheduler;
use crate::domain::{BuildCause, BuildRequest, Job, SchedulingHandle, TriggerError, TriggerResult};
use crate::params::ParameterBuilder;
use crate::previous_build::PreviousBuildResolver;

/// Build parameters, attach the previous build, and submit.
///
/// Returns as soon as the scheduler accepts the request. No deduplication and
/// no retry: a rejected submission comes back as [`TriggerError::Dispatch`].
pub async fn dispatch(
    job: &Job,
    cause: &BuildCause,
    repo_url: &str,
    resolver: &PreviousBuildResolver,
    scheduler: &dyn Scheduler,
) -> TriggerResult<SchedulingHandle> {
    let built = ParameterBuilder::build(job, cause, repo_url);
    let previous_build = resolver.find_previous(job, cause.pull_id).await;

    let request = BuildRequest {
        job: job.full_name.clone(),
        cause: cause.clone(),
        parameters: built.parameters,
        revision: built.pin,
        previous_build,
        quiet_period_secs: job.quiet_period_secs,
    };

    scheduler
        .schedule(request)
        .await
        .map_err(|source| TriggerError::Dispatch {
            job: job.full_name.clone(),
            pull_id: cause.pull_id,
            source,
        })
}
