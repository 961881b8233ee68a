use crate::domain::ids::RequestId;
use crate::domain::ports::{CasOutcome, RequestStore};
use crate::domain::request::ServiceRequest;
use crate::error::{DispatchError, Result};

/// Upper bound on optimistic write attempts against one request.
pub const MAX_CAS_ATTEMPTS: usize = 16;

/// Reads the request, lets `change` validate and mutate a copy, then writes
/// it back with a single conditional update guarded on what was read.
///
/// When another writer got there first the fresh record is handed to
/// `change` again, so its checks always run against the state that is
/// actually replaced. An `Err` from `change` aborts without writing.
pub async fn update_request<T, F>(
    store: &dyn RequestStore,
    id: RequestId,
    mut change: F,
) -> Result<(ServiceRequest, T)>
where
    F: FnMut(&mut ServiceRequest) -> Result<T> + Send,
    T: Send,
{
    let mut current = store
        .get(id)
        .await?
        .ok_or_else(|| DispatchError::not_found("request", id))?;

    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let guard = current.guard();
        let mut next = current.clone();
        let output = change(&mut next)?;

        match store.compare_and_set(guard, next).await? {
            CasOutcome::Applied(stored) => return Ok((stored, output)),
            CasOutcome::Conflict(fresh) => {
                tracing::debug!(request_id = %id, attempt, "Concurrent write, re-evaluating");
                current = fresh;
            }
            CasOutcome::Missing => return Err(DispatchError::not_found("request", id)),
        }
    }

    Err(DispatchError::InternalError(
        format!("request {id} still contended after {MAX_CAS_ATTEMPTS} attempts").into(),
    ))
}
