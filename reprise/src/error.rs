use crate::types::ApiResult;

/// Failure of a driver entry point, carrying the status code the driver
/// returned. Success codes other than `OK` travel on the `Ok` side of
/// [`DriverResult`]; only failures end up here.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("driver call failed: {0}")]
pub struct DriverError(pub ApiResult);

pub type DriverResult<T> = Result<T, DriverError>;

/// Failure to commit host memory for an externally-provided heap allocation.
#[derive(thiserror::Error, Debug)]
#[error("failed to commit {size} bytes of host memory")]
pub struct AllocationError {
    pub size: usize,
}

/// Collapses a driver result to the status code an override reports back to
/// the decoder.
pub fn result_code<T>(result: &DriverResult<T>) -> ApiResult {
    match result {
        Ok(_) => ApiResult::OK,
        Err(e) => e.0,
    }
}
