use crate::dto::HealthRes;

/// Simple health service shared by the server binaries and the REST router.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Reports the service as alive.
    ///
    /// The merge service has no external dependency it must reach to answer searches (the
    /// collaborator is optional), so liveness is unconditional.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "Dinkes merge service is alive".into(),
        }
    }
}
