//! Existence probe for Digital Twins instances.

use std::sync::Arc;

use tracing::debug;

use crate::api::DigitalTwinsApi;
use crate::error::{Error, Result, Scope};
use crate::id::DigitalTwinsId;
use crate::model::Description;
use crate::wait::Deadline;

/// Fetches current remote state, folding "not found" into `None`.
pub struct Prober<A> {
    api: Arc<A>,
}

impl<A: DigitalTwinsApi> Prober<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// `Ok(None)` means the instance is absent. Any other remote failure is
    /// [`Error::RemoteQuery`]: presence could not be determined.
    pub async fn probe(
        &self,
        scope: &Scope,
        id: &DigitalTwinsId,
        deadline: &Deadline,
    ) -> Result<Option<Description>> {
        match deadline.run(scope, self.api.get(id)).await? {
            Ok(description) => {
                debug!(%id, "Digital Twins instance found");
                Ok(Some(description))
            }
            Err(e) if e.is_not_found() => {
                debug!(%id, "Digital Twins instance not found");
                Ok(None)
            }
            Err(source) => Err(Error::RemoteQuery {
                scope: scope.clone(),
                source,
            }),
        }
    }
}
