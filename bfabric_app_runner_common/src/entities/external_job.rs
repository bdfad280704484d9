use crate::client::{query_from_json, value_as_i64};
use crate::prelude::*;

use super::Workunit;

entity_view!(
    /// A job record linking a workunit to the program which runs it.
    ExternalJob,
    "externaljob"
);

impl ExternalJob {
    /// The status, one of `new`, `done` or `failed`.
    pub fn status(&self) -> Option<&str> {
        self.entity.str_field("status")
    }

    /// The workunit this job refers to, if its client entity is a workunit.
    pub fn client_workunit(&self, lims: &Lims) -> Result<Option<Workunit>> {
        let classname = self.entity.str_field("cliententityclassname");
        let id = self.entity.get("cliententityid").and_then(value_as_i64);
        match (classname, id) {
            (Some(classname), Some(id)) if classname.eq_ignore_ascii_case("workunit") => {
                lims.find::<Workunit>(id)
            }
            _ => Ok(None),
        }
    }

    /// Set the status of this job.
    pub fn set_status(&self, client: &Client, status: &str) -> Result<()> {
        client.save(
            Self::ENDPOINT,
            query_from_json(serde_json::json!({"id": self.id(), "status": status})),
        )?;
        Ok(())
    }
}
