use crate::domain::ports::{Profile, ProfileDirectory};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Fixed set of profiles, looked up by user id.
#[derive(Debug, Clone, Default)]
pub struct StaticProfileDirectory {
    profiles: HashMap<String, Profile>,
}

impl StaticProfileDirectory {
    pub fn new(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl ProfileDirectory for StaticProfileDirectory {
    async fn profiles(&self, ids: &[String]) -> Result<HashMap<String, Profile>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.profiles.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }
}
