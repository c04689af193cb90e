use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::CallRecordError;
use crate::models::PetOwner;

/// Read-only pet-owner lookup used for caller matching.
#[async_trait]
pub trait PetOwnerDirectory: Send + Sync {
    /// Active owners of the practice that have a phone number on file.
    async fn owners_for_practice(&self, practice_id: Uuid) -> Result<Vec<PetOwner>, CallRecordError>;
}

#[derive(Default)]
pub struct InMemoryPetOwnerDirectory {
    owners: RwLock<Vec<PetOwner>>,
}

impl InMemoryPetOwnerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, owner: PetOwner) {
        self.owners.write().await.push(owner);
    }
}

#[async_trait]
impl PetOwnerDirectory for InMemoryPetOwnerDirectory {
    async fn owners_for_practice(&self, practice_id: Uuid) -> Result<Vec<PetOwner>, CallRecordError> {
        Ok(self
            .owners
            .read()
            .await
            .iter()
            .filter(|o| o.practice_id == practice_id && o.phone.is_some())
            .cloned()
            .collect())
    }
}

pub struct SupabasePetOwnerDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePetOwnerDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl PetOwnerDirectory for SupabasePetOwnerDirectory {
    async fn owners_for_practice(&self, practice_id: Uuid) -> Result<Vec<PetOwner>, CallRecordError> {
        let owners: Vec<PetOwner> = self.supabase.request(
            Method::GET,
            "/rest/v1/pet_owners",
            &[
                ("practice_id", format!("eq.{}", practice_id)),
                ("is_active", "eq.true".to_string()),
                ("phone", "not.is.null".to_string()),
                ("select", "id,practice_id,first_name,last_name,phone".to_string()),
            ],
            None,
        ).await?;

        Ok(owners)
    }
}
