pub mod cache;
pub mod directory;
pub mod repository;

pub use cache::{CallRecordCache, MAX_UPSERT_ATTEMPTS};
pub use directory::{InMemoryPetOwnerDirectory, PetOwnerDirectory, SupabasePetOwnerDirectory};
pub use repository::{CallRecordRepository, InMemoryCallRecordRepository, SupabaseCallRecordRepository};
