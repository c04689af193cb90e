pub mod availability;
pub mod listing;
pub mod repository;
pub mod timezone;

pub use availability::AvailabilityService;
pub use listing::{AvailabilityListing, ListingIter};
pub use repository::{AvailabilityRepository, InMemoryAvailabilityRepository, SupabaseAvailabilityRepository};
pub use timezone::{PracticeTimezoneProvider, StaticTimezoneProvider, SupabasePracticeTimezones, TimezoneResolver};
