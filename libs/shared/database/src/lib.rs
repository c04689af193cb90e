pub mod supabase;

pub use supabase::{postgrest_timestamp, SupabaseClient};
