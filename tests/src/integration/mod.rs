pub mod e2e_sync;
pub mod flows;
