//! SeaORM entities.

pub mod oauth_object;
