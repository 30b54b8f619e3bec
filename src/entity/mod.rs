//! SeaORM entity definitions for PostgreSQL database.

pub mod diagnosis;
pub mod image_asset;
