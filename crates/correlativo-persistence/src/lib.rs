//! Persistencia durable del cache local de correlativos.
//! Expone el módulo `schema` y el repositorio Diesel que implementa
//! `CorrelativeStore`. La implementación está en `correlative_persistence.rs`.

mod correlative_persistence;
pub mod schema;

pub use correlative_persistence::{new_from_env, DieselCorrelativeStore, MIGRATIONS};
