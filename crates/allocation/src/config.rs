// Archivo: config.rs
// Propósito: configuración del puesto leída del entorno (`.env` incluido).
use crate::errors::{AllocationError, Result};
use crate::policy::FallbackPolicy;
use std::time::Duration;

pub const DEFAULT_REPLENISH_TARGET: usize = 20;
pub const DEFAULT_AUTHORITY_TIMEOUT_SECS: u64 = 5;

/// Parámetros del motor de asignación.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Tamaño del bloque pedido cuando el cache se vacía, y objetivo por
    /// defecto de `replenish`.
    pub replenish_target: usize,
    /// Reposición anticipada, apagada por defecto: con `Some(m)`, tras una
    /// emisión con `m` disponibles o menos el worker repone en segundo
    /// plano. Con `None` el central sólo se contacta con el cache vacío o a
    /// pedido del operador, y los disponibles bajan de a uno por emisión.
    pub low_water_mark: Option<usize>,
    pub policy: FallbackPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { replenish_target: DEFAULT_REPLENISH_TARGET,
               low_water_mark: None,
               policy: FallbackPolicy::default() }
    }
}

/// Configuración completa del puesto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub database_url: String,
    pub authority_url: String,
    pub authority_timeout: Duration,
    pub engine: EngineConfig,
}

impl AllocatorConfig {
    /// Lee la configuración de las variables de entorno, cargando antes
    /// `.env` si existe.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectada.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
        where F: Fn(&str) -> Option<String>
    {
        let database_url = lookup("CORRELATIVOS_DB_URL").or_else(|| lookup("DATABASE_URL"))
                                                        .unwrap_or_else(|| "correlativos.db".into());
        let authority_url = lookup("CENTRAL_API_URL").unwrap_or_else(|| "http://127.0.0.1:5000".into());
        let replenish_target = parse_var(&lookup, "CORRELATIVOS_REPLENISH_TARGET", DEFAULT_REPLENISH_TARGET)?;
        if replenish_target == 0 {
            return Err(AllocationError::Config("CORRELATIVOS_REPLENISH_TARGET debe ser mayor que 0".into()));
        }
        let low_water_mark = match lookup("CORRELATIVOS_LOW_WATER_MARK").filter(|raw| !raw.trim().is_empty()) {
            Some(_) => Some(parse_var(&lookup, "CORRELATIVOS_LOW_WATER_MARK", 0usize)?),
            None => None,
        };
        let timeout_secs = parse_var(&lookup, "CORRELATIVOS_AUTHORITY_TIMEOUT_SECS", DEFAULT_AUTHORITY_TIMEOUT_SECS)?;
        Ok(Self { database_url,
                  authority_url,
                  authority_timeout: Duration::from_secs(timeout_secs.clamp(1, 9)),
                  engine: EngineConfig { replenish_target, low_water_mark, policy: FallbackPolicy::default() } })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
    where F: Fn(&str) -> Option<String>,
          T: std::str::FromStr
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim()
                        .parse::<T>()
                        .map_err(|_| AllocationError::Config(format!("{}: valor inválido '{}'", key, raw))),
    }
}
