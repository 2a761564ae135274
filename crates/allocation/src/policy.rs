// Archivo: policy.rs
// Propósito: decidir entre modo normal y modo sin conexión. Función pura,
// separada del motor para poder ajustarla y probarla sola.
use authority_client::AuthorityError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Modo de operación del motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Se sirven correlativos reservados del central.
    Online,
    /// El operador digita el correlativo impreso en la hoja.
    Offline,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Online => f.write_str("ONLINE"),
            Mode::Offline => f.write_str("OFFLINE"),
        }
    }
}

/// Política de respaldo ante fallas del central.
///
/// Con los valores por defecto el puesto pasa a modo sin conexión en la
/// primera falla de red con el cache vacío, sin reintentos automáticos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Mientras queden al menos estos disponibles, una falla de red no
    /// cambia el modo: el cache sigue sirviendo.
    pub min_available_online: usize,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self { min_available_online: 1 }
    }
}

impl FallbackPolicy {
    /// Decide el modo a partir de los disponibles y del último error de
    /// reposición. Un rechazo del central no es falta de conexión: el
    /// central respondió, y el error se muestra al operador.
    pub fn decide(&self, cache_available: usize, last_fetch_error: Option<&AuthorityError>) -> Mode {
        match last_fetch_error {
            Some(AuthorityError::Unreachable(_)) if cache_available < self.min_available_online => Mode::Offline,
            _ => Mode::Online,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_network_failure_with_empty_cache_goes_offline() {
        let p = FallbackPolicy::default();
        assert_eq!(p.decide(0, Some(&AuthorityError::Unreachable("timeout".into()))), Mode::Offline);
    }

    #[test]
    fn cache_with_stock_stays_online() {
        let p = FallbackPolicy::default();
        assert_eq!(p.decide(3, Some(&AuthorityError::Unreachable("timeout".into()))), Mode::Online);
        assert_eq!(p.decide(0, None), Mode::Online);
    }

    #[test]
    fn rejection_is_not_offline() {
        let p = FallbackPolicy::default();
        assert_eq!(p.decide(0, Some(&AuthorityError::AuthorityRejected("agotado".into()))), Mode::Online);
    }

    #[test]
    fn threshold_is_tunable() {
        let p = FallbackPolicy { min_available_online: 5 };
        assert_eq!(p.decide(4, Some(&AuthorityError::Unreachable("refused".into()))), Mode::Offline);
        assert_eq!(p.decide(5, Some(&AuthorityError::Unreachable("refused".into()))), Mode::Online);
    }
}
