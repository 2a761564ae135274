// Archivo: print.rs
// Propósito: frontera con la impresora de hojas RDP. El motor no depende de
// ella: la fachada de servicio la invoca después de emitir.
use correlativo_domain::Correlative;

/// Colaborador que imprime la hoja de un correlativo emitido.
///
/// `Ok(true)` significa que la impresora confirmó la salida física. Un
/// error o `Ok(false)` nunca deshace la emisión.
pub trait PrintBridge: Send + Sync {
    fn print(&self, correlative: &Correlative) -> Result<bool, String>;
}

/// Puesto sin impresora configurada.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPrintBridge;

impl PrintBridge for NoopPrintBridge {
    fn print(&self, _correlative: &Correlative) -> Result<bool, String> {
        Ok(false)
    }
}
