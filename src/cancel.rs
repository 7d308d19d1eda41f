//! Operator cancellation (SIGINT/SIGTERM).
//!
//! Обработчик ставит флаг и шлёт cancel генератору, чтобы движок освободил
//! ресурсы до выхода процесса. Ошибка cancel только логируется.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::generator::DeltaGenerator;
use crate::metrics::record_generator_cancel;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requested: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Mark the token and ask the generator to stop. Never fails.
pub fn cancel_export(token: &CancelToken, generator: &dyn DeltaGenerator) {
    token.request();
    record_generator_cancel();
    info!("cancel: requesting {} generator to stop", generator.name());
    if let Err(e) = generator.cancel() {
        warn!("cancel: generator cancel request failed: {e}");
    }
}

/// Route SIGINT/SIGTERM to [`cancel_export`]. Can be installed once per process.
pub fn install_signal_handler(
    token: CancelToken,
    generator: Arc<dyn DeltaGenerator>,
) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || cancel_export(&token, generator.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeneratorError;
    use crate::generator::SendRequest;
    use crate::pipe::PipeWriter;

    struct RefusesCancel;

    impl DeltaGenerator for RefusesCancel {
        fn invoke(&self, _req: &SendRequest, _out: PipeWriter) -> Result<(), GeneratorError> {
            Ok(())
        }
        fn cancel(&self) -> Result<(), GeneratorError> {
            Err(GeneratorError::Failed("engine busy".into()))
        }
        fn name(&self) -> &str {
            "refuses"
        }
    }

    #[test]
    fn failed_cancel_still_marks_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        cancel_export(&token, &RefusesCancel);
        assert!(clone.is_requested());
    }
}
