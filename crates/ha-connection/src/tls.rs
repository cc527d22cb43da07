use std::sync::OnceLock;

/// Selects the process-wide rustls crypto provider before the first `wss`
/// connection. rustls 0.23 panics when it cannot infer one.
pub(crate) fn install_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        // Err means another component already installed a provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
