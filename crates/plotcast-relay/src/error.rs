//! Error types for the relay binary.
//!
//! [`RelayError`] wraps every failure mode during startup and shutdown so
//! `main` can propagate with `?`.

/// Top-level error for the relay binary.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: crate::config::ConfigError,
    },

    /// The bus forwarder could not start.
    #[error("bus error: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: plotcast_bus::BusError,
    },

    /// The HTTP server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: plotcast_server::ServerError,
    },

    /// The fanout task stopped unexpectedly.
    #[error("fanout error: {source}")]
    Fanout {
        /// The underlying fanout error.
        #[from]
        source: plotcast_fanout::FanoutError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
