//! Process-wide discovery of transport and codec implementations.
//!
//! Factories are registered at startup and queried once at host construction
//! time; the first registration wins. This is configuration glue, not part of
//! the concurrency-sensitive core.

use std::sync::{Arc, Mutex, OnceLock};

use crate::{codec::Codec, transport::Transport};

type TransportFactory = Box<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;
type CodecFactory = Box<dyn Fn() -> Arc<dyn Codec> + Send + Sync>;

#[derive(Default)]
struct Registry {
    transports: Vec<TransportFactory>,
    codecs: Vec<CodecFactory>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

/// Registers a transport factory. Later registrations are only consulted if
/// every earlier factory is removed, so register the preferred implementation
/// first.
pub fn register_transport<F>(factory: F)
where
    F: Fn() -> Arc<dyn Transport> + Send + Sync + 'static,
{
    registry()
        .lock()
        .expect("registry lock poisoned")
        .transports
        .push(Box::new(factory));
}

/// Registers a codec factory.
pub fn register_codec<F>(factory: F)
where
    F: Fn() -> Arc<dyn Codec> + Send + Sync + 'static,
{
    registry()
        .lock()
        .expect("registry lock poisoned")
        .codecs
        .push(Box::new(factory));
}

/// First registered transport, when any.
pub fn transport() -> Option<Arc<dyn Transport>> {
    registry()
        .lock()
        .expect("registry lock poisoned")
        .transports
        .first()
        .map(|f| f())
}

/// First registered codec, when any.
pub fn codec() -> Option<Arc<dyn Codec>> {
    registry()
        .lock()
        .expect("registry lock poisoned")
        .codecs
        .first()
        .map(|f| f())
}
