//! Resolves a declared secret name to its value for an authenticated
//! trigger. Backed by the process environment rather than a vault —
//! sufficient for a single-node deployment, swappable behind
//! `KeyResolver` for anything more.

use workforge_workflow::run::KeyResolver;

pub struct EnvKeyResolver;

impl KeyResolver for EnvKeyResolver {
    fn resolve(&self, name: &str) -> Option<serde_json::Value> {
        std::env::var(name).ok().map(serde_json::Value::String)
    }
}
