//! Process-wide table of node factories.
//!
//! The built-in nodes from [`crate::elements`] are registered on first use.
//! Applications may add their own with [`register_element`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use super::element::ElementImpl;
use super::lock;

/// Builds a fresh node implementation.
pub type Constructor = Arc<dyn Fn() -> Box<dyn ElementImpl> + Send + Sync>;

struct Registry {
    factories: RwLock<HashMap<String, Constructor>>,
    counters: std::sync::Mutex<HashMap<String, usize>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut factories = HashMap::new();
        crate::elements::register_builtin(&mut |name, ctor| {
            factories.insert(name.to_owned(), ctor);
        });
        Registry {
            factories: RwLock::new(factories),
            counters: std::sync::Mutex::new(HashMap::new()),
        }
    })
}

/// Register (or replace) a node factory under `name`.
pub fn register_element<F>(name: &str, constructor: F)
where
    F: Fn() -> Box<dyn ElementImpl> + Send + Sync + 'static,
{
    let mut factories = registry()
        .factories
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if factories
        .insert(name.to_owned(), Arc::new(constructor))
        .is_some()
    {
        log::debug!("registry: replaced factory '{name}'");
    }
}

/// `true` when a factory named `name` exists.
pub fn is_registered(name: &str) -> bool {
    registry()
        .factories
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .contains_key(name)
}

pub(crate) fn construct(name: &str) -> Option<Box<dyn ElementImpl>> {
    let ctor = registry()
        .factories
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(name)
        .cloned()?;
    Some(ctor())
}

/// `<factory><n>` with `n` counting per factory from zero.
pub(crate) fn unique_name(factory: &str) -> String {
    let mut counters = lock(&registry().counters);
    let n = counters.entry(factory.to_owned()).or_insert(0);
    let name = format!("{factory}{n}");
    *n += 1;
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::FakeSink;
    use crate::graph::Element;

    #[test]
    fn builtin_factories_are_registered() {
        for name in [
            "filesrc",
            "wavparse",
            "audioconvert",
            "audioresample",
            "audiotestsrc",
            "fakesink",
            "recognizer",
        ] {
            assert!(is_registered(name), "{name} missing");
        }
        assert!(!is_registered("directsoundsrc"));
    }

    #[test]
    fn custom_factory_can_be_added() {
        register_element("quietsink", || Box::new(FakeSink::default()));
        let element = Element::make("quietsink");
        assert!(element.is_valid());
        assert_eq!(element.factory_name(), "quietsink");
    }
}
