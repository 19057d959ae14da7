//! Pre-execution initializers and the parameters they read
//!
//! Before each run the executor builds a fresh [`ServiceContainer`] and runs
//! every initializer against it, in ascending [`priority`] order with ties
//! kept in discovery order. Initializers read the loosely typed
//! [`Parameters`] map and register the services they can build. A failing
//! initializer is logged and skipped. Anything it would have provided shows
//! up later as a `ServiceNotFound` error on the node that needs it.
//!
//! Initializers are discovered through `inventory`:
//!
//! ```ignore
//! inventory::submit!(portflow_engine::InitializerRegistration::new(|| {
//!     Box::new(ChatSettingsInitializer)
//! }));
//! ```
//!
//! [`priority`]: NodeContextInitializer::priority

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::services::ServiceContainer;

/// String-keyed, loosely typed parameters for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters {
    values: HashMap<String, Value>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Load parameters from a JSON object file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let parameters: Parameters = serde_json::from_str(&text)?;
        log::debug!(
            "Loaded {} parameters from {}",
            parameters.len(),
            path.as_ref().display()
        );
        Ok(parameters)
    }

    /// Read a parameter as `T`
    ///
    /// Coercion is best effort: the raw value is tried first, then a string
    /// is parsed as JSON (`"42"` becomes `42`), then a number or bool is
    /// read as its string form. Anything else is `None`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.values.get(name).and_then(coerce)
    }

    /// Parameter `name`, or environment variable `var` when it is absent
    pub fn get_or_env<T: DeserializeOwned>(&self, name: &str, var: &str) -> Option<T> {
        self.get_or_lookup(name, var, |var| std::env::var(var).ok())
    }

    /// Parameter `name`, or `lookup(key)` when it is absent
    ///
    /// The looked-up string goes through the same coercion as parameters.
    pub fn get_or_lookup<T: DeserializeOwned>(
        &self,
        name: &str,
        key: &str,
        lookup: impl FnOnce(&str) -> Option<String>,
    ) -> Option<T> {
        self.get(name).or_else(|| coerce(&Value::String(lookup(key)?)))
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn coerce<T: DeserializeOwned>(value: &Value) -> Option<T> {
    if let Ok(direct) = T::deserialize(value) {
        return Some(direct);
    }
    match value {
        Value::String(text) => serde_json::from_str(text).ok(),
        Value::Number(number) => string_as::<T>(number.to_string()),
        Value::Bool(flag) => string_as::<T>(flag.to_string()),
        _ => None,
    }
}

fn string_as<T: DeserializeOwned>(text: String) -> Option<T> {
    let deserializer: serde::de::value::StringDeserializer<serde_json::Error> = text.into_deserializer();
    T::deserialize(deserializer).ok()
}

/// What an initializer sees
pub struct InitializerContext<'a> {
    parameters: &'a Parameters,
    services: &'a ServiceContainer,
}

impl<'a> InitializerContext<'a> {
    pub fn new(parameters: &'a Parameters, services: &'a ServiceContainer) -> Self {
        Self {
            parameters,
            services,
        }
    }

    pub fn get_parameter<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.parameters.get(name)
    }

    pub fn get_parameter_or<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        self.parameters.get(name).unwrap_or(default)
    }

    /// Parameter with an environment variable fallback
    pub fn parameter_or_env<T: DeserializeOwned>(&self, name: &str, var: &str) -> Option<T> {
        self.parameters.get_or_env(name, var)
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.has(name)
    }

    pub fn register<T: ?Sized + Send + Sync + 'static>(&self, service: Arc<T>) {
        self.services.register(service);
    }

    pub fn try_register<T: ?Sized + Send + Sync + 'static>(&self, service: Arc<T>) -> bool {
        self.services.try_register(service)
    }

    pub fn services(&self) -> &ServiceContainer {
        self.services
    }
}

/// Contributes services before a graph execution begins
#[async_trait]
pub trait NodeContextInitializer: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first
    fn priority(&self) -> i32 {
        0
    }

    async fn initialize(&self, ctx: &InitializerContext<'_>) -> Result<()>;
}

/// Link-time registration of an initializer
pub struct InitializerRegistration {
    pub create: fn() -> Box<dyn NodeContextInitializer>,
}

impl InitializerRegistration {
    pub const fn new(create: fn() -> Box<dyn NodeContextInitializer>) -> Self {
        Self { create }
    }
}

inventory::collect!(InitializerRegistration);

/// Instantiate every initializer submitted through `inventory`
pub fn discover_initializers() -> Vec<Box<dyn NodeContextInitializer>> {
    inventory::iter::<InitializerRegistration>
        .into_iter()
        .map(|registration| (registration.create)())
        .collect()
}

/// Registers a pre-built service instance
///
/// Runs before discovered initializers unless given another priority, so
/// initializers using `try_register` leave the instance in place.
pub struct ServiceInstance<T: ?Sized> {
    name: String,
    priority: i32,
    instance: Arc<T>,
}

impl<T: ?Sized + Send + Sync + 'static> ServiceInstance<T> {
    pub fn new(instance: Arc<T>) -> Self {
        Self {
            name: format!("instance:{}", std::any::type_name::<T>()),
            priority: i32::MIN,
            instance,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl<T: ?Sized + Send + Sync + 'static> NodeContextInitializer for ServiceInstance<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn initialize(&self, ctx: &InitializerContext<'_>) -> Result<()> {
        ctx.register(self.instance.clone());
        Ok(())
    }
}

/// Run initializers in priority order against `services`
///
/// Returns how many succeeded.
pub(crate) async fn run_initializers(
    initializers: &[Box<dyn NodeContextInitializer>],
    parameters: &Parameters,
    services: &ServiceContainer,
) -> usize {
    let mut ordered: Vec<&dyn NodeContextInitializer> = initializers.iter().map(|i| i.as_ref()).collect();
    ordered.sort_by_key(|initializer| initializer.priority());

    let ctx = InitializerContext::new(parameters, services);
    let mut succeeded = 0;
    for initializer in ordered {
        match initializer.initialize(&ctx).await {
            Ok(()) => {
                log::debug!("Initializer '{}' done", initializer.name());
                succeeded += 1;
            }
            Err(e) => log::warn!("Initializer '{}' failed: {}", initializer.name(), e),
        }
    }
    succeeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use parking_lot::Mutex;
    use std::io::Write;

    struct Recording {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl NodeContextInitializer for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn initialize(&self, _ctx: &InitializerContext<'_>) -> Result<()> {
            self.log.lock().push(self.name);
            if self.fail {
                return Err(EngineError::failed("boom"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_parameter_coercion() {
        let params = Parameters::new()
            .with("count", "42")
            .with("flag", "true")
            .with("ratio", 0.5)
            .with("port", 8080)
            .with("name", "model-a")
            .with("list", serde_json::json!([1, 2]));

        assert_eq!(params.get::<i64>("count"), Some(42));
        assert_eq!(params.get::<bool>("flag"), Some(true));
        assert_eq!(params.get::<f64>("ratio"), Some(0.5));
        assert_eq!(params.get::<String>("port"), Some("8080".to_string()));
        assert_eq!(params.get::<String>("name"), Some("model-a".to_string()));
        assert_eq!(params.get::<Vec<i32>>("list"), Some(vec![1, 2]));

        assert_eq!(params.get::<i32>("name"), None);
        assert_eq!(params.get::<i32>("missing"), None);
        assert!(params.has("ratio"));
    }

    #[test]
    fn test_env_fallback() {
        let params = Parameters::new().with("present", "from-params");
        let env = HashMap::from([("PORTFLOW_FALLBACK", "17")]);
        let lookup = |var: &str| env.get(var).map(|v| v.to_string());

        assert_eq!(
            params.get_or_lookup::<String>("present", "PORTFLOW_FALLBACK", lookup),
            Some("from-params".to_string())
        );
        assert_eq!(params.get_or_lookup::<u32>("absent", "PORTFLOW_FALLBACK", lookup), Some(17));
        assert_eq!(params.get_or_lookup::<u32>("absent", "PORTFLOW_UNSET", lookup), None);
        assert_eq!(params.get_or_env::<u32>("absent", "PORTFLOW_TEST_NEVER_SET_VAR"), None);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"chat.model": "small", "retries": 3}}"#).unwrap();

        let params = Parameters::from_json_file(file.path()).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params.get::<String>("chat.model"), Some("small".to_string()));

        assert!(Parameters::from_json_file("/nonexistent/params.json").is_err());
    }

    #[tokio::test]
    async fn test_initializers_run_in_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = |name, priority, fail| -> Box<dyn NodeContextInitializer> {
            Box::new(Recording {
                name,
                priority,
                log: log.clone(),
                fail,
            })
        };
        let initializers = vec![
            make("late", 10, false),
            make("first-tie", 0, true),
            make("early", -5, false),
            make("second-tie", 0, false),
        ];

        let services = ServiceContainer::new();
        let succeeded = run_initializers(&initializers, &Parameters::new(), &services).await;

        assert_eq!(succeeded, 3);
        assert_eq!(*log.lock(), vec!["early", "first-tie", "second-tie", "late"]);
    }

    #[test]
    fn test_service_instance_registers_before_others() {
        struct Fallback;

        #[async_trait]
        impl NodeContextInitializer for Fallback {
            fn name(&self) -> &str {
                "fallback"
            }

            async fn initialize(&self, ctx: &InitializerContext<'_>) -> Result<()> {
                ctx.try_register(Arc::new(String::from("fallback")));
                Ok(())
            }
        }

        let initializers: Vec<Box<dyn NodeContextInitializer>> = vec![
            Box::new(Fallback),
            Box::new(ServiceInstance::new(Arc::new(String::from("preset")))),
        ];
        let services = ServiceContainer::new();
        tokio_test::block_on(run_initializers(&initializers, &Parameters::new(), &services));

        assert_eq!(services.get_service::<String>().unwrap().as_str(), "preset");
    }
}
