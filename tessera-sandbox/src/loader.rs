//! Plugin loading strategies.
//!
//! Plugin code reaches the sandbox as a typed entry point, not as source
//! text: a [`PluginLoader`] is handed to the sandbox at spawn time and run
//! once per INIT. Two conventions are supported — an activation function
//! that receives the capability proxy and configuration ([`ActivateFn`]),
//! and a pre-built method table ([`StaticPlugin`]).

use crate::api::PluginApi;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future used at the plugin seams.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An invocable plugin method. Arguments and results are JSON values since
/// both ends of a method call sit across a serialization boundary.
pub type Method = Arc<dyn Fn(Vec<Value>) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

/// One-shot cleanup hook run at DISPOSE.
pub type DisposeFn = Box<dyn FnOnce() -> BoxFuture<anyhow::Result<()>> + Send>;

/// Wrap an async closure as a [`Method`]. The closure body runs only once
/// the returned future is polled, so a panicking method stays inside the
/// invocation task that contains it.
pub fn method<F, Fut>(f: F) -> Method
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |args| {
        let f = f.clone();
        Box::pin(async move { f(args).await })
    })
}

/// Wrap a synchronous closure as a [`Method`].
pub fn sync_method<F>(f: F) -> Method
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |args| {
        let f = f.clone();
        Box::pin(async move { f(args) })
    })
}

/// What a successful activation produces: the plugin's method table and an
/// optional disposer.
#[derive(Default)]
pub struct Activation {
    pub(crate) methods: HashMap<String, Method>,
    pub(crate) dispose: Option<DisposeFn>,
}

impl Activation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a method under the given name.
    pub fn method(mut self, name: impl Into<String>, method: Method) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    /// Attach a cleanup hook run when the plugin is disposed.
    pub fn on_dispose<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispose = Some(Box::new(move || Box::pin(f())));
        self
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// Strategy for producing a plugin instance at INIT time.
///
/// `load` takes `&self` so a repeated INIT re-runs activation against a fresh
/// capability proxy (last INIT wins).
pub trait PluginLoader: Send + Sync + 'static {
    fn load(&self, api: PluginApi, config: Value) -> BoxFuture<anyhow::Result<Activation>>;
}

/// The activation-function convention: `activate(api, config)` runs once per
/// INIT and returns the method table. Activation code may call capability
/// registration APIs as side effects; handlers registered that way are merged
/// into the instance when activation completes.
pub struct ActivateFn {
    f: Arc<dyn Fn(PluginApi, Value) -> BoxFuture<anyhow::Result<Activation>> + Send + Sync>,
}

impl ActivateFn {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(PluginApi, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Activation>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |api, config| Box::pin(f(api, config))),
        }
    }
}

impl PluginLoader for ActivateFn {
    fn load(&self, api: PluginApi, config: Value) -> BoxFuture<anyhow::Result<Activation>> {
        (self.f)(api, config)
    }
}

/// The plugin-object convention: a fixed method table declared up front,
/// without access to the capability proxy or configuration during load.
#[derive(Default)]
pub struct StaticPlugin {
    methods: HashMap<String, Method>,
    dispose: Option<Arc<dyn Fn() -> BoxFuture<anyhow::Result<()>> + Send + Sync>>,
}

impl StaticPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, name: impl Into<String>, method: Method) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    pub fn on_dispose<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispose = Some(Arc::new(move || Box::pin(f())));
        self
    }
}

impl PluginLoader for StaticPlugin {
    fn load(&self, _api: PluginApi, _config: Value) -> BoxFuture<anyhow::Result<Activation>> {
        let methods = self.methods.clone();
        let dispose = self.dispose.clone();
        Box::pin(async move {
            Ok(Activation {
                methods,
                dispose: dispose.map(|d| Box::new(move || d()) as DisposeFn),
            })
        })
    }
}
