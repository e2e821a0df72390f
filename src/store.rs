//! # Component Store
//!
//! The registry a graph is instantiated against. Every component id used by
//! a graph node (such as `core/Identity` or `operators/Add`) maps to a
//! [`ComponentDef`]: the port names of that component type plus a factory
//! creating live instances.
//!
//! The [`Specials`] table names the components a front end maps language
//! constructs onto (operators, identity, indexing); the runtime itself only
//! reads the component table.

use crate::component::{
  BaseComponent, Behavior, Component, Generator, GeneratorComponent, PureComponent, PureFn,
};
use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Ordered input and output port names of a component type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
  /// Input port names, in index order.
  pub ins: Vec<String>,
  /// Output port names, in index order.
  pub outs: Vec<String>,
}

impl ComponentSpec {
  /// Creates a spec from input and output names.
  ///
  /// # Example
  ///
  /// ```rust
  /// use portflow::store::ComponentSpec;
  ///
  /// let spec = ComponentSpec::new(["a", "b"], ["out"]);
  /// assert_eq!(spec.in_index("b"), Some(1));
  /// ```
  pub fn new<I, O>(ins: I, outs: O) -> Self
  where
    I: IntoIterator,
    I::Item: Into<String>,
    O: IntoIterator,
    O::Item: Into<String>,
  {
    Self {
      ins: ins.into_iter().map(Into::into).collect(),
      outs: outs.into_iter().map(Into::into).collect(),
    }
  }

  /// Index of the input named `name`.
  pub fn in_index(&self, name: &str) -> Option<usize> {
    self.ins.iter().position(|port| port == name)
  }

  /// Index of the output named `name`.
  pub fn out_index(&self, name: &str) -> Option<usize> {
    self.outs.iter().position(|port| port == name)
  }
}

/// Creates a live component given its instance name.
pub type ComponentFactory = Arc<dyn Fn(&str) -> Arc<dyn Component> + Send + Sync>;

/// A component type: its ports and how to build it.
#[derive(Clone)]
pub struct ComponentDef<Impl = ComponentFactory> {
  /// Port names of every instance.
  pub spec: ComponentSpec,
  /// The implementation, by default a factory.
  pub implementation: Impl,
}

impl<Impl> fmt::Debug for ComponentDef<Impl> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ComponentDef")
      .field("spec", &self.spec)
      .finish_non_exhaustive()
  }
}

impl ComponentDef {
  /// Creates a definition from a spec and a factory.
  pub fn new(
    spec: ComponentSpec,
    factory: impl Fn(&str) -> Arc<dyn Component> + Send + Sync + 'static,
  ) -> Self {
    Self {
      spec,
      implementation: Arc::new(factory),
    }
  }

  /// Creates a live instance named `name`.
  pub fn create(&self, name: &str) -> Arc<dyn Component> {
    (self.implementation)(name)
  }
}

/// Component names a front end uses for built-in language constructs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Specials {
  /// The pass-through component.
  pub identity: String,
  /// Binary operator symbol to component id.
  pub bin_ops: BTreeMap<String, String>,
  /// Unary operator symbol to component id.
  pub un_ops: BTreeMap<String, String>,
  /// Appends an element to an array.
  pub array_push: String,
  /// Sets a property on an object.
  pub object_set: String,
  /// Indexes into an array or object.
  pub index: String,
}

/// Registry of component types by id.
pub struct ComponentStore<Impl = ComponentFactory> {
  /// Component id to definition.
  pub components: BTreeMap<String, ComponentDef<Impl>>,
  /// Names of the components backing language constructs.
  pub specials: Specials,
}

impl<Impl> Default for ComponentStore<Impl> {
  fn default() -> Self {
    Self {
      components: BTreeMap::new(),
      specials: Specials::default(),
    }
  }
}

impl<Impl> fmt::Debug for ComponentStore<Impl> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ComponentStore")
      .field("components", &self.components.keys().collect::<Vec<_>>())
      .field("specials", &self.specials)
      .finish()
  }
}

impl<Impl> ComponentStore<Impl> {
  /// An empty store with the given specials table.
  pub fn new(specials: Specials) -> Self {
    Self {
      components: BTreeMap::new(),
      specials,
    }
  }

  /// The definition registered as `component_id`.
  pub fn get(&self, component_id: &str) -> Option<&ComponentDef<Impl>> {
    self.components.get(component_id)
  }

  /// Port names of `component_id`.
  pub fn spec(&self, component_id: &str) -> Result<&ComponentSpec, GraphError> {
    self
      .get(component_id)
      .map(|def| &def.spec)
      .ok_or_else(|| GraphError::UnknownComponent(component_id.to_string()))
  }

  /// Whether `component_id` is registered.
  pub fn contains(&self, component_id: &str) -> bool {
    self.components.contains_key(component_id)
  }

  /// Registered ids, sorted.
  pub fn component_ids(&self) -> impl Iterator<Item = &str> {
    self.components.keys().map(String::as_str)
  }
}

impl ComponentStore {
  /// Registers a component type, replacing any previous definition.
  ///
  /// # Arguments
  ///
  /// * `component_id` - Id graph nodes refer to, such as `core/Identity`.
  /// * `spec` - Port names of every instance.
  /// * `factory` - Builds an instance from its name.
  pub fn register(
    &mut self,
    component_id: impl Into<String>,
    spec: ComponentSpec,
    factory: impl Fn(&str) -> Arc<dyn Component> + Send + Sync + 'static,
  ) -> &mut Self {
    let component_id = component_id.into();
    trace!("ComponentStore::register(component_id={})", component_id);
    self
      .components
      .insert(component_id, ComponentDef::new(spec, factory));
    self
  }

  /// Registers a [`Behavior`] built fresh for every instance.
  pub fn register_behavior<B, F>(
    &mut self,
    component_id: impl Into<String>,
    spec: ComponentSpec,
    make: F,
  ) -> &mut Self
  where
    B: Behavior,
    F: Fn() -> B + Send + Sync + 'static,
  {
    let instance_spec = spec.clone();
    self.register(component_id, spec, move |name| {
      BaseComponent::new(name, instance_spec.clone(), make()) as Arc<dyn Component>
    })
  }

  /// Registers a pure function over one value from each input.
  pub fn register_pure(
    &mut self,
    component_id: impl Into<String>,
    spec: ComponentSpec,
    func: PureFn,
  ) -> &mut Self {
    let instance_spec = spec.clone();
    self.register(component_id, spec, move |name| {
      PureComponent::create(name, instance_spec.clone(), Arc::clone(&func)) as Arc<dyn Component>
    })
  }

  /// Registers a generator body built fresh for every instance.
  pub fn register_generator<G, F>(
    &mut self,
    component_id: impl Into<String>,
    spec: ComponentSpec,
    make: F,
  ) -> &mut Self
  where
    G: Generator,
    F: Fn() -> G + Send + Sync + 'static,
  {
    let instance_spec = spec.clone();
    self.register(component_id, spec, move |name| {
      GeneratorComponent::create(name, instance_spec.clone(), make()) as Arc<dyn Component>
    })
  }

  /// Creates a live instance of `component_id` named `instance_name`.
  pub fn instantiate(
    &self,
    component_id: &str,
    instance_name: &str,
  ) -> Result<Arc<dyn Component>, GraphError> {
    let def = self
      .get(component_id)
      .ok_or_else(|| GraphError::UnknownComponent(component_id.to_string()))?;
    trace!(
      "ComponentStore::instantiate(component_id={}, instance_name={})",
      component_id, instance_name
    );
    Ok(def.create(instance_name))
  }
}
