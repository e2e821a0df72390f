//! # Built-in Component Library
//!
//! The components every graph can use, registered under stable ids by
//! [`component_store`]:
//!
//! - [`core`]: stream plumbing (`core/Identity`, `core/Repeat`, `core/Zip`, ...)
//! - [`operators`]: the language's binary and unary operators as pure
//!   components (`operators/Add`, `operators/Not`, ...)
//! - [`io`]: standard input and output (`io/Input`, `io/Output`)
//!
//! [`specials`] maps operator symbols and other language constructs onto
//! those ids.

pub mod core;
pub mod io;
pub mod operators;

use crate::component::{ComponentContext, PureFn};
use crate::error::StreamError;
use crate::protocol::Value;
use crate::store::{ComponentSpec, ComponentStore, Specials};
use std::collections::BTreeMap;
use std::sync::Arc;

type BinaryOp = fn(&Value, &Value) -> Result<Value, StreamError>;
type UnaryOp = fn(&Value) -> Result<Value, StreamError>;

/// Binary operators: symbol, component name, implementation.
const BIN_OPS: &[(&str, &str, BinaryOp)] = &[
  ("||", "Or", operators::or),
  ("&&", "And", operators::and),
  ("<=", "Lte", operators::lte),
  ("<", "Lt", operators::lt),
  ("==", "Eq", operators::eq),
  ("!=", "Neq", operators::neq),
  (">=", "Gte", operators::gte),
  (">", "Gt", operators::gt),
  ("+", "Add", operators::add),
  ("-", "Subtract", operators::subtract),
  ("*", "Multiply", operators::multiply),
  ("/", "Divide", operators::divide),
  ("%", "Modulo", operators::modulo),
];

/// Unary operators implemented as pure components: symbol, component name,
/// implementation. `@` maps to `core/Repeat` instead.
const UN_OPS: &[(&str, &str, UnaryOp)] = &[("-", "Negate", operators::negate), ("!", "Not", operators::not)];

/// Whether input `idx` will deliver nothing more: it terminated, or it never
/// had (or no longer has) a subscription.
pub fn input_done(ctx: &ComponentContext, idx: usize) -> bool {
  let port = ctx.in_port(idx);
  port.is_terminated() || port.subscription_count() == 0
}

/// Whether output `idx` has nobody left to send to.
pub fn output_done(ctx: &ComponentContext, idx: usize) -> bool {
  let port = ctx.out_port(idx);
  port.is_terminated() || port.subscriber_count() == 0
}

fn binary(op: BinaryOp) -> PureFn {
  Arc::new(move |args: &[Value]| op(&args[0], &args[1]))
}

fn unary(op: UnaryOp) -> PureFn {
  Arc::new(move |args: &[Value]| op(&args[0]))
}

/// Component ids backing the language's built-in constructs.
pub fn specials() -> Specials {
  let bin_ops: BTreeMap<String, String> = BIN_OPS
    .iter()
    .map(|(symbol, name, _)| (symbol.to_string(), format!("operators/{}", name)))
    .collect();
  let mut un_ops: BTreeMap<String, String> = UN_OPS
    .iter()
    .map(|(symbol, name, _)| (symbol.to_string(), format!("operators/{}", name)))
    .collect();
  un_ops.insert("@".to_string(), "core/Repeat".to_string());
  Specials {
    identity: "core/Identity".to_string(),
    bin_ops,
    un_ops,
    array_push: "operators/ArrayPush".to_string(),
    object_set: "operators/SetPropertyValue".to_string(),
    index: "operators/Index".to_string(),
  }
}

/// A store with every built-in component and the matching [`specials`].
///
/// # Example
///
/// ```rust
/// use portflow::nodes::component_store;
///
/// let store = component_store();
/// assert_eq!(store.spec("operators/Add").unwrap().ins, ["in1", "in2"]);
/// assert_eq!(store.specials.bin_ops["+"], "operators/Add");
/// ```
pub fn component_store() -> ComponentStore {
  let mut store = ComponentStore::new(specials());
  let pass = || ComponentSpec::new(["in"], ["out"]);
  let pair = || ComponentSpec::new(["in1", "in2"], ["out"]);

  store
    .register_behavior("core/Identity", pass(), || core::Identity)
    .register_behavior("core/Repeat", pass(), core::Repeat::default)
    .register_generator("core/Kick", ComponentSpec::new(["in", "sig"], ["out"]), || core::kick)
    .register_behavior("core/Interval", ComponentSpec::new(["period"], ["out"]), core::Interval::default)
    .register_behavior("core/Nats", ComponentSpec::new(Vec::<String>::new(), ["out"]), core::Nats::default)
    .register_behavior("core/If", ComponentSpec::new(["cond", "then", "else"], ["out"]), || core::If)
    .register_behavior("core/Buffer", ComponentSpec::new(["in", "n"], ["out"]), core::Buffer::default)
    .register_pure("core/Zip", pair(), Arc::new(core::zip))
    .register_behavior("core/Nth", ComponentSpec::new(["in", "n"], ["out"]), core::Nth::default)
    .register_generator("core/ToArray", pass(), || core::to_array)
    .register_generator("core/FromArray", pass(), || core::from_array)
    .register_behavior("core/CombineLatest", pair(), core::CombineLatest::default);

  for (_, name, op) in BIN_OPS {
    store.register_pure(format!("operators/{}", name), pair(), binary(*op));
  }
  for (_, name, op) in UN_OPS {
    store.register_pure(format!("operators/{}", name), pass(), unary(*op));
  }
  store
    .register_pure("operators/ArrayPush", pair(), binary(operators::array_push))
    .register_pure("operators/Index", pair(), binary(operators::index))
    .register_pure(
      "operators/SetPropertyValue",
      ComponentSpec::new(["key", "value", "obj"], ["out"]),
      Arc::new(|args: &[Value]| operators::set_property_value(&args[0], &args[1], &args[2])),
    );

  store
    .register_behavior("io/Output", ComponentSpec::new(["in1"], Vec::<String>::new()), io::Output::stdout)
    .register_generator("io/Input", ComponentSpec::new(Vec::<String>::new(), ["out"]), io::Input::stdin);
  store
}
