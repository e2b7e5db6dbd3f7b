/*! Command-encoder state tracking and pipeline-state resolution.
 *
 *  This library is the CPU-side bookkeeping layer that sits between a
 *  render-command stream and a native GPU command encoder. It tracks
 *  bound resources per shader stage behind occupancy bitmasks, keeps
 *  dirty bits so only changed state reaches the native API, resolves
 *  compiled pipeline objects through a shared cache keyed on typed-buffer
 *  formats, plans render-target load/store actions, and — in diagnostic
 *  builds — proves that everything a shader reflects as required is
 *  actually bound before a draw is allowed to reach the driver.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Need many arguments for some core functions to be able to re-use
    // code in many situations.
    clippy::too_many_arguments,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    unused_qualifications
)]

pub mod binding;
pub mod encoder;
pub mod pipeline;
pub mod reflection;
pub mod render_pass;
pub mod resource;
pub mod state;
mod validation;

pub use validation::validate_stage;

/// Fast hash map used internally.
type FastHashMap<K, V> =
    std::collections::HashMap<K, V, std::hash::BuildHasherDefault<fxhash::FxHasher>>;
