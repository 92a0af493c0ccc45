//! Gesture classifier boundary.
//!
//! - `GestureClassifier`: trait implemented by classifier backends.
//! - `ClassifierAdapter`: turns classifier output (or failure) into observations.
//! - `Recognition`: raw per-frame output in the recognizer's JSON shape.

mod adapter;
mod backend;
pub mod backends;
mod result;

pub use adapter::ClassifierAdapter;
pub use backend::{
    create_classifier, ClassifierBackend, ClassifierOptions, Delegate, GestureClassifier,
    RunningMode,
};
pub use backends::{ProcessClassifier, ScriptedClassifier};
pub use result::{Category, Recognition};
