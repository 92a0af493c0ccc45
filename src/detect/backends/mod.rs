pub mod process;
pub mod stub;

pub use process::ProcessClassifier;
pub use stub::{hand_at, ScriptedClassifier};
