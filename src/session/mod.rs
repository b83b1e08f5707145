pub mod controller;
pub mod lifecycle;
pub mod state;

pub use controller::{SessionConfig, SessionController, SharedRecorder, SESSION_LENS};
pub use lifecycle::{LifecycleEvent, LifecycleObserver};
pub use state::{SessionPhase, SessionState};
