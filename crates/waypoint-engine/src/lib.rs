pub mod action;
pub mod builder;
pub mod condition;
pub mod engine;
pub mod hook;
pub mod registry;
pub mod state;
pub mod transition;

pub use action::{Action, ActionRef, Predicate, PredicateRef};
pub use builder::WorkflowBuilder;
pub use condition::Expression;
pub use engine::{Engine, EngineBuilder};
pub use hook::TracingHook;
pub use registry::Registry;
pub use state::{ActionState, ConditionalState, FinalState, State, StateRef};
pub use transition::Transition;
