//! Umbra: Shadow Dispatch and Deterministic Scheduling for Sandboxed Tests
//!
//! Umbra (Latin: "shadow") lets tests run code written against a platform
//! SDK without the platform. Every call on a platform class is routed to a
//! *shadow class* that supplies fake behavior and keeps per-instance state,
//! and every asynchronous task is posted to a virtual-time *scheduler* that
//! only runs when the test tells it to.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    UMBRA Architecture                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ RealObject │    │ Resolution │    │ Shadow     │            │
//! │   │ .invoke()  │───►│ Cache      │───►│ Instance   │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! │         │                 ▲                                     │
//! │         ▼                 │                                     │
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │Interceptors│    │ Shadow     │    │ Scheduler  │            │
//! │   │ (clock)    │    │ Registry   │    │ Registry   │            │
//! │   └────────────┘    └────────────┘    └────────────┘            │
//! │                  all owned by a ShadowEnvironment               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use umbra::prelude::*;
//! use std::time::Duration;
//!
//! static VIEW: ClassInfo = ClassInfo::extends("android.view.View", &OBJECT);
//!
//! #[derive(Default)]
//! struct ViewState {
//!     width: i32,
//! }
//!
//! let shadow = ShadowClass::builder::<ViewState>("ShadowView", RealClass::of(&VIEW))
//!     .method("getWidth", &[], |s, _| Ok(Value::Int(s.width)))
//!     .method("setWidth", &[ParamType::INT], |s, inv| {
//!         s.width = inv.arg(0)?;
//!         Ok(Value::Void)
//!     })
//!     .build()?;
//!
//! let env = ShadowEnvironment::builder().shadow(shadow).build()?;
//! let view = env.new_instance(RealClass::of(&VIEW))?;
//! view.invoke(&Call::new("setWidth").int(120))?;
//! assert_eq!(view.call::<i32>(&Call::new("getWidth"))?, 120);
//!
//! let main = env.main_scheduler();
//! main.post_delayed(|| Ok(()), Duration::from_millis(100))?;
//! assert_eq!(main.advance_by(Duration::from_millis(100))?, 1);
//! # Ok::<(), UmbraError>(())
//! ```

// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

// Lets `#[derive(Shadow)]` expand to `::umbra::...` inside this crate's tests
extern crate self as umbra;

#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation
)]
mod binder;
mod class;
#[allow(clippy::missing_errors_doc)]
mod config;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
mod environment;
#[allow(clippy::missing_errors_doc)]
mod harness;
mod interceptor;
pub mod logging;
#[allow(clippy::missing_errors_doc)]
mod registry;
#[allow(clippy::missing_errors_doc)]
mod resolution;
mod result;
#[allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]
mod scheduler;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
mod shadow;
mod signature;
#[allow(
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
mod value;

pub use binder::{Call, InstanceId, Invocation, RealObject};
pub use class::{Ancestors, ClassInfo, RealClass, OBJECT, STRING, SYSTEM};
pub use config::{SandboxConfig, UnboundPolicy, DEFAULT_API_LEVEL};
pub use environment::{
    advance_by, bind_shadow_class, get_scheduler, idle, main_scheduler, pause, run_one_task,
    run_to_end_of_tasks, shadow_of, unpause, EnvironmentBuilder, EnvironmentGuard,
    ShadowEnvironment,
};
pub use harness::{SandboxHarness, SuiteResults, TestCase, TestFn, TestResult, TestSuite};
pub use interceptor::{InterceptHandler, Interceptors};
pub use registry::ShadowRegistry;
pub use resolution::{pick_method, CacheStats, ResolutionCache, ResolvedTarget};
pub use result::{TaskError, UmbraError, UmbraResult};
pub use scheduler::{
    ContextId, IdleState, Scheduler, SchedulerRegistry, TaskId, TaskResult,
    DEFAULT_MAX_TASKS_PER_DRAIN,
};
pub use shadow::{
    InstanceHandler, MethodBody, SdkRange, ShadowClass, ShadowClassBuilder, ShadowClassId,
    ShadowInstance, ShadowLevel, ShadowMethod, ShadowOptions, ShadowType, StaticHandler,
};
pub use signature::{
    is_identity_method, MethodKey, MethodRef, CONSTRUCTOR_HOOK, EQUALS, HASH_CODE,
    STATIC_INITIALIZER, TO_STRING,
};
pub use value::{
    FromValue, ParamType, Primitive, ReturnType, Value, COST_BOXING, COST_EXACT, COST_LOOSE,
    COST_UNBOX_WIDEN, COST_WIDENING,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::binder::{Call, Invocation, RealObject};
    pub use super::class::{ClassInfo, RealClass, OBJECT, STRING, SYSTEM};
    pub use super::config::{SandboxConfig, UnboundPolicy};
    pub use super::environment::{
        advance_by, bind_shadow_class, get_scheduler, idle, main_scheduler, pause, run_one_task,
        run_to_end_of_tasks, shadow_of, unpause, ShadowEnvironment,
    };
    pub use super::harness::{SandboxHarness, TestCase, TestSuite};
    pub use super::result::{UmbraError, UmbraResult};
    pub use super::scheduler::{ContextId, IdleState, Scheduler, TaskId};
    pub use super::shadow::{ShadowClass, ShadowInstance, ShadowOptions, ShadowType};
    pub use super::signature::MethodRef;
    pub use super::value::{FromValue, ParamType, ReturnType, Value};
    #[cfg(feature = "derive")]
    pub use umbra_derive::Shadow;
}

// Re-export derive macros when the `derive` feature is enabled
#[cfg(feature = "derive")]
pub use umbra_derive::Shadow;
