//! Stage trait and implementations.
//!
//! Stages are the units of work a pipeline definition orders. A stage body
//! only sees its projected inputs and returns either an output or a
//! classified [`StageError`].

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::StageInputs;
use crate::core::StageOutput;
use crate::errors::StageError;

/// Trait for pipeline stage bodies.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `inputs` - The context projected onto the stage's declared input keys
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Transient`] for failures worth retrying and
    /// [`StageError::Fatal`] for everything else.
    async fn execute(&self, inputs: &StageInputs) -> Result<StageOutput, StageError>;
}

/// A stage body with a statically declared output type.
///
/// Wrap it with [`typed`] to use it in a definition.
#[async_trait]
pub trait TypedStage: Send + Sync + Debug {
    /// The stage's output contract.
    type Output: Serialize + Send;

    /// Runs the stage.
    async fn run(&self, inputs: &StageInputs) -> Result<Self::Output, StageError>;
}

#[derive(Debug)]
struct Typed<S>(S);

#[async_trait]
impl<S: TypedStage> Stage for Typed<S> {
    async fn execute(&self, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let output = self.0.run(inputs).await?;
        StageOutput::from_typed(&output)
    }
}

/// Adapts a [`TypedStage`] into a shareable [`Stage`].
pub fn typed<S: TypedStage + 'static>(stage: S) -> Arc<dyn Stage> {
    Arc::new(Typed(stage))
}

/// A simple synchronous function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageInputs) -> Result<StageOutput, StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageInputs) -> Result<StageOutput, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageInputs) -> Result<StageOutput, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageInputs) -> Result<StageOutput, StageError> + Send + Sync,
{
    async fn execute(&self, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        (self.func)(inputs)
    }
}

/// An async function-based stage.
pub struct AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutput, StageError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutput, StageError>> + Send,
{
    /// Creates a new async function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutput, StageError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for AsyncFnStage<F, Fut>
where
    F: Fn(StageInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageOutput, StageError>> + Send,
{
    async fn execute(&self, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        (self.func)(inputs.clone()).await
    }
}

/// A stage that succeeds with an empty output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStage;

#[async_trait]
impl Stage for NoOpStage {
    async fn execute(&self, _inputs: &StageInputs) -> Result<StageOutput, StageError> {
        Ok(StageOutput::empty())
    }
}
