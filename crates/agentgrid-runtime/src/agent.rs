//! The unit of work the pool drives.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

/// An opaque callable: takes an input, produces a response or fails.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<Self::Output>;
}

/// Adapts an async closure into an `Agent`. Built by [`agent_fn`].
pub struct FnAgent<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

/// Wrap `f` as an agent.
///
/// ```ignore
/// let echo = agent_fn(|input: String| async move { Ok(input.to_uppercase()) });
/// ```
pub fn agent_fn<F, Fut, I, O>(f: F) -> FnAgent<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    FnAgent {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> Agent for FnAgent<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn execute(&self, input: I) -> anyhow::Result<O> {
        (self.f)(input).await
    }
}
