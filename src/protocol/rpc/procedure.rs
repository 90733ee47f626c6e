//! Typed procedure adapters.
//!
//! A registered procedure is a value that knows how to decode its argument
//! type, run the user's handler and encode the result type. Dispatch is a
//! table lookup followed by one virtual call.

use std::future::Future;
use std::io::{self, Cursor};
use std::marker::PhantomData;

use futures::future::{self, BoxFuture, FutureExt};

use crate::protocol::xdr::{deserialize, to_bytes, Deserialize, Serialize};

/// Why a procedure did not produce results.
#[derive(Debug)]
pub enum ProcedureError {
    /// The arguments could not be decoded into the expected shape.
    GarbageArgs(io::Error),
    /// The handler ran and failed, or its results could not be encoded.
    Failed(anyhow::Error),
}

/// One entry of a server's procedure table.
pub trait Procedure: Send + Sync {
    /// Decodes `args`, runs the procedure and returns the encoded results.
    fn invoke<'a>(&'a self, args: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, ProcedureError>>;
}

/// Adapter turning an async function `A -> anyhow::Result<R>` into a
/// [`Procedure`].
pub struct FnProcedure<A, R, F> {
    handler: F,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R, F> FnProcedure<A, R, F> {
    pub fn new(handler: F) -> Self {
        Self { handler, _types: PhantomData }
    }
}

impl<A, R, F, Fut> Procedure for FnProcedure<A, R, F>
where
    A: Deserialize + Default + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    fn invoke<'a>(&'a self, args: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, ProcedureError>> {
        let arg = match deserialize::<A>(&mut Cursor::new(args)) {
            Ok(arg) => arg,
            Err(e) => return future::ready(Err(ProcedureError::GarbageArgs(e))).boxed(),
        };
        let pending = (self.handler)(arg);
        async move {
            let result = pending.await.map_err(ProcedureError::Failed)?;
            to_bytes(&result).map_err(|e| ProcedureError::Failed(e.into()))
        }
        .boxed()
    }
}
