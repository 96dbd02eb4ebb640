//! Argument lists.
//!
//! Arguments travel as one independently serialized buffer per parameter. On
//! the calling side any tuple of `Serialize` values can be sent; on the handling
//! side the handler's tuple type fixes both the arity and the parameter types.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::error::Result;
use crate::serializer::Serializer;

/// A caller-side argument list.
pub trait IntoArgs {
    fn into_buffers<S: Serializer>(&self) -> Result<Vec<Bytes>>;
}

/// A handler-side parameter list.
pub trait FromArgs: Sized + Send + 'static {
    /// Number of parameters the handler declares.
    const COUNT: usize;

    fn from_buffers<S: Serializer>(buffers: &[Bytes]) -> Result<Self>;
}

fn arg<S: Serializer, T: DeserializeOwned>(buffers: &[Bytes], index: usize) -> Result<T> {
    let buf = buffers.get(index).ok_or_else(|| {
        Error::InvalidCall(format!("Missing argument {}", index))
    })?;
    S::deserialize(buf).map_err(|e| {
        Error::InvalidCall(format!("Argument {} could not be deserialized: {}", index, e))
    })
}

/// Raw buffers pass through untouched.
impl IntoArgs for Vec<Bytes> {
    fn into_buffers<S: Serializer>(&self) -> Result<Vec<Bytes>> {
        Ok(self.clone())
    }
}

macro_rules! impl_args {
    ($count:expr; $($name:ident : $idx:tt),*) => {
        impl<$($name: Serialize),*> IntoArgs for ($($name,)*) {
            #[allow(unused_variables)]
            fn into_buffers<S: Serializer>(&self) -> Result<Vec<Bytes>> {
                Ok(vec![$(Bytes::from(S::serialize(&self.$idx)?)),*])
            }
        }

        impl<$($name: DeserializeOwned + Send + 'static),*> FromArgs for ($($name,)*) {
            const COUNT: usize = $count;

            #[allow(unused_variables)]
            fn from_buffers<S: Serializer>(buffers: &[Bytes]) -> Result<Self> {
                Ok(($(arg::<S, $name>(buffers, $idx)?,)*))
            }
        }
    };
}

impl_args!(0;);
impl_args!(1; A: 0);
impl_args!(2; A: 0, B: 1);
impl_args!(3; A: 0, B: 1, C: 2);
impl_args!(4; A: 0, B: 1, C: 2, D: 3);
impl_args!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_args!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_args!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_args!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
