use crate::error::EncodeError;
use bytes::Bytes;
use std::fmt::Debug;

/// A value that can be published.
///
/// In the end every message is bytes. Raw bytes pass through untouched,
/// strings are sent as UTF-8 and plain numbers as their decimal text.
/// Anything else can be wrapped in [Formatted], or derive
/// [JsonPayload](crate::JsonPayload) / [DebugPayload](crate::DebugPayload).
pub trait IntoPayload {
    /// Turn the value into the message payload.
    fn into_payload(self) -> Result<Bytes, EncodeError>;
}

impl IntoPayload for Bytes {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(self)
    }
}

impl IntoPayload for Vec<u8> {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(self))
    }
}

impl IntoPayload for Box<[u8]> {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(self))
    }
}

impl IntoPayload for &[u8] {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::copy_from_slice(self))
    }
}

impl<const N: usize> IntoPayload for &[u8; N] {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::copy_from_slice(self))
    }
}

impl IntoPayload for String {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(self))
    }
}

impl IntoPayload for &str {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }
}

impl IntoPayload for &String {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }
}

impl IntoPayload for () {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::new())
    }
}

macro_rules! display_payload {
    ($($t:ty),* $(,)?) => {
        $(
            impl IntoPayload for $t {
                fn into_payload(self) -> Result<Bytes, EncodeError> {
                    Ok(Bytes::from(self.to_string()))
                }
            }
        )*
    };
}

display_payload!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char
);

/// Publish any value by its `Debug` representation.
///
/// ```rust
/// # use hibiki::{Formatted, IntoPayload};
/// #[derive(Debug)]
/// struct Person { name: &'static str, age: u8 }
///
/// let payload = Formatted(Person { name: "derek", age: 22 }).into_payload().unwrap();
/// assert_eq!(&payload[..], br#"Person { name: "derek", age: 22 }"#);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Formatted<T: Debug>(pub T);

impl<T: Debug> IntoPayload for Formatted<T> {
    fn into_payload(self) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(format!("{:?}", self.0)))
    }
}
