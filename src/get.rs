//! The `Get<T>` trait and its implementation in this module allows providing a single generic,
//! overloaded function `get<T>()` for all supported types of the driver.
//!
//! The store itself only knows byte strings. Integers are kept as little endian bytes of their
//! own width, reading one with a different width fails with `LengthMismatch`.

use crate::error::Error;
use crate::platform::Platform;
use crate::{Key, Nvs};
use alloc::string::String;
use alloc::vec::Vec;

pub trait Get<T> {
    fn get(&mut self, key: &Key) -> Result<T, Error>;
}

impl<T, G: Get<T>> Get<T> for &mut G {
    fn get(&mut self, key: &Key) -> Result<T, Error> {
        (*self).get(key)
    }
}

impl<T: Platform> Get<bool> for Nvs<T> {
    fn get(&mut self, key: &Key) -> Result<bool, Error> {
        let [value] = self.get_fixed::<1>(key)?;
        Ok(value != 0)
    }
}

macro_rules! impl_get_le {
    ($($ty:ty),*) => {
        $(
            impl<T: Platform> Get<$ty> for Nvs<T> {
                fn get(&mut self, key: &Key) -> Result<$ty, Error> {
                    let raw = self.get_fixed::<{ size_of::<$ty>() }>(key)?;
                    Ok(<$ty>::from_le_bytes(raw))
                }
            }
        )*
    };
}

impl_get_le!(u8, u16, u32, u64, i8, i16, i32, i64);

impl<T: Platform> Get<String> for Nvs<T> {
    fn get(&mut self, key: &Key) -> Result<String, Error> {
        let raw = self.get_bytes(key)?;
        String::from_utf8(raw).map_err(|_| Error::CorruptedData)
    }
}

impl<T: Platform> Get<Vec<u8>> for Nvs<T> {
    fn get(&mut self, key: &Key) -> Result<Vec<u8>, Error> {
        self.get_bytes(key)
    }
}
