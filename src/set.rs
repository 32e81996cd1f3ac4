use crate::error::Error;
use crate::platform::Platform;
use crate::{Key, Nvs};
use alloc::string::String;
use alloc::vec::Vec;

pub trait Set<T> {
    fn set(&mut self, key: &Key, value: T) -> Result<(), Error>;
}

impl<T, S: Set<T>> Set<T> for &mut S {
    fn set(&mut self, key: &Key, value: T) -> Result<(), Error> {
        (*self).set(key, value)
    }
}

impl<T: Platform> Set<bool> for Nvs<T> {
    fn set(&mut self, key: &Key, value: bool) -> Result<(), Error> {
        self.set_bytes(key, &[value as u8])
    }
}

macro_rules! impl_set_le {
    ($($ty:ty),*) => {
        $(
            impl<T: Platform> Set<$ty> for Nvs<T> {
                fn set(&mut self, key: &Key, value: $ty) -> Result<(), Error> {
                    self.set_bytes(key, &value.to_le_bytes())
                }
            }
        )*
    };
}

impl_set_le!(u8, u16, u32, u64, i8, i16, i32, i64);

impl<T: Platform> Set<&str> for Nvs<T> {
    fn set(&mut self, key: &Key, value: &str) -> Result<(), Error> {
        self.set_bytes(key, value.as_bytes())
    }
}

impl<T: Platform> Set<&String> for Nvs<T> {
    fn set(&mut self, key: &Key, value: &String) -> Result<(), Error> {
        self.set_bytes(key, value.as_bytes())
    }
}

impl<T: Platform> Set<&[u8]> for Nvs<T> {
    fn set(&mut self, key: &Key, value: &[u8]) -> Result<(), Error> {
        self.set_bytes(key, value)
    }
}

impl<T: Platform> Set<&Vec<u8>> for Nvs<T> {
    fn set(&mut self, key: &Key, value: &Vec<u8>) -> Result<(), Error> {
        self.set_bytes(key, value)
    }
}

impl<T: Platform, const N: usize> Set<&[u8; N]> for Nvs<T> {
    fn set(&mut self, key: &Key, value: &[u8; N]) -> Result<(), Error> {
        self.set_bytes(key, value)
    }
}
