use crate::error::Error;

/// Returns `true` while the supply is safe for erasing and programming the flash.
pub type FnCheckVoltage = fn() -> bool;

/// Consulted right before every erase and program. Without a registered check the supply is
/// assumed to be fine.
#[derive(Default, Clone, Copy)]
pub(crate) struct VoltageGuard {
    check: Option<FnCheckVoltage>,
}

impl VoltageGuard {
    pub(crate) fn new(check: Option<FnCheckVoltage>) -> Self {
        Self { check }
    }

    pub(crate) fn set(&mut self, check: Option<FnCheckVoltage>) {
        self.check = check;
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        match self.check {
            Some(check) if !check() => {
                #[cfg(feature = "defmt")]
                defmt::warn!("voltage check failed, flash access refused");

                #[cfg(feature = "debug-logs")]
                println!("  guard: voltage check failed");

                Err(Error::LowVoltage)
            }
            _ => Ok(()),
        }
    }
}
