//! Command-range to driver registry
//!
//! Registrations are kept in insertion order in a fixed-capacity list. The
//! command space is tiny, so lookup is a linear scan and the first range
//! containing the command wins.

use heapless::Vec;

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::protocol::MAX_DRIVERS;

/// One command range bound to a driver
pub struct Registration<'d> {
    /// First command ID (inclusive)
    pub start: u8,
    /// Last command ID (inclusive)
    pub end: u8,
    driver: &'d mut dyn Driver,
}

impl Registration<'_> {
    /// Whether `command` falls inside this range
    pub fn contains(&self, command: u8) -> bool {
        (self.start..=self.end).contains(&command)
    }

    /// Name of the bound driver
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }
}

/// Fixed-capacity registry of driver ranges
pub struct Registry<'d> {
    entries: Vec<Registration<'d>, MAX_DRIVERS>,
}

impl<'d> Registry<'d> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Bind `[start, end]` to `driver`
    ///
    /// Overlapping ranges are accepted (and logged); lookup resolves them by
    /// registration order.
    pub fn register(&mut self, start: u8, end: u8, driver: &'d mut dyn Driver) -> Result<()> {
        if start > end {
            log::warn!("Rejecting {} range 0x{:02X}..=0x{:02X}", driver.name(), start, end);
            return Err(Error::InvalidRange);
        }

        for existing in &self.entries {
            if start <= existing.end && existing.start <= end {
                log::warn!(
                    "{} range 0x{:02X}..=0x{:02X} overlaps {} range 0x{:02X}..=0x{:02X}",
                    driver.name(),
                    start,
                    end,
                    existing.driver.name(),
                    existing.start,
                    existing.end
                );
            }
        }

        let name = driver.name();
        self.entries
            .push(Registration { start, end, driver })
            .map_err(|_| {
                log::warn!(
                    "Registry full ({} slots), {} not registered",
                    MAX_DRIVERS,
                    name
                );
                Error::RegistryFull
            })?;
        log::debug!("Registered {} for 0x{:02X}..=0x{:02X}", name, start, end);
        Ok(())
    }

    /// Driver responsible for `command`
    pub fn lookup(&mut self, command: u8) -> Option<&mut (dyn Driver + 'd)> {
        self.entries
            .iter_mut()
            .find(|entry| entry.contains(command))
            .map(|entry| &mut *entry.driver)
    }

    /// Initialize every driver once, in registration order
    ///
    /// A failing driver does not stop the others; the first error is
    /// returned after all have been tried.
    pub fn initialize_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for entry in self.entries.iter_mut() {
            match entry.driver.initialize() {
                Ok(()) => log::debug!("Initialized {}", entry.driver.name()),
                Err(e) => {
                    log::warn!("Failed to initialize {}: {}", entry.driver.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Registrations in order
    pub fn iter(&self) -> impl Iterator<Item = &Registration<'d>> {
        self.entries.iter()
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No registrations yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Registry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Response;
    use crate::error::CommandError;

    struct Named {
        name: &'static str,
        inits: u32,
        fail_init: bool,
    }

    impl Named {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                inits: 0,
                fail_init: false,
            }
        }
    }

    impl Driver for Named {
        fn name(&self) -> &'static str {
            self.name
        }

        fn initialize(&mut self) -> Result<()> {
            self.inits += 1;
            if self.fail_init {
                Err(Error::Bus)
            } else {
                Ok(())
            }
        }

        fn handle_command(
            &mut self,
            _command: u8,
            _payload: &[u8],
            _response: &mut Response<'_>,
        ) -> core::result::Result<(), CommandError> {
            Ok(())
        }
    }

    fn name_of(registry: &mut Registry<'_>, command: u8) -> Option<&'static str> {
        registry.lookup(command).map(|d| d.name())
    }

    #[test]
    fn test_lookup_range_boundaries() {
        let mut sys = Named::new("system");
        let mut i2c = Named::new("i2c");
        let mut qspi = Named::new("qspi");
        let mut registry = Registry::new();
        registry.register(0x00, 0x0F, &mut sys).unwrap();
        registry.register(0x10, 0x1F, &mut i2c).unwrap();
        registry.register(0x25, 0x2F, &mut qspi).unwrap();

        let ranges = [(0x00u8, 0x0Fu8, "system"), (0x10, 0x1F, "i2c"), (0x25, 0x2F, "qspi")];
        for (start, end, name) in ranges {
            assert_eq!(name_of(&mut registry, start), Some(name));
            assert_eq!(name_of(&mut registry, end), Some(name));
        }
        assert_eq!(name_of(&mut registry, 0x24), None);
        assert_eq!(name_of(&mut registry, 0x30), None);
        assert_eq!(name_of(&mut registry, 0xFF), None);
    }

    #[test]
    fn test_first_registration_wins_on_overlap() {
        let mut first = Named::new("first");
        let mut second = Named::new("second");
        let mut registry = Registry::new();
        registry.register(0x20, 0x2F, &mut first).unwrap();
        registry.register(0x28, 0x30, &mut second).unwrap();
        assert_eq!(name_of(&mut registry, 0x28), Some("first"));
        assert_eq!(name_of(&mut registry, 0x30), Some("second"));
    }

    #[test]
    fn test_capacity_and_invalid_range() {
        let mut drivers: [Named; MAX_DRIVERS + 1] = core::array::from_fn(|_| Named::new("d"));
        let mut registry = Registry::new();
        let (last, rest) = drivers.split_last_mut().unwrap();
        for (i, driver) in rest.iter_mut().enumerate() {
            registry.register(i as u8, i as u8, driver).unwrap();
        }
        assert_eq!(registry.len(), MAX_DRIVERS);
        assert_eq!(registry.register(0x80, 0x80, last), Err(Error::RegistryFull));
        assert_eq!(name_of(&mut registry, 0x80), None);

        let mut other = Named::new("other");
        let mut registry = Registry::new();
        assert_eq!(registry.register(0x10, 0x0F, &mut other), Err(Error::InvalidRange));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_initialize_all_in_order_and_continues_after_failure() {
        let mut a = Named::new("a");
        let mut b = Named::new("b");
        b.fail_init = true;
        let mut c = Named::new("c");
        {
            let mut registry = Registry::new();
            registry.register(0x00, 0x0F, &mut a).unwrap();
            registry.register(0x10, 0x1F, &mut b).unwrap();
            registry.register(0x20, 0x2F, &mut c).unwrap();
            assert_eq!(registry.initialize_all(), Err(Error::Bus));
        }
        assert_eq!((a.inits, b.inits, c.inits), (1, 1, 1));
    }
}
