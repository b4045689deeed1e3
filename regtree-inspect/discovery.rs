//! Discovery matching and the driver boundary
//!
//! A driver enumerates the instances of its hardware that are present,
//! probes each one for an identity and hands it to a [`DiscoveryRegistry`].
//! The registry runs the first registered description whose criteria match,
//! falling back to a single optional catch-all.

use std::fmt;

use regtree_raw::{KeyedVec, SharedBinding, Value};

use crate::builder::Builder;
use crate::error::{RegtreeError, Result};

/// Predicate over a probed hardware identity
pub trait MatchCriteria {
    type Address: fmt::Display;
    type Identity: fmt::Debug;

    fn matches(&self, identity: &Self::Identity) -> bool;
}

/// One enumerated hardware instance
pub struct Discovered<C: MatchCriteria> {
    pub address: C::Address,
    pub identity: C::Identity,
    pub binding: SharedBinding,
}

impl<C: MatchCriteria> fmt::Debug for Discovered<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discovered")
            .field("address", &format_args!("{}", self.address))
            .field("identity", &self.identity)
            .field("binding", &self.binding)
            .finish()
    }
}

/// Describes a discovered instance into the tree
pub type DiscoveryCallback<C> = Box<dyn FnMut(&mut Builder, &Discovered<C>) -> Result<()> + Send>;

pub struct DiscoveryRegistry<C: MatchCriteria> {
    entries: Vec<(C, DiscoveryCallback<C>)>,
    catch_all: Option<DiscoveryCallback<C>>,
}

impl<C: MatchCriteria> Default for DiscoveryRegistry<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            catch_all: None,
        }
    }
}

impl<C: MatchCriteria> DiscoveryRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.catch_all.is_none()
    }

    /// Add a description; earlier registrations take precedence
    pub fn register<F>(&mut self, criteria: C, callback: F)
    where
        F: FnMut(&mut Builder, &Discovered<C>) -> Result<()> + Send + 'static,
    {
        self.entries.push((criteria, Box::new(callback)));
    }

    /// Set the description used when nothing else matches
    pub fn register_catch_all<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(&mut Builder, &Discovered<C>) -> Result<()> + Send + 'static,
    {
        if self.catch_all.is_some() {
            return Err(RegtreeError::ConfigError(
                "a catch-all discovery callback is already registered".into(),
            ));
        }
        self.catch_all = Some(Box::new(callback));
        Ok(())
    }

    /// Run the matching description for `found`
    ///
    /// Returns `false` when the device was left undescribed.
    pub fn dispatch(&mut self, builder: &mut Builder, found: &Discovered<C>) -> Result<bool> {
        let callback = match self
            .entries
            .iter_mut()
            .find(|(criteria, _)| criteria.matches(&found.identity))
        {
            Some((_, callback)) => callback,
            None => match self.catch_all.as_mut() {
                Some(callback) => callback,
                None => {
                    tracing::warn!(
                        "No description for {} {:?}",
                        found.address,
                        found.identity
                    );
                    return Ok(false);
                }
            },
        };
        (*callback)(builder, found)?;
        Ok(true)
    }
}

/// A hardware backend
pub trait Driver: Send {
    fn name(&self) -> &str;

    /// Create a binding from driver-specific arguments
    fn new_binding(&self, args: &[Value]) -> Result<SharedBinding>;

    /// Enumerate present instances and describe them into `builder`
    ///
    /// Returns the number of instances that were described.
    fn discover(&mut self, _builder: &mut Builder) -> Result<usize> {
        Err(RegtreeError::DriverNotSupported(self.name().to_string()))
    }
}

/// Reject argument lists of the wrong length
pub fn check_args(driver: &str, args: &[Value], names: &[&str]) -> Result<()> {
    if args.len() != names.len() {
        return Err(RegtreeError::Args(format!(
            "{driver} expects {} argument(s) ({}), got {}",
            names.len(),
            names.join(", "),
            args.len()
        )));
    }
    Ok(())
}

/// Narrow a binding argument to the integer type a driver needs
pub fn arg<T: TryFrom<Value>>(driver: &str, name: &str, value: Value) -> Result<T> {
    T::try_from(value)
        .map_err(|_| RegtreeError::Args(format!("{driver}: {name} 0x{value:X} is out of range")))
}

/// Drivers by name
#[derive(Default)]
pub struct Drivers {
    drivers: KeyedVec<String, Box<dyn Driver>>,
}

impl Drivers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a driver; a second driver with the same name is ignored
    pub fn register(&mut self, driver: Box<dyn Driver>) {
        let name = driver.name().to_string();
        if self.drivers.contains_key(&name) {
            tracing::warn!("Driver '{}' already registered, keeping the first", name);
            return;
        }
        self.drivers.insert(name, driver);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Driver> {
        self.drivers.get(name).map(|d| d.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn Driver>> {
        self.drivers.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Run discovery for the named driver
    pub fn discover(&mut self, name: &str, builder: &mut Builder) -> Result<usize> {
        let driver = self
            .drivers
            .get_mut(name)
            .ok_or_else(|| RegtreeError::NotFound(format!("driver '{name}'")))?;
        let described = driver.discover(builder)?;
        tracing::info!("Driver '{}' described {} device(s)", name, described);
        Ok(described)
    }
}
