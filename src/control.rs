//! Symbolic control names resolved against the driver's enumeration.
//!
//! Supported controls differ per device, so a registry is built from
//! [`CameraDevice::query_controls`] every time a session opens. Names are
//! derived from driver labels: `"Exposure (Absolute)"` registers as
//! `exposure_absolute`. Lookup is exact and case-sensitive.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{CameraError, Result};
use crate::traits::{CameraDevice, ControlInfo, ControlKind};

/// A registered control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDescriptor {
    /// Symbolic name used for lookup.
    pub name: String,
    /// Driver description.
    pub info: ControlInfo,
}

impl ControlDescriptor {
    /// Driver control id.
    pub const fn id(&self) -> u32 {
        self.info.id
    }

    /// Whether `value` is acceptable for this control.
    pub fn accepts(&self, value: i64) -> bool {
        match self.info.kind {
            ControlKind::Menu | ControlKind::IntegerMenu => self
                .info
                .menu
                .iter()
                .any(|(index, _)| i64::from(*index) == value),
            _ => (self.info.minimum..=self.info.maximum).contains(&value),
        }
    }
}

/// Controls supported by an open device, keyed by symbolic name.
#[derive(Debug, Clone, Default)]
pub struct ControlRegistry {
    controls: BTreeMap<String, ControlDescriptor>,
}

impl ControlRegistry {
    /// Build a registry from a driver enumeration.
    ///
    /// Disabled controls, class headers and value types that cannot be
    /// expressed as an integer are skipped. On a name collision the first
    /// control wins.
    pub fn from_controls(controls: Vec<ControlInfo>) -> Self {
        let mut registry = Self::default();
        for info in controls {
            if info.disabled || matches!(info.kind, ControlKind::Class | ControlKind::Other) {
                continue;
            }
            let name = symbolic_name(&info.label);
            if name.is_empty() {
                continue;
            }
            if registry.controls.contains_key(&name) {
                warn!(name = %name, id = info.id, "duplicate control name, keeping first");
                continue;
            }
            registry
                .controls
                .insert(name.clone(), ControlDescriptor { name, info });
        }
        debug!(count = registry.len(), "control registry built");
        registry
    }

    /// Look up a control by symbolic name.
    pub fn resolve(&self, name: &str) -> Result<&ControlDescriptor> {
        self.controls
            .get(name)
            .ok_or_else(|| CameraError::ControlNotFound(name.to_owned()))
    }

    /// Read the current value of a control.
    pub fn get<D: CameraDevice>(&self, device: &D, name: &str) -> Result<i64> {
        let control = self.resolve(name)?;
        device
            .control(&control.info)
            .map_err(|source| CameraError::ControlFailed {
                name: name.to_owned(),
                source,
            })
    }

    /// Write a control and return the value the driver applied.
    ///
    /// Read-only controls and values outside the advertised range are
    /// rejected before the device is touched. The applied value is read back
    /// since drivers round to their step size.
    pub fn set<D: CameraDevice>(&self, device: &mut D, name: &str, value: i64) -> Result<i64> {
        let control = self.resolve(name)?;
        if control.info.read_only {
            return Err(CameraError::ControlReadOnly(name.to_owned()));
        }
        if !control.accepts(value) {
            return Err(CameraError::ControlOutOfRange {
                name: name.to_owned(),
                value,
                minimum: control.info.minimum,
                maximum: control.info.maximum,
            });
        }
        let failed = |source| CameraError::ControlFailed {
            name: name.to_owned(),
            source,
        };
        device.set_control(&control.info, value).map_err(failed)?;
        if control.info.kind == ControlKind::Button {
            return Ok(value);
        }
        let applied = device.control(&control.info).map_err(failed)?;
        debug!(control = name, requested = value, applied, "control set");
        Ok(applied)
    }

    /// Resolve a menu item label to the value to write.
    pub fn menu_value(&self, name: &str, item: &str) -> Result<i64> {
        let control = self.resolve(name)?;
        control
            .info
            .menu
            .iter()
            .find(|(_, label)| label == item)
            .map(|(index, _)| i64::from(*index))
            .ok_or_else(|| CameraError::ControlNotFound(format!("{name}:{item}")))
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.controls.keys().map(String::as_str)
    }

    /// Registered controls in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ControlDescriptor> {
        self.controls.values()
    }

    /// Number of registered controls.
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    /// Whether no controls are registered.
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

/// Derive the lookup name for a driver label.
///
/// Lower-cases ASCII letters and collapses every run of other characters
/// into a single underscore, trimming at both ends.
pub fn symbolic_name(label: &str) -> String {
    let mut name = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            name.push(ch.to_ascii_lowercase());
        } else if !name.is_empty() && !name.ends_with('_') {
            name.push('_');
        }
    }
    while name.ends_with('_') {
        name.pop();
    }
    name
}
