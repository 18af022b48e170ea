//! Registry of discovered peripherals
//! Deduplicates advertisements by address, tracks signal history and publishes
//! the filtered view as immutable snapshots.

use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::bluetooth::constants::{DEVICE_NAME_PREFIX, NEARBY_RSSI_THRESHOLD};
use crate::core::bluetooth::observable::Observable;
use crate::core::bluetooth::types::{Advertisement, DiscoveredDevice};

/// Published filtered view. `None` means the registry was cleared.
pub type FilteredView = Option<Arc<[DiscoveredDevice]>>;

/// Active filter flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Only keep devices whose advertised name starts with the lock prefix
    pub name_required: bool,
    /// Only keep devices whose strongest signal reached the proximity threshold
    pub nearby_only: bool,
}

impl DeviceFilter {
    pub fn passes(&self, device: &DiscoveredDevice) -> bool {
        let name_ok = !self.name_required
            || device
                .name
                .as_deref()
                .is_some_and(|name| name.starts_with(DEVICE_NAME_PREFIX));
        let rssi_ok = !self.nearby_only || device.highest_rssi >= NEARBY_RSSI_THRESHOLD;
        name_ok && rssi_ok
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            name_required: true,
            nearby_only: false,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    devices: Vec<DiscoveredDevice>,
    /// Addresses in the last published view
    filtered: Vec<String>,
    filter: DeviceFilter,
}

pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
    view: Observable<FilteredView>,
}

impl DeviceRegistry {
    pub fn new(filter: DeviceFilter) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                filter,
                ..Default::default()
            }),
            view: Observable::new(None),
        }
    }

    /// Records an advertisement. Returns true if the device was already in the filtered
    /// view or now passes the active filters. Does not republish the view.
    pub fn observe(&self, advertisement: &Advertisement) -> bool {
        let mut state = self.state.lock();
        let filter = state.filter;
        let was_listed = state.filtered.contains(&advertisement.address);

        let device = match state
            .devices
            .iter()
            .position(|device| device.matches(advertisement))
        {
            Some(index) => {
                let device = &mut state.devices[index];
                device.update(advertisement);
                device
            }
            None => {
                debug!(
                    "Discovered new device {} ({:?}), RSSI {}",
                    advertisement.address, advertisement.name, advertisement.rssi
                );
                state.devices.push(DiscoveredDevice::new(advertisement));
                let last = state.devices.len() - 1;
                &mut state.devices[last]
            }
        };
        trace!(
            "Device {} RSSI {} (highest {})",
            device.address, device.rssi, device.highest_rssi
        );

        was_listed || filter.passes(device)
    }

    /// Sets the name filter and refreshes. Returns whether the view is non-empty.
    pub fn set_name_filter(&self, required: bool) -> bool {
        self.state.lock().filter.name_required = required;
        self.refresh()
    }

    /// Sets the proximity filter and refreshes. Returns whether the view is non-empty.
    pub fn set_proximity_filter(&self, required: bool) -> bool {
        self.state.lock().filter.nearby_only = required;
        self.refresh()
    }

    /// Recomputes the filtered view over all records and publishes it.
    /// Returns whether the view is non-empty.
    pub fn refresh(&self) -> bool {
        let mut state = self.state.lock();
        let filter = state.filter;
        let snapshot: Arc<[DiscoveredDevice]> = state
            .devices
            .iter()
            .filter(|device| filter.passes(device))
            .cloned()
            .collect();
        state.filtered = snapshot.iter().map(|device| device.address.clone()).collect();

        let non_empty = !snapshot.is_empty();
        // Published under the registry lock so snapshots go out in mutation order.
        self.view.publish(Some(snapshot));
        non_empty
    }

    /// Drops every record and publishes an absent view.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.devices.clear();
        state.filtered.clear();
        self.view.publish(None);
    }

    pub fn filter(&self) -> DeviceFilter {
        self.state.lock().filter
    }

    /// Snapshot of every known record
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.state.lock().devices.clone()
    }

    /// Last published filtered view
    pub fn filtered(&self) -> FilteredView {
        self.view.get()
    }

    pub fn subscribe(&self) -> (FilteredView, UnboundedReceiver<FilteredView>) {
        self.view.subscribe()
    }

    /// Filtered device with the strongest signal seen so far
    pub fn strongest_candidate(&self) -> Option<DiscoveredDevice> {
        self.view.with(|view| {
            view.as_ref()?
                .iter()
                .max_by_key(|device| device.highest_rssi)
                .cloned()
        })
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DeviceFilter::default())
    }
}
