use plate_proto::{DetectedVehicle, DisplayAction};
use std::collections::VecDeque;
use tracing::debug;

/// FIFO of alert vehicles waiting for the screen, plus the one on it.
///
/// Only alerts occupy the screen. A plate is never queued twice and is never
/// queued while it is the one showing. Non-alert vehicles are shown in passing
/// when nothing is showing and discarded otherwise.
#[derive(Debug, Default)]
pub struct AlertQueue {
    showing: Option<DetectedVehicle>,
    waiting: VecDeque<DetectedVehicle>,
}

impl AlertQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn showing(&self) -> Option<&DetectedVehicle> {
        self.showing.as_ref()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_idle(&self) -> bool {
        self.showing.is_none()
    }

    fn holds_plate(&self, plate: &str) -> bool {
        self.showing
            .iter()
            .chain(self.waiting.iter())
            .any(|v| v.plate_number.as_deref() == Some(plate))
    }

    /// Decides what happens to a freshly recognized vehicle. For `Dropped` and
    /// `Discarded` the caller owns the vehicle's crop files and should delete them.
    pub fn offer(&mut self, vehicle: DetectedVehicle) -> DisplayAction {
        let id = vehicle.id;

        if !vehicle.alert {
            return if self.is_idle() {
                DisplayAction::Show(vehicle)
            } else {
                debug!("alerts: discarding {} while an alert is showing", id);
                DisplayAction::Discarded(id)
            };
        }

        if let Some(plate) = vehicle.plate_number.as_deref() {
            if self.holds_plate(plate) {
                debug!("alerts: {} already queued or showing", plate);
                return DisplayAction::Dropped(id);
            }
        }

        if self.is_idle() {
            self.showing = Some(vehicle.clone());
            DisplayAction::Show(vehicle)
        } else {
            self.waiting.push_back(vehicle);
            DisplayAction::Queued(id)
        }
    }

    /// Takes the current alert off screen and promotes the next one, if any.
    pub fn dismiss(&mut self) -> Option<DetectedVehicle> {
        self.showing = self.waiting.pop_front();
        self.showing.clone()
    }
}
