use super::{EquipmentState, Measurement};

/// The outcome of a hysteresis decision step.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Actuation must start.
    StartActuating,
    /// Actuation must stop.
    StopActuating,
    /// Nothing to do.
    Hold,
}

/// Applies the hysteresis rule to a measurement.
///
/// Actuation starts when the measured value falls below `target - hysteresis`
/// while the equipment is on but not actuating, and stops when it rises above
/// `target + hysteresis` while actuating. An equipment which is off is never
/// actuated.
///
/// # Examples
///
/// ```
/// use devsim::controller::{decide, Decision, EquipmentState, Measurement};
///
/// let cold = Measurement { current: 18.0, target: 19.0 };
/// assert_eq!(decide(cold, 0.5, EquipmentState::OnNotActuating), Decision::StartActuating);
/// assert_eq!(decide(cold, 0.5, EquipmentState::Off), Decision::Hold);
/// ```
pub fn decide(measurement: Measurement, hysteresis: f64, state: EquipmentState) -> Decision {
    let Measurement { current, target } = measurement;

    match state {
        EquipmentState::OnNotActuating if current < target - hysteresis => {
            Decision::StartActuating
        }
        EquipmentState::Actuating if current > target + hysteresis => Decision::StopActuating,
        _ => Decision::Hold,
    }
}
