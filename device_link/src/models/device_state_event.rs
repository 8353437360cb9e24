use common::physical::Rgb;
use derive_more::Display;

/// Acknowledged actuator state changes, published for anything that mirrors
/// device state for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeviceStateEvent {
    #[display(fmt = "<Light | on:{}>", on)]
    LightPower { on: bool },

    #[display(fmt = "<Light | color:{}>", _0)]
    LightColor(Rgb),

    #[display(fmt = "<Servo | open:{}>", open)]
    Servo { open: bool },
}
